//! Weighted credential selection.

use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::config::{ConfigStore, Credential};
use crate::error::LLMError;

/// Selects one enabled credential per request for a `(backend, environment)` pair.
///
/// The pool reads from the current [`ConfigStore`] snapshot and never mutates it; the
/// returned credential is an owned copy.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    store: Arc<ConfigStore>,
}

impl CredentialPool {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Runs weighted selection with the thread-local RNG.
    pub fn select_credential(&self, backend: &str, environment: &str) -> Result<Credential, LLMError> {
        self.select_credential_with(backend, environment, &mut rand::thread_rng())
    }

    /// Runs weighted selection with a caller-supplied RNG.
    pub fn select_credential_with<R: Rng + ?Sized>(
        &self,
        backend: &str,
        environment: &str,
        rng: &mut R,
    ) -> Result<Credential, LLMError> {
        let snapshot = self.store.snapshot();
        let credentials = snapshot.credentials(backend, environment)?;
        let chosen = select_weighted(credentials, rng).map_err(|err| match err {
            SelectError::NoneEnabled => LLMError::NoEnabledCredential {
                backend: backend.to_string(),
                environment: environment.to_string(),
            },
            SelectError::ZeroTotalWeight => LLMError::config(format!(
                "enabled credentials for backend {backend} in environment {environment} all have weight 0"
            )),
        })?;
        debug!(
            credential = %chosen.name,
            backend,
            environment,
            weight = chosen.weight,
            "selected credential"
        );
        Ok(chosen.clone())
    }
}

/// Why [`select_weighted`] could not pick a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    NoneEnabled,
    ZeroTotalWeight,
}

/// Cumulative-weight roulette over the enabled subset of `credentials`.
///
/// A lone enabled credential is returned regardless of its weight. With two or more, a
/// zero-weight entry can never win, and configuration order breaks ties.
pub fn select_weighted<'a, R: Rng + ?Sized>(
    credentials: &'a [Credential],
    rng: &mut R,
) -> Result<&'a Credential, SelectError> {
    let enabled: Vec<&Credential> = credentials.iter().filter(|c| c.enabled).collect();
    match enabled.as_slice() {
        [] => return Err(SelectError::NoneEnabled),
        [only] => return Ok(*only),
        _ => {}
    }

    let total: u64 = enabled.iter().map(|c| u64::from(c.weight)).sum();
    if total == 0 {
        return Err(SelectError::ZeroTotalWeight);
    }

    let draw = rng.gen_range(0..total);
    let mut running = 0u64;
    for credential in enabled {
        running += u64::from(credential.weight);
        if draw < running {
            return Ok(credential);
        }
    }
    // draw < total == final running value
    Err(SelectError::ZeroTotalWeight)
}
