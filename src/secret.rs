//! Credential secret decryption.
//!
//! Secrets are stored encrypted at rest and decrypted on the request path, always on a copy
//! of the selected credential. The process-wide key is initialised lazily, at most once.

use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose};
use once_cell::sync::OnceCell;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::Credential;
use crate::error::LLMError;

/// Environment variable holding the process key material.
pub const SECRET_KEY_VAR: &str = "LLM_SECRET_KEY";

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Turns an encrypted secret into usable plaintext.
pub trait SecretCodec: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String, LLMError>;
}

/// Thread-safe codec handle.
pub type DynSecretCodec = Arc<dyn SecretCodec>;

/// Returns a copy of `credential` whose secret fields are decrypted.
pub fn decrypt_credential(
    codec: &dyn SecretCodec,
    credential: &Credential,
) -> Result<Credential, LLMError> {
    let mut copy = credential.clone();
    copy.secret = credential.secret.try_map(|value| codec.decrypt(value))?;
    Ok(copy)
}

/// AES-256-GCM codec. The wire format is `base64(nonce || ciphertext || tag)`.
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
}

impl AesGcmCodec {
    /// Derives the 256-bit key from arbitrary key material with SHA-256.
    pub fn new(key_material: &[u8]) -> Self {
        let derived: [u8; 32] = Sha256::digest(key_material).into();
        let key = Key::<Aes256Gcm>::from_slice(&derived);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts `plaintext` with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, LLMError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|err| LLMError::Serialization {
                message: format!("secret encryption failed: {err}"),
            })?;

        let mut output = Vec::with_capacity(NONCE_SIZE + sealed.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(output))
    }
}

impl SecretCodec for AesGcmCodec {
    fn decrypt(&self, ciphertext: &str) -> Result<String, LLMError> {
        let bytes = general_purpose::STANDARD
            .decode(ciphertext.trim())
            .map_err(|err| LLMError::Decrypt {
                message: format!("invalid base64: {err}"),
            })?;
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(LLMError::Decrypt {
                message: "ciphertext too short".to_string(),
            });
        }

        let (nonce, sealed) = bytes.split_at(NONCE_SIZE);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| LLMError::Decrypt {
                message: "authentication failed, key mismatch or corrupted ciphertext".to_string(),
            })?;
        String::from_utf8(plain).map_err(|err| LLMError::Decrypt {
            message: format!("plaintext is not utf-8: {err}"),
        })
    }
}

/// Passes secrets through unchanged. For local development and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextCodec;

impl SecretCodec for PlaintextCodec {
    fn decrypt(&self, ciphertext: &str) -> Result<String, LLMError> {
        Ok(ciphertext.to_string())
    }
}

static PROCESS_CODEC: OnceCell<DynSecretCodec> = OnceCell::new();

/// Process-wide codec keyed from [`SECRET_KEY_VAR`].
///
/// Initialisation runs at most once; a failure is reported as [`LLMError::KeyInit`] and
/// retried on the next call.
pub fn process_codec() -> Result<DynSecretCodec, LLMError> {
    PROCESS_CODEC
        .get_or_try_init(|| {
            let material = std::env::var(SECRET_KEY_VAR)
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or_else(|| LLMError::KeyInit {
                    message: format!("{SECRET_KEY_VAR} is not set"),
                })?;
            tracing::info!("initialised process secret codec");
            Ok(Arc::new(AesGcmCodec::new(material.as_bytes())) as DynSecretCodec)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretMaterial;

    #[test]
    fn decrypt_inverts_encrypt() {
        let codec = AesGcmCodec::new(b"unit-test-key");
        for plaintext in ["k", "sk-live-0123456789", "多字节 секрет 🔑"] {
            let sealed = codec.encrypt(plaintext).expect("encrypt");
            assert_ne!(sealed, plaintext);
            assert_eq!(codec.decrypt(&sealed).expect("decrypt"), plaintext);
        }
    }

    #[test]
    fn wrong_key_and_garbage_fail_with_decrypt_error() {
        let sealed = AesGcmCodec::new(b"key-a").encrypt("secret").expect("encrypt");
        let other = AesGcmCodec::new(b"key-b");
        assert!(matches!(other.decrypt(&sealed), Err(LLMError::Decrypt { .. })));
        assert!(matches!(other.decrypt("not base64!"), Err(LLMError::Decrypt { .. })));
        assert!(matches!(other.decrypt("c2hvcnQ="), Err(LLMError::Decrypt { .. })));
    }

    #[test]
    fn decrypt_credential_leaves_original_untouched() {
        let codec = AesGcmCodec::new(b"k");
        let credential: Credential = serde_json::from_value(serde_json::json!({
            "name": "east",
            "api_key": codec.encrypt("plain-key").expect("encrypt"),
            "enabled": true,
            "weight": 1
        }))
        .expect("credential");

        let decrypted = decrypt_credential(&codec, &credential).expect("decrypt");
        assert_eq!(decrypted.secret.api_key(), Some("plain-key"));
        assert_ne!(credential.secret.api_key(), Some("plain-key"));
        assert_eq!(decrypted.name, "east");
    }

    #[test]
    fn decrypt_credential_covers_access_key_pairs() {
        let credential = Credential {
            secret: SecretMaterial::AccessKeyPair {
                access_key: "AK".into(),
                secret_key: "SK".into(),
                session_token: Some("ST".into()),
            },
            ..serde_json::from_value(serde_json::json!({"name": "n", "api_key": "x"}))
                .expect("base credential")
        };
        let mut seen = Vec::new();
        let codec = RecordingCodec(std::sync::Mutex::new(Vec::new()));
        decrypt_credential(&codec, &credential).expect("decrypt");
        seen.extend(codec.0.lock().expect("lock").drain(..));
        assert_eq!(seen, vec!["AK", "SK", "ST"]);
    }

    struct RecordingCodec(std::sync::Mutex<Vec<String>>);

    impl SecretCodec for RecordingCodec {
        fn decrypt(&self, ciphertext: &str) -> Result<String, LLMError> {
            self.0.lock().expect("lock").push(ciphertext.to_string());
            Ok(ciphertext.to_lowercase())
        }
    }
}
