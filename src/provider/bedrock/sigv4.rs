//! AWS Signature Version 4 request signing.

use std::collections::BTreeMap;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::LLMError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Signs Bedrock runtime requests.
pub(crate) struct SigV4Signer {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    service: &'static str,
}

impl SigV4Signer {
    pub(crate) fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token,
            region: region.into(),
            service: "bedrock",
        }
    }

    /// Returns `headers` extended with `host`, `x-amz-date`, the session token when present,
    /// and `Authorization`.
    pub(crate) fn sign(
        &self,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<HashMap<String, String>, LLMError> {
        let parsed = url::Url::parse(url)
            .map_err(|err| LLMError::transport(format!("invalid bedrock url {url}: {err}")))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(LLMError::transport(format!("bedrock url {url} has no host"))),
        };

        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = timestamp.format("%Y%m%d").to_string();

        let mut signed: BTreeMap<String, String> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
            .collect();
        signed.insert("host".to_string(), host);
        signed.insert("x-amz-date".to_string(), amz_date.clone());
        if let Some(token) = &self.session_token {
            signed.insert("x-amz-security-token".to_string(), token.clone());
        }

        let canonical_headers: String = signed
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers = signed.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.to_ascii_uppercase(),
            canonical_uri(parsed.path()),
            canonical_query(parsed.query().unwrap_or("")),
            canonical_headers,
            signed_headers,
            hex::encode(Sha256::digest(body))
        );

        let scope = format!("{date_stamp}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let signature = hex::encode(self.signing_key(&date_stamp)?.sign(string_to_sign.as_bytes())?);

        let mut out = headers.clone();
        out.insert("x-amz-date".to_string(), amz_date);
        if let Some(token) = &self.session_token {
            out.insert("x-amz-security-token".to_string(), token.clone());
        }
        out.insert(
            "Authorization".to_string(),
            format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.access_key
            ),
        );
        Ok(out)
    }

    fn signing_key(&self, date_stamp: &str) -> Result<SigningKey, LLMError> {
        let k_date = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        Ok(SigningKey(hmac_sha256(&k_service, b"aws4_request")?))
    }
}

struct SigningKey(Vec<u8>);

impl SigningKey {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, LLMError> {
        hmac_sha256(&self.0, data)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, LLMError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| LLMError::transport(format!("hmac key error: {err}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Non-S3 services encode each path segment a second time.
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| {
            (
                urlencoding::encode(&key).into_owned(),
                urlencoding::encode(&value).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}
