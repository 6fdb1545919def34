use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use keystone_core::{PolicyError, PolicyResult};

/// Claim key reserved for the credential's own identifier; never treated as a claim.
pub const RESERVED_CLAIM_ID: &str = "id";

/// A single `name = value` claim carried by a verified credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Claim {
    pub name: String,
    pub value: String,
}

impl Claim {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An externally issued, signed claim bundle presented per request.
///
/// Signature verification happens upstream; this type only carries the
/// verified content. Verified credentials are never persisted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedCredential {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub claims: Vec<Claim>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialValidityError {
    #[error("verified credential has expired")]
    Expired,

    #[error("verified credential not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid verified credential time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

impl VerifiedCredential {
    /// Build a credential from its raw claims JSON.
    pub fn from_claims_json(
        credential_type: impl Into<String>,
        issuer: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        claims_json: &str,
    ) -> PolicyResult<Self> {
        Ok(Self {
            credential_type: credential_type.into(),
            issuer: issuer.into(),
            issued_at,
            expires_at,
            claims: parse_claims(claims_json)?,
        })
    }

    pub fn claim(&self, name: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Check the validity window at `now`.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<(), CredentialValidityError> {
        if self.expires_at <= self.issued_at {
            return Err(CredentialValidityError::InvalidTimeWindow);
        }
        if now < self.issued_at {
            return Err(CredentialValidityError::NotYetValid);
        }
        if now >= self.expires_at {
            return Err(CredentialValidityError::Expired);
        }
        Ok(())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.validate_at(now).is_ok()
    }

    /// Stable textual key used when hashing a credential set.
    pub(crate) fn fingerprint_key(&self) -> String {
        let mut claims: Vec<&Claim> = self.claims.iter().collect();
        claims.sort();
        let claims: Vec<String> = claims.iter().map(|c| format!("{}={}", c.name, c.value)).collect();
        format!("{}|{}|{}", self.credential_type, self.issuer, claims.join(","))
    }
}

/// Parse a claims JSON object into a deterministic claim list.
///
/// The reserved `id` key is dropped and the remaining claims are sorted by name.
/// String values are taken verbatim; other JSON values keep their JSON text.
pub fn parse_claims(claims_json: &str) -> PolicyResult<Vec<Claim>> {
    let value: JsonValue = serde_json::from_str(claims_json)?;
    let JsonValue::Object(map) = value else {
        return Err(PolicyError::malformed("verified credential claims must be a JSON object"));
    };

    let mut claims: Vec<Claim> = map
        .into_iter()
        .filter(|(name, _)| name != RESERVED_CLAIM_ID)
        .map(|(name, value)| {
            let value = match value {
                JsonValue::String(s) => s,
                other => other.to_string(),
            };
            Claim { name, value }
        })
        .collect();
    claims.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(claims)
}
