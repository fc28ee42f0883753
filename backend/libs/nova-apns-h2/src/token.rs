use std::sync::Mutex;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use tracing::{debug, error};

use crate::errors::ApnsError;

/// Bearer token source for token-based APNs authentication
///
/// `generation` increases by one every time the token is re-signed. Callers
/// pass the generation they observed to `regenerate`, so concurrent requests
/// that all saw the same expired token trigger a single re-sign.
pub trait AuthToken: Send + Sync {
    fn current(&self) -> String;

    fn generation(&self) -> u64;

    /// True once the token is at least `threshold_secs` old
    fn is_expired(&self, threshold_secs: i64) -> bool;

    /// Re-sign the token if `expected_generation` is still current
    fn regenerate(&self, expected_generation: u64);
}

/// JWT claims for an APNs provider token
#[derive(Debug, Serialize)]
struct ProviderClaims<'a> {
    iss: &'a str,
    iat: i64,
}

#[derive(Debug)]
struct TokenState {
    current: String,
    issued_at: i64,
    generation: u64,
}

/// ES256 provider token signed from an already-loaded `.p8` key
pub struct ProviderToken {
    key: EncodingKey,
    key_id: String,
    team_id: String,
    state: Mutex<TokenState>,
}

impl ProviderToken {
    /// Create a provider token and sign the first JWT
    ///
    /// # Arguments
    /// * `key_pem` - PKCS#8 PEM contents of the APNs signing key
    /// * `key_id` - 10-character key identifier from the developer account
    /// * `team_id` - Team identifier used as the JWT issuer
    pub fn new(
        key_pem: &[u8],
        key_id: impl Into<String>,
        team_id: impl Into<String>,
    ) -> Result<Self, ApnsError> {
        let key = EncodingKey::from_ec_pem(key_pem)
            .map_err(|e| ApnsError::Token(format!("failed to parse signing key: {e}")))?;
        let key_id = key_id.into();
        let team_id = team_id.into();

        let issued_at = Utc::now().timestamp();
        let current = sign(&key, &key_id, &team_id, issued_at)?;

        Ok(Self {
            key,
            key_id,
            team_id,
            state: Mutex::new(TokenState {
                current,
                issued_at,
                generation: 0,
            }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn sign(key: &EncodingKey, key_id: &str, team_id: &str, issued_at: i64) -> Result<String, ApnsError> {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(key_id.to_string());

    let claims = ProviderClaims {
        iss: team_id,
        iat: issued_at,
    };

    encode(&header, &claims, key).map_err(|e| ApnsError::Token(format!("failed to sign JWT: {e}")))
}

impl AuthToken for ProviderToken {
    fn current(&self) -> String {
        self.state().current.clone()
    }

    fn generation(&self) -> u64 {
        self.state().generation
    }

    fn is_expired(&self, threshold_secs: i64) -> bool {
        Utc::now().timestamp() - self.state().issued_at >= threshold_secs
    }

    fn regenerate(&self, expected_generation: u64) {
        let mut state = self.state();
        if state.generation != expected_generation {
            debug!(
                "Skipping token regeneration: generation {} already superseded by {}",
                expected_generation, state.generation
            );
            return;
        }

        let issued_at = Utc::now().timestamp();
        match sign(&self.key, &self.key_id, &self.team_id, issued_at) {
            Ok(token) => {
                state.current = token;
                state.issued_at = issued_at;
                state.generation += 1;
                debug!("Regenerated provider token (generation {})", state.generation);
            }
            Err(e) => {
                error!("Provider token regeneration failed, keeping previous token: {}", e);
            }
        }
    }
}
