//! Credentials: secure ids, signed tokens, deferred login confirmation.
//!
//! Tokens are compact JWTs signed with HMAC-SHA256 under a broker-wide
//! secret. The secret comes from `JWT_PRIVATE_KEY`; without it a random
//! process-lifetime secret is used and tokens do not survive restarts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use atelier_shared::constants::SECURE_ID_LEN;
use atelier_shared::types::{User, UserId};

use crate::error::BrokerError;

type HmacSha256 = Hmac<Sha256>;

/// 24 characters from a CSPRNG-backed alphanumeric alphabet.
pub fn secure_id() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SECURE_ID_LEN)
        .map(char::from)
        .collect()
}

struct PendingLogin {
    settle: oneshot::Sender<Result<String, BrokerError>>,
    timer: JoinHandle<()>,
}

pub struct Credentials {
    secret: Vec<u8>,
    pending: Arc<Mutex<HashMap<String, PendingLogin>>>,
    auth_timeout: Duration,
}

impl Credentials {
    pub fn new(secret: Option<String>, auth_timeout: Duration) -> Self {
        let secret = match secret {
            Some(s) => s.into_bytes(),
            None => {
                warn!("JWT_PRIVATE_KEY not set, tokens will not survive a restart");
                let mut bytes = [0u8; 32];
                OsRng.fill_bytes(&mut bytes);
                bytes.to_vec()
            }
        };

        Self {
            secret,
            pending: Arc::new(Mutex::new(HashMap::new())),
            auth_timeout,
        }
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(data);
        mac
    }

    /// Sign a claims value as `header.payload.signature`.
    pub fn generate_jwt<T: Serialize>(&self, claims: &T) -> Result<String, BrokerError> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = serde_json::to_vec(claims)
            .map_err(|e| BrokerError::SchemaInvalid(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);

        let signing_input = format!("{header}.{payload}");
        let signature = self.mac(signing_input.as_bytes()).finalize().into_bytes();

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Verify signature and expiry, then decode the claims.
    pub fn verify_jwt<T: DeserializeOwned>(&self, token: &str) -> Result<T, BrokerError> {
        let mut parts = token.split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s)) if parts.next().is_none() => (h, p, s),
            _ => return Err(BrokerError::AuthInvalid),
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| BrokerError::AuthInvalid)?;
        let signing_input = format!("{header}.{payload}");
        // Constant-time comparison
        self.mac(signing_input.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| BrokerError::AuthInvalid)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| BrokerError::AuthInvalid)?;
        let claims: serde_json::Value =
            serde_json::from_slice(&payload).map_err(|_| BrokerError::AuthInvalid)?;

        if let Some(exp) = claims.get("exp").and_then(|v| v.as_i64()) {
            if exp < chrono::Utc::now().timestamp() {
                return Err(BrokerError::AuthInvalid);
            }
        }

        serde_json::from_value(claims).map_err(|_| BrokerError::AuthInvalid)
    }

    /// Decode a user token, requiring the identity fields.
    pub fn get_user(&self, token: &str) -> Result<User, BrokerError> {
        let user: User = self.verify_jwt(token)?;
        if user.id.0.is_empty() || user.name.is_empty() {
            return Err(BrokerError::AuthInvalid);
        }
        Ok(user)
    }

    /// Mint a fresh user identity with a broker-assigned id.
    ///
    /// Identities live only inside signed tokens; nothing survives a
    /// broker restart.
    pub fn register_user(&self, name: String, email: Option<String>) -> User {
        User {
            id: UserId(secure_id()),
            name,
            email,
        }
    }

    /// Wait for an out-of-band login keyed by `confirm_token`.
    ///
    /// Resolves with a signed user token once [`confirm_user`] is called,
    /// or fails with `AuthTimeout` when the entry is evicted.
    ///
    /// [`confirm_user`]: Credentials::confirm_user
    pub async fn confirm_auth(&self, confirm_token: &str) -> Result<String, BrokerError> {
        let (tx, rx) = oneshot::channel();

        let timer = {
            let pending = Arc::clone(&self.pending);
            let token = confirm_token.to_string();
            let timeout = self.auth_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let evicted = pending
                    .lock()
                    .expect("pending login lock poisoned")
                    .remove(&token);
                if let Some(entry) = evicted {
                    debug!(token = %token, "deferred login evicted");
                    let _ = entry.settle.send(Err(BrokerError::AuthTimeout));
                }
            })
        };

        let replaced = self
            .pending
            .lock()
            .expect("pending login lock poisoned")
            .insert(confirm_token.to_string(), PendingLogin { settle: tx, timer });
        if let Some(old) = replaced {
            old.timer.abort();
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::AuthTimeout),
        }
    }

    /// Resolve a deferred login with the supplied identity.
    ///
    /// Registers a new user, signs a user token, and hands it to the
    /// pending waiter. Fails with `AuthTimeout` when no entry matches.
    pub fn confirm_user(
        &self,
        confirm_token: &str,
        name: String,
        email: Option<String>,
    ) -> Result<String, BrokerError> {
        let entry = self
            .pending
            .lock()
            .expect("pending login lock poisoned")
            .remove(confirm_token)
            .ok_or(BrokerError::AuthTimeout)?;
        entry.timer.abort();

        let user = self.register_user(name, email);
        let jwt = self.generate_jwt(&user)?;
        let _ = entry.settle.send(Ok(jwt.clone()));
        Ok(jwt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn credentials() -> Credentials {
        Credentials::new(Some("test-secret".into()), Duration::from_secs(300))
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Claims {
        sub: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exp: Option<i64>,
    }

    #[test]
    fn test_secure_id_shape() {
        let id = secure_id();
        assert_eq!(id.len(), SECURE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, secure_id());
    }

    #[test]
    fn test_jwt_roundtrip() {
        let creds = credentials();
        let claims = Claims {
            sub: "alice".into(),
            exp: None,
        };
        let token = creds.generate_jwt(&claims).unwrap();
        let restored: Claims = creds.verify_jwt(&token).unwrap();
        assert_eq!(claims, restored);
    }

    #[test]
    fn test_tampered_token_fails() {
        let creds = credentials();
        let token = creds
            .generate_jwt(&Claims {
                sub: "alice".into(),
                exp: None,
            })
            .unwrap();

        // Flipping any single byte must invalidate the token
        for i in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let Ok(tampered) = String::from_utf8(bytes) else {
                continue;
            };
            if tampered == token {
                continue;
            }
            assert!(
                creds.verify_jwt::<Claims>(&tampered).is_err(),
                "byte {i} tampering went undetected"
            );
        }
    }

    #[test]
    fn test_wrong_secret_fails() {
        let creds = credentials();
        let other = Credentials::new(Some("other-secret".into()), Duration::from_secs(300));
        let token = creds
            .generate_jwt(&Claims {
                sub: "alice".into(),
                exp: None,
            })
            .unwrap();
        assert!(matches!(
            other.verify_jwt::<Claims>(&token),
            Err(BrokerError::AuthInvalid)
        ));
    }

    #[test]
    fn test_expired_token_fails() {
        let creds = credentials();
        let token = creds
            .generate_jwt(&Claims {
                sub: "alice".into(),
                exp: Some(chrono::Utc::now().timestamp() - 60),
            })
            .unwrap();
        assert!(matches!(
            creds.verify_jwt::<Claims>(&token),
            Err(BrokerError::AuthInvalid)
        ));
    }

    #[test]
    fn test_get_user_requires_identity_fields() {
        let creds = credentials();
        let token = creds
            .generate_jwt(&serde_json::json!({"id": "", "name": "Alice"}))
            .unwrap();
        assert!(matches!(
            creds.get_user(&token),
            Err(BrokerError::AuthInvalid)
        ));

        let token = creds
            .generate_jwt(&serde_json::json!({"name": "Alice"}))
            .unwrap();
        assert!(matches!(
            creds.get_user(&token),
            Err(BrokerError::AuthInvalid)
        ));
    }

    #[tokio::test]
    async fn test_confirm_flow() {
        let creds = Arc::new(credentials());

        let waiter = {
            let creds = Arc::clone(&creds);
            tokio::spawn(async move { creds.confirm_auth("tok-1").await })
        };
        // Let the waiter register its pending entry
        tokio::task::yield_now().await;

        let jwt = creds
            .confirm_user("tok-1", "Alice".into(), Some("alice@example.com".into()))
            .unwrap();
        let waited = waiter.await.unwrap().unwrap();
        assert_eq!(jwt, waited);

        let user = creds.get_user(&jwt).unwrap();
        assert_eq!(user.name, "Alice");
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_confirm_unknown_token_fails() {
        let creds = credentials();
        assert!(matches!(
            creds.confirm_user("missing", "Bob".into(), None),
            Err(BrokerError::AuthTimeout)
        ));
    }

    #[tokio::test]
    async fn test_confirm_auth_times_out() {
        let creds = Credentials::new(Some("s".into()), Duration::from_millis(20));
        let result = creds.confirm_auth("tok-2").await;
        assert!(matches!(result, Err(BrokerError::AuthTimeout)));
        assert!(creds.pending.lock().unwrap().is_empty());
    }
}
