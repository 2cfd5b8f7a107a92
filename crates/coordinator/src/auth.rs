//! Bearer-token authentication and API-key authorization.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::error::{CoordinatorError, Result};
use crate::store::Store;

type HmacSha256 = Hmac<Sha256>;

const KEYS_KEY: &str = "api_keys";
const KEY_IDS_KEY: &str = "key_ids";
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Which path-prefix the dispatcher resolved for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPath {
    Agent,
    Admin,
    Oauth,
    Public,
}

impl AuthPath {
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("/agent") => Self::Agent,
            Some("/admin") => Self::Admin,
            _ => Self::Oauth,
        }
    }
}

/// Tagged result of authentication: which of the three auth sources
/// validated the request, if any.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub valid: bool,
    pub source: AuthSource,
    pub key_id: Option<String>,
    pub agent_pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthSource {
    NoAuth,
    Public,
    ApiKey,
    Proxy,
    Admin,
}

/// Stored API key record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: String,
    pub agent_pattern: String,
    pub description: String,
    pub created_at: u64,
    pub verifier: String,
}

#[derive(Clone)]
struct CacheEntry {
    cached_at: Instant,
    key_id: String,
    agent_pattern: String,
}

/// Config shared by the auth layer — which secrets are configured.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub server_secret: Option<String>,
    pub admin_key: Option<String>,
    pub proxy_token: Option<String>,
}

impl AuthConfig {
    /// Dev mode: no secrets configured at all -> every request is allowed.
    pub fn is_dev_mode(&self) -> bool {
        self.server_secret.is_none() && self.admin_key.is_none() && self.proxy_token.is_none()
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Fast fingerprint used as the store lookup key for an API key: an
/// HMAC-SHA256 of the secret keyed by the server secret, hex-encoded.
fn fast_fingerprint(server_secret: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(server_secret.as_bytes())
        .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;
    mac.update(secret.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn random_secret() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Authorization check: the target agent id must satisfy `pattern` under
/// glob semantics. Pure — no store access, so it is a free function
/// rather than a method on `Auth`.
pub fn authorize(target: &str, pattern: &str) -> Result<()> {
    let glob = globset::Glob::new(pattern)
        .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?
        .compile_matcher();
    if glob.is_match(target) {
        Ok(())
    } else {
        Err(CoordinatorError::Forbidden(format!(
            "agent {target} does not match pattern {pattern}"
        )))
    }
}

pub struct Auth {
    store: Store,
    config: AuthConfig,
    /// Positive-only cache: a successful verification is cached for
    /// `CACHE_TTL`; failures are never cached.
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl Auth {
    pub fn new(store: Store, config: AuthConfig) -> Self {
        Self { store, config, cache: RwLock::new(HashMap::new()) }
    }

    /// Validate a bearer token under the given path. `token` is the raw
    /// string after `Bearer `.
    pub async fn authenticate(&self, path: AuthPath, token: Option<&str>) -> Result<AuthResult> {
        if path == AuthPath::Public {
            return Ok(AuthResult {
                valid: true,
                source: AuthSource::Public,
                key_id: None,
                agent_pattern: None,
            });
        }

        if self.config.is_dev_mode() {
            return Ok(AuthResult {
                valid: true,
                source: AuthSource::NoAuth,
                key_id: None,
                agent_pattern: None,
            });
        }

        let Some(token) = token else { return Err(CoordinatorError::AuthFailed) };

        match path {
            AuthPath::Admin => self.authenticate_admin(token),
            AuthPath::Agent => self.authenticate_agent(token).await,
            AuthPath::Oauth => self.authenticate_proxy(token),
            AuthPath::Public => unreachable!(),
        }
    }

    fn authenticate_proxy(&self, token: &str) -> Result<AuthResult> {
        let expected = self.config.proxy_token.as_deref().ok_or(CoordinatorError::AuthFailed)?;
        if constant_time_eq(token, expected) {
            Ok(AuthResult { valid: true, source: AuthSource::Proxy, key_id: None, agent_pattern: None })
        } else {
            Err(CoordinatorError::AuthFailed)
        }
    }

    fn split_composite(&self, token: &str) -> Result<(&str, &str)> {
        let server_secret =
            self.config.server_secret.as_deref().ok_or(CoordinatorError::AuthFailed)?;
        let rest = token.strip_prefix(server_secret).ok_or(CoordinatorError::AuthFailed)?;
        let key = rest.strip_prefix('.').ok_or(CoordinatorError::AuthFailed)?;
        Ok((server_secret, key))
    }

    fn authenticate_admin(&self, token: &str) -> Result<AuthResult> {
        let (_, key) = self.split_composite(token)?;
        let expected = self.config.admin_key.as_deref().ok_or(CoordinatorError::AuthFailed)?;
        if constant_time_eq(key, expected) {
            Ok(AuthResult { valid: true, source: AuthSource::Admin, key_id: None, agent_pattern: None })
        } else {
            Err(CoordinatorError::AuthFailed)
        }
    }

    async fn authenticate_agent(&self, token: &str) -> Result<AuthResult> {
        let (server_secret, secret) = self.split_composite(token)?;
        let fingerprint = fast_fingerprint(server_secret, secret)?;

        if let Some(entry) = self.cache.read().await.get(&fingerprint) {
            if entry.cached_at.elapsed() < CACHE_TTL {
                return Ok(AuthResult {
                    valid: true,
                    source: AuthSource::ApiKey,
                    key_id: Some(entry.key_id.clone()),
                    agent_pattern: Some(entry.agent_pattern.clone()),
                });
            }
        }

        let raw = self
            .store
            .hget(KEYS_KEY, &fingerprint)
            .await?
            .ok_or(CoordinatorError::AuthFailed)?;
        let record: ApiKeyRecord = serde_json::from_str(&raw)
            .map_err(|_| CoordinatorError::AuthFailed)?;

        let parsed_hash =
            PasswordHash::new(&record.verifier).map_err(|_| CoordinatorError::AuthFailed)?;
        Argon2::default()
            .verify_password(secret.as_bytes(), &parsed_hash)
            .map_err(|_| CoordinatorError::AuthFailed)?;

        self.cache.write().await.insert(
            fingerprint,
            CacheEntry {
                cached_at: Instant::now(),
                key_id: record.key_id.clone(),
                agent_pattern: record.agent_pattern.clone(),
            },
        );

        Ok(AuthResult {
            valid: true,
            source: AuthSource::ApiKey,
            key_id: Some(record.key_id),
            agent_pattern: Some(record.agent_pattern),
        })
    }

    /// Create a new API key. Returns the composite token (`server_secret.
    /// key`) once; only the fingerprint and the slow verifier are stored.
    pub async fn create_key(
        &self,
        agent_pattern: &str,
        description: &str,
    ) -> Result<(String, ApiKeyRecord)> {
        let server_secret =
            self.config.server_secret.as_deref().ok_or(CoordinatorError::AuthFailed)?;
        let secret = random_secret();
        let fingerprint = fast_fingerprint(server_secret, &secret)?;

        let salt = SaltString::generate(&mut OsRng);
        let verifier = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?
            .to_string();

        let key_id = hex::encode(&fingerprint.as_bytes()[..8]);
        let record = ApiKeyRecord {
            key_id: key_id.clone(),
            agent_pattern: agent_pattern.to_owned(),
            description: description.to_owned(),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            verifier,
        };

        let raw = serde_json::to_string(&record)
            .map_err(|e| CoordinatorError::InvalidRequest(e.to_string()))?;
        self.store.hset(KEYS_KEY, &fingerprint, &raw).await?;
        self.store.hset(KEY_IDS_KEY, &key_id, &fingerprint).await?;

        Ok((format!("{server_secret}.{secret}"), record))
    }

    /// Revoke a key by id: removes both indices and evicts the cache.
    pub async fn revoke_key(&self, key_id: &str) -> Result<bool> {
        let Some(fingerprint) = self.store.hget(KEY_IDS_KEY, key_id).await? else {
            return Ok(false);
        };
        self.store.hdel(KEYS_KEY, &fingerprint).await?;
        self.store.hdel(KEY_IDS_KEY, key_id).await?;
        self.cache.write().await.remove(&fingerprint);
        Ok(true)
    }

    pub async fn list_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        let entries = self.store.hgetall(KEYS_KEY).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, raw)| serde_json::from_str(&raw).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq("abc", "ab"));
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
    }

    #[test]
    fn dev_mode_detected_only_when_all_secrets_absent() {
        assert!(AuthConfig::default().is_dev_mode());
        let mut cfg = AuthConfig::default();
        cfg.admin_key = Some("x".into());
        assert!(!cfg.is_dev_mode());
    }

    #[test]
    fn auth_path_defaults_to_oauth() {
        assert_eq!(AuthPath::from_header(None), AuthPath::Oauth);
        assert_eq!(AuthPath::from_header(Some("/weird")), AuthPath::Oauth);
        assert_eq!(AuthPath::from_header(Some("/admin")), AuthPath::Admin);
    }

    // spec.md §8 invariant 5: admitted iff glob_match(target, pattern).
    #[test]
    fn authorize_admits_only_matching_targets() {
        assert!(authorize("machine/p", "machine/*").is_ok());
        assert!(authorize("other/x", "machine/*").is_err());
        assert!(authorize("machine", "machine").is_ok());
    }
}
