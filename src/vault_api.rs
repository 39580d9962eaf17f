//! Minimal blocking client for the Vault HTTP API
//!
//! Covers the three calls the commands need: `sys/init`, `sys/unseal` and
//! token creation. Responses are kept as opaque JSON where the tool only
//! passes them through (the init response is what gets encrypted).

use std::time::Duration;

use rand::Rng;
use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{EnvelopeError, Result};

/// Connection and retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultClientConfig {
    pub address: String,
    pub timeout_secs: u64,
    pub min_retry_wait_ms: u64,
    pub max_retry_wait_ms: u64,
    /// Retries after the first attempt, for 5xx and transport errors
    pub max_retries: u32,
}

impl Default for VaultClientConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".into(),
            timeout_secs: 60,
            min_retry_wait_ms: 1000,
            max_retry_wait_ms: 1500,
            max_retries: 2,
        }
    }
}

impl VaultClientConfig {
    /// Jittered wait before the next retry
    pub fn retry_wait(&self) -> Duration {
        let min = self.min_retry_wait_ms.min(self.max_retry_wait_ms);
        let max = self.min_retry_wait_ms.max(self.max_retry_wait_ms);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// `sys/unseal` response
#[derive(Debug, Clone, Deserialize)]
pub struct SealStatus {
    pub sealed: bool,
    #[serde(rename = "t")]
    pub threshold: u32,
    #[serde(rename = "n")]
    pub shares: u32,
    pub progress: u32,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub cluster_name: Option<String>,
}

/// Body of a token create request
#[derive(Debug, Clone, Serialize)]
pub struct TokenCreateRequest {
    pub policies: Vec<String>,
    pub no_parent: bool,
    pub ttl: String,
}

impl TokenCreateRequest {
    pub fn new(policies: Vec<String>, ttl: Duration) -> Self {
        Self {
            policies,
            no_parent: true,
            ttl: format!("{}s", ttl.as_secs()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenAuth {
    pub client_token: String,
    #[serde(default)]
    pub lease_duration: u64,
}

/// Token create response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSecret {
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub lease_duration: u64,
    pub auth: TokenAuth,
}

/// First unseal key of an init response
pub fn unseal_key(init: &Value) -> Result<&str> {
    init.get("keys")
        .and_then(|keys| keys.get(0))
        .and_then(Value::as_str)
        .ok_or_else(|| EnvelopeError::Vault("secrets contain no unseal key".into()))
}

/// Root token of an init response
pub fn root_token(init: &Value) -> Result<&str> {
    init.get("root_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| EnvelopeError::Vault("secrets contain no root token".into()))
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

fn retryable_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

/// Summary of a failed response: status plus Vault's `errors` list
fn failure_message(status: StatusCode, body: &str) -> String {
    let errors = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("errors").cloned())
        .and_then(|v| v.as_array().cloned())
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default();

    if errors.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, errors)
    }
}

pub struct VaultClient {
    config: VaultClientConfig,
    http: Client,
    token: Option<SecretBox<String>>,
}

impl VaultClient {
    pub fn new(config: VaultClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EnvelopeError::Vault(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            token: None,
        })
    }

    /// Authenticate subsequent requests
    pub fn with_token(mut self, token: SecretBox<String>) -> Self {
        self.token = Some(token);
        self
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.address.trim_end_matches('/'), path)
    }

    fn send(&self, method: Method, path: &str, body: &Value) -> Result<Response> {
        let url = self.url(path);
        let mut attempt = 0u32;

        loop {
            let mut request = self.http.request(method.clone(), &url).json(body);
            if let Some(token) = &self.token {
                request = request.header("X-Vault-Token", token.expose_secret().as_str());
            }

            let can_retry = attempt < self.config.max_retries;
            match request.send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if can_retry && retryable_status(response.status()) => {
                    warn!(
                        path,
                        status = %response.status(),
                        attempt,
                        "Vault request failed, retrying"
                    );
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().unwrap_or_default();
                    return Err(EnvelopeError::Vault(format!(
                        "{} {}: {}",
                        method,
                        path,
                        failure_message(status, &body)
                    )));
                }
                Err(e) if can_retry && retryable_error(&e) => {
                    warn!(path, error = %e, attempt, "Vault request failed, retrying");
                }
                Err(e) => return Err(EnvelopeError::Vault(format!("{} {}: {}", method, path, e))),
            }

            attempt += 1;
            std::thread::sleep(self.config.retry_wait());
        }
    }

    /// Initialize with a 1-of-1 unseal key; returns the raw init response
    pub fn init(&self) -> Result<Value> {
        let body = json!({ "secret_shares": 1, "secret_threshold": 1 });
        let response = self.send(Method::PUT, "sys/init", &body)?;
        response
            .json()
            .map_err(|e| EnvelopeError::Vault(format!("invalid init response: {}", e)))
    }

    pub fn unseal(&self, key: &str) -> Result<SealStatus> {
        let response = self.send(Method::PUT, "sys/unseal", &json!({ "key": key }))?;
        let status: SealStatus = response
            .json()
            .map_err(|e| EnvelopeError::Vault(format!("invalid unseal response: {}", e)))?;

        debug!(sealed = status.sealed, progress = status.progress, "Unseal response");
        Ok(status)
    }

    /// Create an orphan token, or a token from `role` when given
    pub fn create_token(
        &self,
        request: &TokenCreateRequest,
        role: Option<&str>,
    ) -> Result<TokenSecret> {
        let path = match role {
            Some(role) => format!("auth/token/create/{}", role),
            None => "auth/token/create-orphan".to_string(),
        };

        let body = serde_json::to_value(request)
            .map_err(|e| EnvelopeError::Serialization(e.to_string()))?;
        let response = self.send(Method::POST, &path, &body)?;
        response
            .json()
            .map_err(|e| EnvelopeError::Vault(format!("invalid token response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VaultClientConfig::default();
        assert_eq!(config.address, "http://127.0.0.1:8200");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_retry_wait_bounds() {
        let config = VaultClientConfig::default();
        for _ in 0..100 {
            let wait = config.retry_wait();
            assert!(wait >= Duration::from_millis(1000));
            assert!(wait <= Duration::from_millis(1500));
        }

        let inverted = VaultClientConfig {
            min_retry_wait_ms: 20,
            max_retry_wait_ms: 10,
            ..Default::default()
        };
        assert!(inverted.retry_wait() <= Duration::from_millis(20));
    }

    #[test]
    fn test_url_join() {
        let client = VaultClient::new(VaultClientConfig {
            address: "https://vault.example:8200/".into(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(client.url("sys/init"), "https://vault.example:8200/v1/sys/init");
    }

    #[test]
    fn test_init_response_fields() {
        let init = json!({"keys": ["AA=="], "keys_base64": ["AA=="], "root_token": "s.abc123"});
        assert_eq!(unseal_key(&init).unwrap(), "AA==");
        assert_eq!(root_token(&init).unwrap(), "s.abc123");

        let empty = json!({"keys": [], "root_token": ""});
        assert!(unseal_key(&empty).is_err());
        assert!(root_token(&empty).is_err());
    }

    #[test]
    fn test_token_request_body() {
        let request = TokenCreateRequest::new(vec!["admin".into()], Duration::from_secs(3600));
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, json!({"policies": ["admin"], "no_parent": true, "ttl": "3600s"}));
    }

    #[test]
    fn test_seal_status_parse() {
        let status: SealStatus = serde_json::from_value(json!({
            "type": "shamir", "sealed": true, "t": 1, "n": 1, "progress": 0, "version": "1.15.0"
        }))
        .unwrap();
        assert!(status.sealed);
        assert_eq!((status.threshold, status.shares), (1, 1));
        assert_eq!(status.cluster_name, None);
    }

    #[test]
    fn test_failure_message() {
        let body = r#"{"errors":["permission denied"]}"#;
        assert_eq!(
            failure_message(StatusCode::FORBIDDEN, body),
            "403 Forbidden: permission denied"
        );
        assert_eq!(
            failure_message(StatusCode::BAD_GATEWAY, "<html>"),
            "502 Bad Gateway"
        );
    }
}
