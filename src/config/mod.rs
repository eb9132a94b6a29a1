/// Configuration management for the Tessera control plane
///
/// Handles server, database, engine, vault and deployment tuning. Every value has an
/// environment-variable override so the process can be configured in containers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// External workflow engine endpoints
    pub engine: EngineConfig,
    /// Secret vault key material
    pub vault: VaultConfig,
    /// Deployment lifecycle tuning
    pub deploy: DeployConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL (e.g. "sqlite://data/tessera.db")
    pub url: String,
}

/// External engine control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Control plane REST base, e.g. "http://localhost:5678/api/v1"
    pub api_url: String,
    /// API key sent with every control plane request; never written out
    #[serde(skip_serializing, default)]
    pub api_key: String,
    /// Publicly reachable base used to build trigger URLs
    pub webhook_base_url: String,
    /// Base of the execution callback; the deployment id is appended
    pub callback_base_url: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

/// Vault key derivation input
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Never written out; a deserialized config without it fails vault startup
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub salt: String,
    pub kdf_iterations: u32,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("secret", &"<redacted>")
            .field("salt", &self.salt)
            .field("kdf_iterations", &self.kdf_iterations)
            .finish()
    }
}

/// What happens to the previous remote workflow when a workflow is redeployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeployPolicy {
    /// Leave the previous remote workflow in place as a rollback target
    Retain,
    /// Best-effort delete of the previous remote workflow after the local commit
    DeletePrevious,
}

impl RedeployPolicy {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "delete_previous" | "delete-previous" | "delete" => RedeployPolicy::DeletePrevious,
            _ => RedeployPolicy::Retain,
        }
    }
}

/// Deployment lifecycle tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Attempts per external call (first try included)
    pub retry_attempts: u32,
    /// First backoff delay; doubles on each further attempt
    pub retry_base_delay_ms: u64,
    /// Pause between the deactivate and reactivate calls
    pub settle_delay_ms: u64,
    pub redeploy_policy: RedeployPolicy,
    /// Attempts for the manual test trigger
    pub test_trigger_attempts: u32,
    pub test_trigger_base_delay_ms: u64,
    pub test_trigger_step_ms: u64,
    /// Execution timeout used when the workflow metadata carries no positive one
    pub execution_timeout_floor_secs: i64,
}

impl DeployConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            retry_attempts: env_parse("TESSERA_RETRY_ATTEMPTS", 3),
            retry_base_delay_ms: env_parse("TESSERA_RETRY_BASE_DELAY_MS", 1000),
            settle_delay_ms: env_parse("TESSERA_SETTLE_DELAY_MS", 1500),
            redeploy_policy: RedeployPolicy::parse(&env_or("TESSERA_REDEPLOY_POLICY", "retain")),
            test_trigger_attempts: env_parse("TESSERA_TEST_TRIGGER_ATTEMPTS", 3),
            test_trigger_base_delay_ms: env_parse("TESSERA_TEST_TRIGGER_BASE_DELAY_MS", 4000),
            test_trigger_step_ms: env_parse("TESSERA_TEST_TRIGGER_STEP_MS", 2000),
            execution_timeout_floor_secs: env_parse("TESSERA_EXECUTION_TIMEOUT_FLOOR_SECS", 300),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        let port = env_parse("TESSERA_PORT", 3004u16);
        Self {
            server: ServerConfig {
                host: env_or("TESSERA_HOST", "0.0.0.0"),
                port,
            },
            database: DatabaseConfig {
                url: env_or("TESSERA_DATABASE_URL", "sqlite://data/tessera.db"),
            },
            engine: EngineConfig {
                api_url: env_or("TESSERA_ENGINE_API_URL", "http://localhost:5678/api/v1"),
                api_key: env_or("TESSERA_ENGINE_API_KEY", ""),
                webhook_base_url: env_or("TESSERA_ENGINE_WEBHOOK_URL", "http://localhost:5678"),
                callback_base_url: std::env::var("TESSERA_CALLBACK_BASE_URL")
                    .unwrap_or_else(|_| format!("http://localhost:{}/api/executions", port)),
                request_timeout_secs: env_parse("TESSERA_ENGINE_TIMEOUT_SECS", 30),
            },
            vault: VaultConfig {
                secret: env_or("TESSERA_VAULT_SECRET", ""),
                salt: env_or("TESSERA_VAULT_SALT", "tessera-vault"),
                kdf_iterations: env_parse("TESSERA_VAULT_KDF_ITERATIONS", 600_000),
            },
            deploy: DeployConfig::default(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redeploy_policy_parse() {
        assert_eq!(RedeployPolicy::parse("delete_previous"), RedeployPolicy::DeletePrevious);
        assert_eq!(RedeployPolicy::parse("DELETE"), RedeployPolicy::DeletePrevious);
        assert_eq!(RedeployPolicy::parse("retain"), RedeployPolicy::Retain);
        assert_eq!(RedeployPolicy::parse("anything"), RedeployPolicy::Retain);
    }

    #[test]
    fn test_serialized_config_omits_vault_secret() {
        let mut config = Config::default();
        config.vault.secret = "hunter2-master-key".to_string();
        config.engine.api_key = "engine-api-key-value".to_string();

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2-master-key"));
        assert!(!json.contains("engine-api-key-value"));
        assert!(json.contains("kdf_iterations"));

        let restored: Config = serde_json::from_str(&json).unwrap();
        assert!(restored.vault.secret.is_empty());
        assert_eq!(restored.vault.salt, config.vault.salt);
    }

    #[test]
    fn test_vault_config_debug_redacts_secret() {
        let config = VaultConfig {
            secret: "hunter2".to_string(),
            salt: "salt".to_string(),
            kdf_iterations: 10,
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
