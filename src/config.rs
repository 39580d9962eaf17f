//! Configuration for vault-piv-helper
//!
//! CLI arguments and environment variable handling using clap. Each group is
//! flattened into the command line by the binary.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::error::{EnvelopeError, Result};
use crate::piv::{pin, SelectionCriteria};
use crate::vault_api::VaultClientConfig;

/// Vault client connection settings
#[derive(Args, Debug, Clone)]
pub struct VaultArgs {
    /// Vault API endpoint
    #[arg(long, global = true, env = "VAULT_ADDR", default_value = "http://127.0.0.1:8200")]
    pub vault_endpoint: String,

    /// Minimum time to wait before retrying when a 5xx error occurs
    #[arg(long, global = true, default_value = "1000")]
    pub vault_min_retry_wait_ms: u64,

    /// Maximum time to wait before retrying when a 5xx error occurs
    #[arg(long, global = true, default_value = "1500")]
    pub vault_max_retry_wait_ms: u64,

    /// Maximum number of retries when a 5xx error occurs. 0 disables retrying
    #[arg(long, global = true, default_value = "2")]
    pub vault_max_retries: u32,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value = "60")]
    pub vault_timeout_secs: u64,
}

impl VaultArgs {
    pub fn client_config(&self) -> VaultClientConfig {
        VaultClientConfig {
            address: self.vault_endpoint.clone(),
            timeout_secs: self.vault_timeout_secs,
            min_retry_wait_ms: self.vault_min_retry_wait_ms,
            max_retry_wait_ms: self.vault_max_retry_wait_ms,
            max_retries: self.vault_max_retries,
        }
    }
}

/// PIV device selection
#[derive(Args, Clone)]
pub struct TokenArgs {
    /// Serial number of the PIV device to use. 0 selects automatically
    #[arg(long, global = true, default_value = "0")]
    pub serial: u32,

    /// Never auto-select the PIV device with this serial (repeatable)
    #[arg(long = "avoid-serial", global = true)]
    pub avoid_serials: Vec<u32>,

    /// PIN required to use the PIV device's private key for decryption
    #[arg(
        long,
        global = true,
        env = "YUBIKEY_PIN",
        hide_env_values = true,
        hide_default_value = true,
        default_value = "123456"
    )]
    pub pin: String,

    /// Prompt for the PIN instead of using --pin / YUBIKEY_PIN
    #[arg(long, global = true)]
    pub ask_pin: bool,
}

impl fmt::Debug for TokenArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenArgs")
            .field("serial", &self.serial)
            .field("avoid_serials", &self.avoid_serials)
            .field("pin", &"[REDACTED]")
            .field("ask_pin", &self.ask_pin)
            .finish()
    }
}

impl TokenArgs {
    /// Serial requirement and exclusions, without a PIN
    pub fn selection(&self, verbose: bool) -> SelectionCriteria {
        self.avoid_serials
            .iter()
            .fold(SelectionCriteria::new(), |criteria, &serial| criteria.exclude(serial))
            .require_serial(self.serial)
            .verbose(verbose)
    }

    /// Selection criteria carrying the PIN, prompting for it when requested
    pub fn authenticated(&self, verbose: bool) -> Result<SelectionCriteria> {
        let value = if self.ask_pin {
            rpassword::prompt_password("PIV PIN: ")?
        } else {
            self.pin.clone()
        };

        if value.is_empty() {
            return Err(EnvelopeError::Config("PIN must not be empty".into()));
        }

        Ok(self.selection(verbose).with_pin(pin(value)))
    }
}

/// Scoped token requested by `login`
#[derive(Args, Debug, Clone)]
pub struct LoginArgs {
    /// Optional role for the acquired token
    #[arg(long)]
    pub token_role: Option<String>,

    /// Optional policies for the acquired token (repeatable)
    #[arg(long = "token-policy")]
    pub token_policies: Vec<String>,

    /// Path to write the acquired token
    #[arg(long, default_value_os_t = default_token_path())]
    pub token_path: PathBuf,

    /// TTL for the acquired token in seconds
    #[arg(long, default_value = "3600")]
    pub token_ttl_secs: u64,
}

impl LoginArgs {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// `~/.vault-token`, or `./.vault-token` when no home directory resolves
pub fn default_token_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".vault-token"))
        .unwrap_or_else(|| PathBuf::from(".vault-token"))
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Diagnostics output
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log debug details, including per-device selection decisions
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}
