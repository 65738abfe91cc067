//! Network configuration read once from the environment at startup

use std::sync::LazyLock;
use std::time::Duration;

/// Total download timeout env var (integer seconds)
const ENV_TIMEOUT: &str = "DATAFINANCE_NETWORK_TIMEOUT";
/// Maximum retry attempts env var
const ENV_MAX_RETRIES: &str = "DATAFINANCE_NETWORK_MAX_RETRIES";
/// Backoff multiplier env var (float)
const ENV_BACKOFF: &str = "DATAFINANCE_NETWORK_RETRY_BACKOFF";

/// Network tunables. Built once via [`net_config`]; later env changes are
/// ignored.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Total deadline for a single file download
    pub total_timeout: Duration,
    /// Retry attempts after the first failure
    pub max_retries: u32,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

impl NetConfig {
    fn from_env() -> Self {
        let total_timeout = Duration::from_secs(parse_env(ENV_TIMEOUT, 900u64));
        let max_retries = parse_env(ENV_MAX_RETRIES, 5u32);
        let backoff_multiplier = parse_env(ENV_BACKOFF, 2.0f64);
        Self {
            total_timeout,
            max_retries,
            backoff_multiplier,
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(900),
            max_retries: 5,
            backoff_multiplier: 2.0,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("Ignoring unparsable {name}={raw:?}, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Process-wide network configuration snapshot.
pub fn net_config() -> &'static NetConfig {
    static CONFIG: LazyLock<NetConfig> = LazyLock::new(NetConfig::from_env);
    &CONFIG
}
