//! Environment-backed application configuration, loaded once at boot.

use anyhow::{bail, Context};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub log_level: String,

    pub database_url: String,
    pub database_pool_min: u32,
    pub database_pool_max: u32,
    pub database_ssl: bool,

    pub redis_url: String,
    pub redis_password: Option<String>,
    pub redis_tls: bool,

    pub entity_permissions: EntityPermissionsConfig,
    pub sapphire: SapphireConfig,
    pub signer: SignerConfig,
    pub admin_auth: AdminAuthConfig,

    pub transaction_queue_name: String,
    pub dlq_queue_name: String,
    pub max_retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub worker_concurrency: usize,

    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    pub enable_websockets: bool,
}

#[derive(Debug, Clone)]
pub struct EntityPermissionsConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SapphireConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub max_fee_ceiling: u64,
    pub rate_limit_per_minute: u32,
    /// Venue system contracts. Optional; a missing address disables the
    /// corresponding write path with a configuration error.
    pub token_factory_address: Option<String>,
    pub settlement_address: Option<String>,
    pub bridge_address: Option<String>,
}

/// Exactly one of the two signing secrets must be configured.
#[derive(Clone)]
pub enum SignerConfig {
    Mnemonic(String),
    PrivateKey(String),
}

impl std::fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never echo key material.
        match self {
            SignerConfig::Mnemonic(_) => write!(f, "SignerConfig::Mnemonic(***)"),
            SignerConfig::PrivateKey(_) => write!(f, "SignerConfig::PrivateKey(***)"),
        }
    }
}

/// Exactly one of the two admin credentials must be configured.
#[derive(Clone)]
pub enum AdminAuthConfig {
    ApiKey(String),
    JwtPublicKey(String),
}

impl std::fmt::Debug for AdminAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminAuthConfig::ApiKey(_) => write!(f, "AdminAuthConfig::ApiKey(***)"),
            AdminAuthConfig::JwtPublicKey(_) => write!(f, "AdminAuthConfig::JwtPublicKey(***)"),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}")),
        None => Ok(default),
    }
}

fn env_bool(name: &str) -> bool {
    matches!(
        env_var(name).as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let signer = match (
            env_var("OASIS_WALLET_MNEMONIC"),
            env_var("CONFIDENTIAL_SIGNER_PRIVATE_KEY"),
        ) {
            (Some(_), Some(_)) => {
                bail!("OASIS_WALLET_MNEMONIC and CONFIDENTIAL_SIGNER_PRIVATE_KEY are mutually exclusive")
            }
            (Some(mnemonic), None) => SignerConfig::Mnemonic(mnemonic),
            (None, Some(key)) => SignerConfig::PrivateKey(key),
            (None, None) => {
                bail!("one of OASIS_WALLET_MNEMONIC or CONFIDENTIAL_SIGNER_PRIVATE_KEY is required")
            }
        };

        let admin_auth = match (env_var("ADMIN_API_KEY"), env_var("ADMIN_JWT_PUBLIC_KEY")) {
            (Some(_), Some(_)) => {
                bail!("ADMIN_API_KEY and ADMIN_JWT_PUBLIC_KEY are mutually exclusive")
            }
            (Some(key), None) => AdminAuthConfig::ApiKey(key),
            (None, Some(pem)) => AdminAuthConfig::JwtPublicKey(pem),
            (None, None) => bail!("one of ADMIN_API_KEY or ADMIN_JWT_PUBLIC_KEY is required"),
        };

        Ok(Self {
            port: env_parse("PORT", 8080)?,
            log_level: env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            database_url: env_var("DATABASE_URL").context("DATABASE_URL is required")?,
            database_pool_min: env_parse("DATABASE_POOL_MIN", 2)?,
            database_pool_max: env_parse("DATABASE_POOL_MAX", 10)?,
            database_ssl: env_bool("DATABASE_SSL"),

            redis_url: env_var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            redis_password: env_var("REDIS_PASSWORD"),
            redis_tls: env_bool("REDIS_TLS"),

            entity_permissions: EntityPermissionsConfig {
                base_url: env_var("ENTITY_PERMISSIONS_BASE_URL")
                    .context("ENTITY_PERMISSIONS_BASE_URL is required")?,
                api_key: env_var("ENTITY_PERMISSIONS_API_KEY").unwrap_or_default(),
                timeout_ms: env_parse("ENTITY_PERMISSIONS_TIMEOUT_MS", 5_000)?,
            },

            sapphire: SapphireConfig {
                rpc_url: env_var("SAPPHIRE_RPC_URL").context("SAPPHIRE_RPC_URL is required")?,
                chain_id: env_parse("SAPPHIRE_CHAIN_ID", 23_294)?,
                max_fee_ceiling: env_parse("SAPPHIRE_MAX_FEE_CEILING", 100_000_000_000)?,
                rate_limit_per_minute: env_parse("SAPPHIRE_RATE_LIMIT_PER_MINUTE", 120)?,
                token_factory_address: env_var("SAPPHIRE_TOKEN_FACTORY_ADDRESS"),
                settlement_address: env_var("SAPPHIRE_SETTLEMENT_ADDRESS"),
                bridge_address: env_var("SAPPHIRE_BRIDGE_ADDRESS"),
            },

            signer,
            admin_auth,

            transaction_queue_name: env_var("TRANSACTION_QUEUE_NAME")
                .unwrap_or_else(|| "transactions".to_string()),
            dlq_queue_name: env_var("DLQ_QUEUE_NAME").unwrap_or_else(|| "dead-letter".to_string()),
            max_retry_attempts: env_parse("MAX_RETRY_ATTEMPTS", 5)?,
            retry_backoff_ms: env_parse("RETRY_BACKOFF_MS", 2_000)?,
            worker_concurrency: env_parse("WORKER_CONCURRENCY", 5)?,

            rate_limit_window_ms: env_parse("RATE_LIMIT_WINDOW_MS", 60_000)?,
            rate_limit_max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", 100)?,
            enable_websockets: env_bool("ENABLE_WEBSOCKETS"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_accepts_common_truthy_values() {
        std::env::set_var("TEST_FLAG_A", "true");
        std::env::set_var("TEST_FLAG_B", "0");
        assert!(env_bool("TEST_FLAG_A"));
        assert!(!env_bool("TEST_FLAG_B"));
        assert!(!env_bool("TEST_FLAG_MISSING"));
    }

    #[test]
    fn secrets_do_not_leak_through_debug() {
        let signer = SignerConfig::PrivateKey("0xdeadbeef".to_string());
        assert_eq!(format!("{signer:?}"), "SignerConfig::PrivateKey(***)");
        let admin = AdminAuthConfig::ApiKey("super-secret".to_string());
        assert!(!format!("{admin:?}").contains("super-secret"));
    }
}
