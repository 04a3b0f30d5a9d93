use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use crate::errors::{AppError, Result};
use crate::models::security::SecurityPolicy;

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub password_min_length: usize,
    pub session_timeout_seconds: u64,
    pub max_login_attempts: u32,
    pub require_2fa: bool,
    pub monitor_threshold: u32,
    pub block_threshold: u32,
    pub max_payload_bytes: usize,
    pub lockout_seconds: u64,
    /// 0 disables the background sweep
    pub session_sweep_interval_seconds: u64,
    pub audit_log_path: Option<PathBuf>,
    /// Hex AES-256 key; a process-local key is generated when unset
    pub encryption_key: Option<String>,
    /// Raw key for the audit hash chain
    pub audit_chain_key: Option<Vec<u8>>,
    /// Principals that may log in with the admin permission
    pub admin_principals: Vec<String>,
    /// Admin credential provisioned at startup, since admins cannot self-register
    pub admin_bootstrap_principal: Option<String>,
    pub admin_bootstrap_secret: Option<String>,
}

// Keys stay out of debug output
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("password_min_length", &self.password_min_length)
            .field("session_timeout_seconds", &self.session_timeout_seconds)
            .field("max_login_attempts", &self.max_login_attempts)
            .field("require_2fa", &self.require_2fa)
            .field("monitor_threshold", &self.monitor_threshold)
            .field("block_threshold", &self.block_threshold)
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("lockout_seconds", &self.lockout_seconds)
            .field("session_sweep_interval_seconds", &self.session_sweep_interval_seconds)
            .field("audit_log_path", &self.audit_log_path)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("audit_chain_key", &self.audit_chain_key.as_ref().map(|_| "<redacted>"))
            .field("admin_principals", &self.admin_principals)
            .field("admin_bootstrap_principal", &self.admin_bootstrap_principal)
            .field("admin_bootstrap_secret", &self.admin_bootstrap_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SecurityPolicy::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let encryption_key = var("ENCRYPTION_KEY").map(|k| k.trim().to_string());
        if let Some(key) = &encryption_key {
            if key.len() != 64 || hex::decode(key).is_err() {
                return Err(AppError::configuration("ENCRYPTION_KEY must be 64 hex characters"));
            }
        }

        let audit_chain_key = match var("AUDIT_CHAIN_KEY") {
            Some(key) => Some(
                hex::decode(key.trim())
                    .map_err(|_| AppError::configuration("AUDIT_CHAIN_KEY must be hex"))?,
            ),
            None => None,
        };

        let config = Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&var, "PORT", 8083)?,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            password_min_length: parse_or(&var, "PASSWORD_MIN_LENGTH", defaults.password_min_length)?,
            session_timeout_seconds: parse_or(&var, "SESSION_TIMEOUT_SECONDS", defaults.session_timeout_secs)?,
            max_login_attempts: parse_or(&var, "MAX_LOGIN_ATTEMPTS", defaults.max_login_attempts)?,
            require_2fa: parse_bool_or(&var, "REQUIRE_2FA", defaults.require_2fa)?,
            monitor_threshold: parse_or(&var, "MONITOR_THRESHOLD", defaults.monitor_threshold)?,
            block_threshold: parse_or(&var, "BLOCK_THRESHOLD", defaults.block_threshold)?,
            max_payload_bytes: parse_or(&var, "MAX_PAYLOAD_BYTES", defaults.max_payload_bytes)?,
            lockout_seconds: parse_or(&var, "LOCKOUT_SECONDS", defaults.lockout_secs)?,
            session_sweep_interval_seconds: parse_or(&var, "SESSION_SWEEP_INTERVAL_SECONDS", 300)?,
            audit_log_path: var("AUDIT_LOG_PATH").map(PathBuf::from),
            encryption_key,
            audit_chain_key,
            admin_principals: var("ADMIN_PRINCIPALS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            admin_bootstrap_principal: var("ADMIN_BOOTSTRAP_PRINCIPAL").map(|p| p.trim().to_string()),
            admin_bootstrap_secret: var("ADMIN_BOOTSTRAP_SECRET"),
        };

        match (&config.admin_bootstrap_principal, &config.admin_bootstrap_secret) {
            (Some(principal), Some(_)) if !config.admin_principals.contains(principal) => {
                return Err(AppError::configuration(
                    "ADMIN_BOOTSTRAP_PRINCIPAL must be listed in ADMIN_PRINCIPALS",
                ));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(AppError::configuration(
                    "ADMIN_BOOTSTRAP_PRINCIPAL and ADMIN_BOOTSTRAP_SECRET must be set together",
                ));
            }
            _ => {}
        }

        let problems = config.security_policy().problems();
        if !problems.is_empty() {
            return Err(AppError::configuration(problems.join("; ")));
        }
        Ok(config)
    }

    /// Initial policy snapshot described by this configuration
    pub fn security_policy(&self) -> SecurityPolicy {
        SecurityPolicy {
            password_min_length: self.password_min_length,
            session_timeout_secs: self.session_timeout_seconds,
            max_login_attempts: self.max_login_attempts,
            require_2fa: self.require_2fa,
            monitor_threshold: self.monitor_threshold,
            block_threshold: self.block_threshold,
            max_payload_bytes: self.max_payload_bytes,
            lockout_secs: self.lockout_seconds,
            admin_principals: self.admin_principals.clone(),
            ..SecurityPolicy::default()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    // Smart RUST_LOG construction for Axum and tracing
    pub fn rust_log(&self) -> String {
        let level = match self.log_level.to_lowercase().as_str() {
            level @ ("trace" | "debug" | "info" | "warn" | "error") => level.to_string(),
            _ => "info".to_string(), // fallback
        };
        format!(
            "{level},axum={level},tower_http={level},hyper=warn,veilguard_trust={level},audit=info",
            level = level
        )
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::configuration(format!("{} must be a valid number: {}", key, e))),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(var: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key).map(|v| v.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(AppError::configuration(format!("{} must be a boolean, got {}", key, v))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:8083");
        assert_eq!(config.session_sweep_interval_seconds, 300);
        assert!(config.audit_log_path.is_none());

        let mut policy = config.security_policy();
        policy.version = 0;
        assert_eq!(policy, SecurityPolicy::default());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "9000"),
            ("PASSWORD_MIN_LENGTH", "12"),
            ("REQUIRE_2FA", "true"),
            ("AUDIT_LOG_PATH", "/var/log/veilguard/audit.jsonl"),
            ("ADMIN_PRINCIPALS", "root, ops ,"),
        ])
        .unwrap();
        assert_eq!(config.admin_principals, vec!["root", "ops"]);
        assert_eq!(config.port, 9000);
        assert!(config.require_2fa);
        assert_eq!(config.security_policy().password_min_length, 12);
        assert_eq!(config.audit_log_path, Some(PathBuf::from("/var/log/veilguard/audit.jsonl")));
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(matches!(config(&[("PORT", "eighty")]), Err(AppError::ConfigurationError(_))));
        assert!(config(&[("REQUIRE_2FA", "maybe")]).is_err());
        assert!(config(&[("ENCRYPTION_KEY", "abcd")]).is_err());
        assert!(config(&[("AUDIT_CHAIN_KEY", "xyz")]).is_err());
        // Inconsistent thresholds
        assert!(config(&[("MONITOR_THRESHOLD", "80")]).is_err());
    }

    #[test]
    fn test_admin_bootstrap() {
        let cfg = config(&[
            ("ADMIN_PRINCIPALS", "root"),
            ("ADMIN_BOOTSTRAP_PRINCIPAL", "root"),
            ("ADMIN_BOOTSTRAP_SECRET", "bootstrap-secret"),
        ])
        .unwrap();
        assert_eq!(cfg.admin_bootstrap_principal.as_deref(), Some("root"));
        assert!(!format!("{:?}", cfg).contains("bootstrap-secret"));

        assert!(config(&[("ADMIN_BOOTSTRAP_PRINCIPAL", "root")]).is_err());
        assert!(config(&[
            ("ADMIN_BOOTSTRAP_PRINCIPAL", "mallory"),
            ("ADMIN_BOOTSTRAP_SECRET", "bootstrap-secret"),
        ])
        .is_err());
    }

    #[test]
    fn test_keys_are_redacted() {
        let key = "ab".repeat(32);
        let config = config(&[("ENCRYPTION_KEY", key.as_str())]).unwrap();
        assert!(!format!("{:?}", config).contains(&key));
    }

    #[test]
    fn test_rust_log_fallback() {
        let mut config = config(&[]).unwrap();
        config.log_level = "verbose".to_string();
        assert!(config.rust_log().starts_with("info,"));
    }
}
