//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use meterlab_core::{Environment, SourceRegistry};
use meterlab_scheduler::{Balancer, DEFAULT_EPSILON, TargetDistribution};

use crate::orchestrator::{AssignmentSettings, DEFAULT_LEASE_TTL_SECS, DEFAULT_MAX_ATTEMPTS};
use crate::retry::RetryPolicy;
use crate::source::SourceDbSettings;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SOURCE_DB_PORT: u16 = 3306;

/// Upper bound on `LEASE_TTL_SECS` (7 days).
pub const MAX_LEASE_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("registry: {0}")]
    Registry(String),
}

fn invalid(var: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    /// Absent when no source database is configured; clients then have no source.
    pub source_db: Option<SourceDbSettings>,
    pub lease_ttl_secs: i64,
    pub max_assign_attempts: u32,
    pub target: TargetDistribution,
    pub balancer_epsilon: f64,
    pub registry_path: Option<PathBuf>,
    pub lease_sweep: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Qa,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            database_url: None,
            source_db: None,
            lease_ttl_secs: DEFAULT_LEASE_TTL_SECS,
            max_assign_attempts: DEFAULT_MAX_ATTEMPTS,
            target: TargetDistribution::default(),
            balancer_epsilon: DEFAULT_EPSILON,
            registry_path: None,
            lease_sweep: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match get("APP_ENV") {
            Some(v) => v.parse().map_err(|e| invalid("APP_ENV", e))?,
            None => Environment::Qa,
        };

        let bind_addr: SocketAddr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e| invalid("BIND_ADDR", e))?;

        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            Some(v) => parse_bool(&v).ok_or_else(|| invalid("USE_PERSISTENT_STORES", "expected true or false"))?,
            None => false,
        };
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let source_db = match get("SOURCE_DB_HOST") {
            Some(host) => Some(SourceDbSettings {
                host,
                port: parse_or("SOURCE_DB_PORT", get("SOURCE_DB_PORT"), DEFAULT_SOURCE_DB_PORT)?,
                user: get("SOURCE_DB_USER").ok_or(ConfigError::Missing("SOURCE_DB_USER"))?,
                password: get("SOURCE_DB_PASSWORD").unwrap_or_default(),
            }),
            None => None,
        };

        let lease_ttl_secs: i64 = parse_or("LEASE_TTL_SECS", get("LEASE_TTL_SECS"), DEFAULT_LEASE_TTL_SECS)?;
        if !(1..=MAX_LEASE_TTL_SECS).contains(&lease_ttl_secs) {
            return Err(invalid(
                "LEASE_TTL_SECS",
                format!("must be between 1 and {MAX_LEASE_TTL_SECS}"),
            ));
        }

        let max_assign_attempts: u32 =
            parse_or("MAX_ASSIGN_ATTEMPTS", get("MAX_ASSIGN_ATTEMPTS"), DEFAULT_MAX_ATTEMPTS)?;
        if max_assign_attempts == 0 {
            return Err(invalid("MAX_ASSIGN_ATTEMPTS", "must be at least 1"));
        }

        let target = match get("TARGET_DISTRIBUTION") {
            Some(v) => v.parse().map_err(|e| invalid("TARGET_DISTRIBUTION", e))?,
            None => TargetDistribution::default(),
        };

        let balancer_epsilon: f64 = parse_or("BALANCER_EPSILON", get("BALANCER_EPSILON"), DEFAULT_EPSILON)?;
        if !(balancer_epsilon.is_finite() && balancer_epsilon > 0.0) {
            return Err(invalid("BALANCER_EPSILON", "must be a positive number"));
        }

        let lease_sweep = match get("LEASE_SWEEP_SECS") {
            Some(v) => {
                let secs: u64 = v.parse().map_err(|e| invalid("LEASE_SWEEP_SECS", e))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            environment,
            bind_addr,
            use_persistent_stores,
            database_url,
            source_db,
            lease_ttl_secs,
            max_assign_attempts,
            target,
            balancer_epsilon,
            registry_path: get("REGISTRY_PATH").map(PathBuf::from),
            lease_sweep,
        })
    }

    /// The registry file if one is configured, else the built-in catalog.
    pub fn load_registry(&self) -> Result<SourceRegistry, ConfigError> {
        match &self.registry_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Registry(format!("{}: {e}", path.display())))?;
                SourceRegistry::from_json(&raw).map_err(|e| ConfigError::Registry(e.to_string()))
            }
            None => Ok(SourceRegistry::builtin()),
        }
    }

    /// `lease_ttl_secs` is clamped to `1..=MAX_LEASE_TTL_SECS`; `from_lookup`
    /// already rejects values outside it.
    pub fn assignment_settings(&self) -> AssignmentSettings {
        let ttl_secs = self.lease_ttl_secs.clamp(1, MAX_LEASE_TTL_SECS);
        AssignmentSettings {
            balancer: Balancer::new(self.target, self.balancer_epsilon),
            lease_ttl: chrono::Duration::try_seconds(ttl_secs)
                .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_LEASE_TTL_SECS)),
            max_attempts: self.max_assign_attempts,
            read_retry: RetryPolicy::default(),
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match value {
        Some(v) => v.parse().map_err(|e| invalid(var, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterlab_core::UtilityType;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let c = config(&[]).unwrap();
        assert_eq!(c.environment, Environment::Qa);
        assert_eq!(c.bind_addr.port(), 8080);
        assert!(!c.use_persistent_stores);
        assert!(c.source_db.is_none());
        assert_eq!(c.lease_ttl_secs, 900);
        assert_eq!(c.max_assign_attempts, 8);
        assert_eq!(c.balancer_epsilon, 1e-4);
        assert_eq!(c.target.share(UtilityType::ColdWater), 0.6);
        assert!(c.lease_sweep.is_none());
    }

    #[test]
    fn reads_overrides() {
        let c = config(&[
            ("APP_ENV", "prod"),
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/meterlab"),
            ("SOURCE_DB_HOST", "db.internal"),
            ("SOURCE_DB_USER", "reader"),
            ("LEASE_TTL_SECS", "30"),
            ("TARGET_DISTRIBUTION", "cold_water=0.5,hot_water=0.2,electricity=0.3"),
            ("LEASE_SWEEP_SECS", "15"),
        ])
        .unwrap();

        assert_eq!(c.environment, Environment::Prod);
        assert_eq!(c.bind_addr.port(), 9000);
        let db = c.source_db.as_ref().unwrap();
        assert_eq!(db.port, 3306);
        assert_eq!(db.password, "");
        assert_eq!(c.assignment_settings().lease_ttl, chrono::Duration::seconds(30));
        assert_eq!(c.target.share(UtilityType::HotWater), 0.2);
        assert_eq!(c.lease_sweep, Some(Duration::from_secs(15)));
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        assert!(matches!(
            config(&[("USE_PERSISTENT_STORES", "1")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for (var, value) in [
            ("APP_ENV", "staging"),
            ("BIND_ADDR", "nowhere"),
            ("LEASE_TTL_SECS", "0"),
            ("MAX_ASSIGN_ATTEMPTS", "-1"),
            ("TARGET_DISTRIBUTION", "cold_water=0.9,electricity=0.3"),
            ("BALANCER_EPSILON", "0"),
            ("USE_PERSISTENT_STORES", "maybe"),
        ] {
            assert!(
                matches!(config(&[(var, value)]), Err(ConfigError::Invalid { var: v, .. }) if v == var),
                "{var}={value} should be rejected"
            );
        }
    }

    #[test]
    fn lease_ttl_is_capped() {
        let week = MAX_LEASE_TTL_SECS.to_string();
        let c = config(&[("LEASE_TTL_SECS", week.as_str())]).unwrap();
        assert_eq!(c.assignment_settings().lease_ttl, chrono::Duration::days(7));

        for value in ["604801", "10000000000000", "100000000000000000"] {
            assert!(
                matches!(
                    config(&[("LEASE_TTL_SECS", value)]),
                    Err(ConfigError::Invalid { var: "LEASE_TTL_SECS", .. })
                ),
                "LEASE_TTL_SECS={value} should be rejected"
            );
        }

        // Fields are public; an out-of-range value set directly still yields a usable ttl.
        let direct = AppConfig {
            lease_ttl_secs: i64::MAX,
            ..AppConfig::default()
        };
        assert_eq!(direct.assignment_settings().lease_ttl, chrono::Duration::days(7));
    }

    #[test]
    fn missing_registry_file_is_reported() {
        let c = config(&[("REGISTRY_PATH", "/nonexistent/registry.json")]).unwrap();
        assert!(matches!(c.load_registry(), Err(ConfigError::Registry(_))));
        assert!(!config(&[]).unwrap().load_registry().unwrap().all().is_empty());
    }
}
