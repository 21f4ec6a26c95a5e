//! Worker configuration.
//!
//! Read once from the environment at startup and passed by reference into
//! every component; nothing mutates it afterwards.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use warmpool_platform::TemplateVersion;
use warmpool_reconcile::{PoolLimits, DEFAULT_BATCH_SIZE, DEFAULT_CHECK_INTERVAL, DEFAULT_POOL_SIZE};

use crate::pool::DeploySettings;

#[derive(Clone)]
pub struct Config {
    /// Platform API credential. Never logged.
    pub api_key: String,
    pub api_url: String,
    /// Pool label; only instances carrying it are managed.
    pub pool_name: String,
    pub pool_size: usize,
    pub batch_size: usize,
    pub check_interval: Duration,
    pub template_dir: PathBuf,
    /// Overrides the content hash of `template_dir`.
    pub template_version: Option<TemplateVersion>,
    pub deploy_timeout: Duration,
    pub health_poll_interval: Duration,
    pub log_level: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("pool_name", &self.pool_name)
            .field("pool_size", &self.pool_size)
            .field("batch_size", &self.batch_size)
            .field("check_interval", &self.check_interval)
            .field("template_dir", &self.template_dir)
            .field("template_version", &self.template_version)
            .field("deploy_timeout", &self.deploy_timeout)
            .field("health_poll_interval", &self.health_poll_interval)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(api_key) = var("PLATFORM_API_KEY") else {
            bail!("PLATFORM_API_KEY is required");
        };
        let Some(template_dir) = var("TEMPLATE_DIR") else {
            bail!("TEMPLATE_DIR is required");
        };

        let api_url = var("PLATFORM_API_URL").unwrap_or_else(|| "http://127.0.0.1:5000".to_string());
        let pool_name = var("POOL_NAME").unwrap_or_else(|| "editor".to_string());

        let pool_size = parse_or(&var, "POOL_SIZE", DEFAULT_POOL_SIZE)?;
        let batch_size = parse_or(&var, "BATCH_SIZE", DEFAULT_BATCH_SIZE)?;

        let check_interval_secs =
            parse_or(&var, "CHECK_INTERVAL_SECS", DEFAULT_CHECK_INTERVAL.as_secs())?;
        if check_interval_secs == 0 {
            bail!("CHECK_INTERVAL_SECS must be greater than zero");
        }

        let deploy_timeout_secs = parse_or(&var, "DEPLOY_TIMEOUT_SECS", 600u64)?;
        if deploy_timeout_secs == 0 {
            bail!("DEPLOY_TIMEOUT_SECS must be greater than zero");
        }
        let health_poll_interval_secs = parse_or(&var, "HEALTH_POLL_INTERVAL_SECS", 5u64)?;
        if health_poll_interval_secs == 0 {
            bail!("HEALTH_POLL_INTERVAL_SECS must be greater than zero");
        }

        let template_version = var("TEMPLATE_VERSION").map(TemplateVersion::new);
        let log_level = var("POOL_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            api_key,
            api_url,
            pool_name,
            pool_size,
            batch_size,
            check_interval: Duration::from_secs(check_interval_secs),
            template_dir: PathBuf::from(template_dir),
            template_version,
            deploy_timeout: Duration::from_secs(deploy_timeout_secs),
            health_poll_interval: Duration::from_secs(health_poll_interval_secs),
            log_level,
        })
    }

    pub fn limits(&self) -> PoolLimits {
        PoolLimits {
            pool_size: self.pool_size,
            batch_size: self.batch_size,
        }
    }

    pub fn deploy_settings(&self) -> DeploySettings {
        DeploySettings {
            health_poll_interval: self.health_poll_interval,
            deploy_timeout: self.deploy_timeout,
        }
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::from_lookup(lookup(&[("PLATFORM_API_KEY", "k"), ("TEMPLATE_DIR", "/srv/template")]))
                .unwrap();

        assert_eq!(config.pool_size, 5);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.pool_name, "editor");
        assert_eq!(config.template_dir, PathBuf::from("/srv/template"));
        assert!(config.template_version.is_none());
        assert_eq!(config.limits(), PoolLimits { pool_size: 5, batch_size: 2 });
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PLATFORM_API_KEY", "k"),
            ("TEMPLATE_DIR", "/srv/template"),
            ("POOL_SIZE", "10"),
            ("BATCH_SIZE", " 3 "),
            ("CHECK_INTERVAL_SECS", "15"),
            ("TEMPLATE_VERSION", "release-7"),
            ("HEALTH_POLL_INTERVAL_SECS", "1"),
        ]))
        .unwrap();

        assert_eq!(config.pool_size, 10);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.check_interval, Duration::from_secs(15));
        assert_eq!(config.template_version, Some(TemplateVersion::new("release-7")));
        assert_eq!(config.deploy_settings().health_poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_api_key() {
        let err = Config::from_lookup(lookup(&[("TEMPLATE_DIR", "/srv/template")])).unwrap_err();
        assert!(err.to_string().contains("PLATFORM_API_KEY"));
    }

    #[test]
    fn test_missing_template_dir() {
        let err = Config::from_lookup(lookup(&[("PLATFORM_API_KEY", "k")])).unwrap_err();
        assert!(err.to_string().contains("TEMPLATE_DIR"));
    }

    #[rstest]
    #[case("POOL_SIZE", "ten")]
    #[case("BATCH_SIZE", "two")]
    #[case("BATCH_SIZE", "-1")]
    #[case("CHECK_INTERVAL_SECS", "1m")]
    #[case("DEPLOY_TIMEOUT_SECS", "soon")]
    fn test_invalid_number(#[case] key: &str, #[case] value: &str) {
        let err = Config::from_lookup(lookup(&[
            ("PLATFORM_API_KEY", "k"),
            ("TEMPLATE_DIR", "/srv/template"),
            (key, value),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(key));
    }

    #[rstest]
    #[case("CHECK_INTERVAL_SECS")]
    #[case("DEPLOY_TIMEOUT_SECS")]
    #[case("HEALTH_POLL_INTERVAL_SECS")]
    fn test_zero_duration_rejected(#[case] key: &str) {
        let err = Config::from_lookup(lookup(&[
            ("PLATFORM_API_KEY", "k"),
            ("TEMPLATE_DIR", "/srv/template"),
            (key, "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(key));
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config::from_lookup(lookup(&[
            ("PLATFORM_API_KEY", "very-secret"),
            ("TEMPLATE_DIR", "/srv/template"),
        ]))
        .unwrap();
        assert!(!format!("{config:?}").contains("very-secret"));
    }
}
