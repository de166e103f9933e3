use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub database_url: String,
    pub static_root: Option<PathBuf>,
    pub worker_slots: usize,
    pub job_timeout_seconds: u64,
    pub result_ttl_seconds: u64,
    pub eviction_interval_seconds: u64,
    pub max_retained_jobs: usize,
    pub pregeneration_enabled: bool,
    pub pregeneration_interval_seconds: u64,
    pub pregeneration_window_days: i64,
    pub rolling_tolerance_seconds: i64,
    pub cache_bucket_seconds: i64,
    pub tier_raw_max_days: f64,
    pub tier_mid_max_days: f64,
}

impl GraphConfig {
    pub fn from_env(cli_static_root: Option<PathBuf>) -> Result<Self> {
        let database_url = std::env::var("GRAPH_DATABASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("GRAPH_DATABASE_URL must be set to the sensor store connection string")?;

        let static_root = cli_static_root.or_else(|| env_optional_path("GRAPH_STATIC_ROOT"));

        let worker_slots =
            env_u64("GRAPH_WORKER_SLOTS", default_worker_slots() as u64).clamp(1, 32) as usize;
        let job_timeout_seconds = env_u64("GRAPH_JOB_TIMEOUT_SECONDS", 1200).clamp(5, 7200);
        let result_ttl_seconds = env_u64("GRAPH_RESULT_TTL_SECONDS", 1800).clamp(10, 24 * 3600);
        let eviction_interval_seconds =
            env_u64("GRAPH_EVICTION_INTERVAL_SECONDS", 60).clamp(5, 3600);
        let max_retained_jobs = env_u64("GRAPH_MAX_RETAINED_JOBS", 200).clamp(8, 10_000) as usize;

        let pregeneration_enabled = env_bool("GRAPH_PREGENERATION_ENABLED", true);
        let pregeneration_interval_seconds =
            env_u64("GRAPH_PREGENERATION_INTERVAL_SECONDS", 1500).clamp(60, 24 * 3600);
        let pregeneration_window_days =
            env_u64("GRAPH_PREGENERATION_WINDOW_DAYS", 7).clamp(1, 365) as i64;

        let rolling_tolerance_seconds =
            env_u64("GRAPH_ROLLING_TOLERANCE_SECONDS", 600).clamp(1, 24 * 3600) as i64;
        let cache_bucket_seconds =
            env_u64("GRAPH_CACHE_BUCKET_SECONDS", 600).clamp(1, 24 * 3600) as i64;

        let tier_raw_max_days = env_f64("GRAPH_TIER_RAW_MAX_DAYS", 14.0);
        let tier_mid_max_days = env_f64("GRAPH_TIER_MID_MAX_DAYS", 90.0);

        let config = Self {
            database_url,
            static_root,
            worker_slots,
            job_timeout_seconds,
            result_ttl_seconds,
            eviction_interval_seconds,
            max_retained_jobs,
            pregeneration_enabled,
            pregeneration_interval_seconds,
            pregeneration_window_days,
            rolling_tolerance_seconds,
            cache_bucket_seconds,
            tier_raw_max_days,
            tier_mid_max_days,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tier_raw_max_days <= 0.0 {
            anyhow::bail!("GRAPH_TIER_RAW_MAX_DAYS must be positive");
        }
        if self.tier_mid_max_days < self.tier_raw_max_days {
            anyhow::bail!(
                "GRAPH_TIER_MID_MAX_DAYS ({}) must not be below GRAPH_TIER_RAW_MAX_DAYS ({})",
                self.tier_mid_max_days,
                self.tier_raw_max_days
            );
        }
        if self.pregeneration_interval_seconds >= self.result_ttl_seconds {
            tracing::warn!(
                interval = self.pregeneration_interval_seconds,
                ttl = self.result_ttl_seconds,
                "pre-generation interval is not shorter than the result TTL; cached defaults may lapse between refreshes"
            );
        }
        Ok(())
    }
}

/// Half the CPUs, clamped so constrained deployments keep some parallelism
/// and large hosts do not starve the request path.
fn default_worker_slots() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|value| value.get())
        .unwrap_or(2);
    (cpus / 2).clamp(2, 10)
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key)
        .ok()
        .map(|value| value.trim().to_lowercase())
    {
        Some(value) if value == "1" || value == "true" || value == "yes" => true,
        Some(value) if value == "0" || value == "false" || value == "no" => false,
        _ => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

fn env_optional_path(key: &str) -> Option<PathBuf> {
    env_optional_string(key).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> GraphConfig {
        GraphConfig {
            database_url: "postgresql://postgres@localhost/sensors".to_string(),
            static_root: None,
            worker_slots: 2,
            job_timeout_seconds: 1200,
            result_ttl_seconds: 1800,
            eviction_interval_seconds: 60,
            max_retained_jobs: 200,
            pregeneration_enabled: false,
            pregeneration_interval_seconds: 1500,
            pregeneration_window_days: 7,
            rolling_tolerance_seconds: 600,
            cache_bucket_seconds: 600,
            tier_raw_max_days: 14.0,
            tier_mid_max_days: 90.0,
        }
    }

    #[test]
    fn accepts_default_tunables() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_tier_breakpoints() {
        let mut config = minimal_config();
        config.tier_raw_max_days = 90.0;
        config.tier_mid_max_days = 14.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn worker_default_keeps_minimum_parallelism() {
        let slots = default_worker_slots();
        assert!((2..=10).contains(&slots));
    }
}
