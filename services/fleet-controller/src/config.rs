use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use seedfleet_reconcile::planner::OrdinalPolicy;
use seedfleet_reconcile::{BackoffPolicy, ControllerOptions, ReconcilerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    pub resync_interval: Duration,
    pub pass_timeout: Duration,
    pub progress_requeue: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub status_write_attempts: u32,
    pub min_ready: Duration,
    pub ordinal_policy: OrdinalPolicy,
    pub manifest_dir: Option<PathBuf>,
    /// How often the simulated replicas advance.
    pub simulation_tick: Duration,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |name: &str, default: u64| -> Result<Duration> {
            Ok(Duration::from_secs(parse_or(&lookup, name, default)?))
        };
        let millis = |name: &str, default: u64| -> Result<Duration> {
            Ok(Duration::from_millis(parse_or(&lookup, name, default)?))
        };

        let workers: usize = parse_or(&lookup, "SEEDFLEET_WORKERS", 4)?;
        if workers == 0 {
            anyhow::bail!("SEEDFLEET_WORKERS must be at least 1");
        }

        let ordinal_policy = match lookup("SEEDFLEET_ORDINAL_POLICY") {
            Some(v) => v
                .parse()
                .map_err(|e: String| anyhow::anyhow!("invalid SEEDFLEET_ORDINAL_POLICY: {e}"))?,
            None => OrdinalPolicy::default(),
        };

        let backoff_base = millis("SEEDFLEET_BACKOFF_BASE_MS", 1_000)?;
        let backoff_max = secs("SEEDFLEET_BACKOFF_MAX_SECS", 300)?;
        if backoff_base > backoff_max {
            anyhow::bail!("backoff base {backoff_base:?} exceeds ceiling {backoff_max:?}");
        }

        Ok(Self {
            workers,
            resync_interval: secs("SEEDFLEET_RESYNC_SECS", 30)?,
            pass_timeout: secs("SEEDFLEET_PASS_TIMEOUT_SECS", 60)?,
            progress_requeue: millis("SEEDFLEET_PROGRESS_REQUEUE_MS", 5_000)?,
            backoff_base,
            backoff_max,
            status_write_attempts: parse_or(&lookup, "SEEDFLEET_STATUS_WRITE_ATTEMPTS", 5)?,
            min_ready: secs("SEEDFLEET_MIN_READY_SECS", 0)?,
            ordinal_policy,
            manifest_dir: lookup("SEEDFLEET_MANIFEST_DIR").map(PathBuf::from),
            simulation_tick: millis("SEEDFLEET_SIMULATION_TICK_MS", 2_000)?,
            log_level: lookup("SEEDFLEET_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            ordinal_policy: self.ordinal_policy,
            min_ready: self.min_ready,
            backoff: BackoffPolicy {
                base: self.backoff_base,
                max: self.backoff_max,
                ..BackoffPolicy::default()
            },
            progress_requeue: self.progress_requeue,
            status_write_attempts: self.status_write_attempts,
        }
    }

    pub fn controller(&self) -> ControllerOptions {
        ControllerOptions {
            workers: self.workers,
            resync_interval: self.resync_interval,
            pass_timeout: self.pass_timeout,
            ..ControllerOptions::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("invalid {name}: {v:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.resync_interval, Duration::from_secs(30));
        assert_eq!(config.ordinal_policy, OrdinalPolicy::OrderedReady);
        assert_eq!(config.manifest_dir, None);
        assert_eq!(config.log_level, "info");

        let reconciler = config.reconciler();
        assert_eq!(reconciler.backoff.base, Duration::from_secs(1));
        assert_eq!(reconciler.backoff.max, Duration::from_secs(300));
        assert_eq!(reconciler.status_write_attempts, 5);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SEEDFLEET_WORKERS", "8"),
            ("SEEDFLEET_MIN_READY_SECS", "15"),
            ("SEEDFLEET_ORDINAL_POLICY", "Parallel"),
            ("SEEDFLEET_MANIFEST_DIR", "/etc/seedfleet"),
        ])
        .unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.min_ready, Duration::from_secs(15));
        assert_eq!(config.ordinal_policy, OrdinalPolicy::Parallel);
        assert_eq!(config.manifest_dir, Some(PathBuf::from("/etc/seedfleet")));
        assert_eq!(config.controller().workers, 8);
    }

    #[rstest]
    #[case("SEEDFLEET_WORKERS", "0")]
    #[case("SEEDFLEET_WORKERS", "many")]
    #[case("SEEDFLEET_ORDINAL_POLICY", "random")]
    #[case("SEEDFLEET_BACKOFF_BASE_MS", "600000")]
    #[case("SEEDFLEET_RESYNC_SECS", "-1")]
    fn test_rejects_invalid(#[case] name: &str, #[case] value: &str) {
        assert!(config(&[(name, value)]).is_err());
    }
}
