//! Liveness/readiness checks for the transcoding subsystem's external
//! collaborators: the converter, the prober, and the cache directory.
//!
//! Grounded on the teacher's `HealthMonitor`/`HealthStatus`/`HealthCheck`
//! shape (`ServiceStatus`, per-check pass/warn/fail with a message), trimmed
//! of the whole-host `PerformanceMetrics` block (CPU/memory/network), which
//! belonged to the teacher's `sysinfo`-based monitoring and has no
//! counterpart here.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::TranscodeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: ServiceStatus,
    pub timestamp: u64,
    pub service: &'static str,
    pub version: &'static str,
    pub checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

pub struct HealthMonitor {
    converter_path: String,
    prober_path: String,
    cache_root: std::path::PathBuf,
}

impl HealthMonitor {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self {
            converter_path: config.converter_path.clone(),
            prober_path: config.prober_path.clone(),
            cache_root: config.cache_root.clone(),
        }
    }

    pub async fn check(&self) -> HealthStatus {
        let mut checks = HashMap::new();
        checks.insert("converter".to_string(), self.check_executable(&self.converter_path).await);
        checks.insert("prober".to_string(), self.check_executable(&self.prober_path).await);
        checks.insert("cache_directory".to_string(), self.check_cache_writable().await);

        let status = if checks.values().any(|c| c.status == CheckStatus::Fail) {
            ServiceStatus::Unhealthy
        } else if checks.values().any(|c| c.status == CheckStatus::Warn) {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Healthy
        };

        HealthStatus {
            status,
            timestamp: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
            service: "audiocache",
            version: env!("CARGO_PKG_VERSION"),
            checks,
        }
    }

    async fn check_executable(&self, path: &str) -> HealthCheck {
        match Command::new(path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => HealthCheck {
                status: CheckStatus::Pass,
                message: format!("{path} is available"),
            },
            _ => HealthCheck {
                status: CheckStatus::Warn,
                message: format!("{path} is not available; transcoding is disabled, originals are served as-is"),
            },
        }
    }

    async fn check_cache_writable(&self) -> HealthCheck {
        let probe_path = self.cache_root.join(".health_check");
        match tokio::fs::create_dir_all(&self.cache_root).await {
            Ok(()) => match tokio::fs::write(&probe_path, b"ok").await {
                Ok(()) => {
                    let _ = tokio::fs::remove_file(&probe_path).await;
                    HealthCheck {
                        status: CheckStatus::Pass,
                        message: "cache directory is writable".to_string(),
                    }
                }
                Err(err) => HealthCheck {
                    status: CheckStatus::Fail,
                    message: format!("cache directory is not writable: {err}"),
                },
            },
            Err(err) => HealthCheck {
                status: CheckStatus::Fail,
                message: format!("cache directory is not accessible: {err}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_converter_is_reported_as_a_warning_not_a_failure() {
        let monitor = HealthMonitor {
            converter_path: "definitely-not-a-real-binary".to_string(),
            prober_path: "definitely-not-a-real-binary".to_string(),
            cache_root: std::env::temp_dir().join("audiocache-health-test"),
        };
        let status = monitor.check().await;
        assert_eq!(status.status, ServiceStatus::Degraded);
        assert_eq!(status.checks["converter"].status, CheckStatus::Warn);
    }

    #[tokio::test]
    async fn writable_cache_directory_passes() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = HealthMonitor {
            converter_path: "definitely-not-a-real-binary".to_string(),
            prober_path: "definitely-not-a-real-binary".to_string(),
            cache_root: dir.path().to_path_buf(),
        };
        let status = monitor.check().await;
        assert_eq!(status.checks["cache_directory"].status, CheckStatus::Pass);
    }
}
