// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inkproof-config
//!
//! Environment-driven configuration for the compile-job service and hub,
//! with sane defaults so the daemon can start with zero configuration in
//! development.

use std::time::Duration;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was present but could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Name of the offending environment variable.
        var: &'static str,
        /// The value that failed to parse.
        value: String,
    },
}

/// Advisory-level configuration issues that do not prevent startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The configured sandbox timeout is unusually large.
    LargeSandboxTimeout {
        /// The configured timeout in seconds.
        secs: u64,
    },
    /// The configured status TTL is shorter than the recommended minimum.
    ShortStatusTtl {
        /// The configured TTL in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeSandboxTimeout { secs } => {
                write!(f, "sandbox timeout of {secs}s is unusually large")
            }
            ConfigWarning::ShortStatusTtl { secs } => {
                write!(f, "status TTL of {secs}s is below the recommended 1h minimum")
            }
        }
    }
}

/// Resource limits applied to a single sandboxed compile run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Memory ceiling in bytes.
    pub memory_bytes: u64,
    /// CPU share, expressed the way Docker's `--cpus`/`NanoCPUs` does
    /// (billionths of a core).
    pub nano_cpus: u64,
    /// Wall-clock timeout for the compile invocation.
    pub timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 750 * 1024 * 1024,
            nano_cpus: 500_000_000,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Bucket names used by the core (overridable for tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
    /// Bucket holding uploaded/inline compile source archives.
    pub sources: String,
    /// Bucket holding successfully produced PDFs.
    pub pdfs: String,
    /// Bucket holding user-uploaded assets used by the pre-flight fetch.
    pub assets: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            sources: "compile-sources".into(),
            pdfs: "compiled-pdfs".into(),
            assets: "assets".into(),
        }
    }
}

/// Top-level runtime configuration for the `inkproof-daemon` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Address the HTTP/websocket server binds to.
    pub bind: String,
    /// Queue key/name for the compile queue.
    pub queue_name: String,
    /// Container image reference used by the sandbox runner.
    pub sandbox_image: String,
    /// Resource limits applied to sandboxed runs.
    pub sandbox_limits: SandboxLimits,
    /// TTL for job status records.
    pub status_ttl: Duration,
    /// TTL for compile logs.
    pub logs_ttl: Duration,
    /// Artifact-store bucket names.
    pub buckets: BucketNames,
    /// Root directory for staged compile workspaces.
    pub workspace_root: std::path::PathBuf,
    /// Root directory backing the filesystem artifact store.
    pub artifacts_root: std::path::PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8089".into(),
            queue_name: "compile:queue".into(),
            sandbox_image: "texlive-compiler:latest".into(),
            sandbox_limits: SandboxLimits::default(),
            status_ttl: Duration::from_secs(3600),
            logs_ttl: Duration::from_secs(24 * 3600),
            buckets: BucketNames::default(),
            workspace_root: std::env::temp_dir().join("inkproof-workspaces"),
            artifacts_root: std::path::PathBuf::from(".inkproof/artifacts"),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// [`AppConfig::default`] for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a recognized variable is set
    /// to a value that cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = getenv("INKPROOF_BIND") {
            cfg.bind = v;
        }
        if let Some(v) = getenv("INKPROOF_QUEUE_NAME") {
            cfg.queue_name = v;
        }
        if let Some(v) = getenv("INKPROOF_SANDBOX_IMAGE") {
            cfg.sandbox_image = v;
        }
        if let Some(v) = getenv("INKPROOF_MEMORY_BYTES") {
            cfg.sandbox_limits.memory_bytes = parse_u64("INKPROOF_MEMORY_BYTES", &v)?;
        }
        if let Some(v) = getenv("INKPROOF_NANO_CPUS") {
            cfg.sandbox_limits.nano_cpus = parse_u64("INKPROOF_NANO_CPUS", &v)?;
        }
        if let Some(v) = getenv("INKPROOF_TIMEOUT_SECS") {
            cfg.sandbox_limits.timeout = Duration::from_secs(parse_u64("INKPROOF_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = getenv("INKPROOF_STATUS_TTL_SECS") {
            cfg.status_ttl = Duration::from_secs(parse_u64("INKPROOF_STATUS_TTL_SECS", &v)?);
        }
        if let Some(v) = getenv("INKPROOF_LOGS_TTL_SECS") {
            cfg.logs_ttl = Duration::from_secs(parse_u64("INKPROOF_LOGS_TTL_SECS", &v)?);
        }

        Ok(cfg)
    }

    /// Return advisory warnings about the current configuration. These never
    /// block startup.
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.sandbox_limits.timeout > Duration::from_secs(600) {
            warnings.push(ConfigWarning::LargeSandboxTimeout {
                secs: self.sandbox_limits.timeout.as_secs(),
            });
        }
        if self.status_ttl < Duration::from_secs(3600) {
            warnings.push(ConfigWarning::ShortStatusTtl {
                secs: self.status_ttl.as_secs(),
            });
        }
        warnings
    }
}

fn getenv(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_spec_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.sandbox_limits.memory_bytes, 750 * 1024 * 1024);
        assert_eq!(cfg.sandbox_limits.nano_cpus, 500_000_000);
        assert_eq!(cfg.sandbox_limits.timeout, Duration::from_secs(60));
        assert_eq!(cfg.status_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.logs_ttl, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn large_timeout_produces_warning() {
        let mut cfg = AppConfig::default();
        cfg.sandbox_limits.timeout = Duration::from_secs(3600);
        assert!(matches!(
            cfg.warnings().as_slice(),
            [ConfigWarning::LargeSandboxTimeout { .. }]
        ));
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(AppConfig::default().warnings().is_empty());
    }

    #[test]
    fn parse_u64_rejects_garbage() {
        let err = parse_u64("INKPROOF_TIMEOUT_SECS", "not-a-number").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
