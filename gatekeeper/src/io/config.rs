//! Gatekeeper configuration stored in `gatekeeper.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::backoff::RetryPolicy;
use crate::core::limits::RateLimiterConfig;
use crate::core::policy::AbortPolicy;
use crate::core::types::ToolKind;
use crate::driver::DriverSettings;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "gatekeeper.toml";

/// Gatekeeper configuration (TOML).
///
/// Meant to be edited by hand. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_requests_per_window: usize,
    pub max_cost_per_window: u64,
    pub max_concurrent: usize,
    pub window_secs: u64,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub expiry_buffer_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = RateLimiterConfig::default();
        Self {
            max_requests_per_window: limits.max_requests_per_window,
            max_cost_per_window: limits.max_cost_per_window,
            max_concurrent: limits.max_concurrent,
            window_secs: limits.window.as_secs(),
            min_wait_ms: limits.min_wait.as_millis() as u64,
            max_wait_ms: limits.max_wait.as_millis() as u64,
            expiry_buffer_ms: limits.expiry_buffer.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
    /// Wall-clock limit for one attempt, admission wait included.
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_jitter_ms: retry.max_jitter.as_millis() as u64,
            attempt_timeout_secs: 10 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    pub time_budget_secs: u64,
    /// Turn by which at least one `early_stall_kind` tool must have run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_stall_turn: Option<u32>,
    pub early_stall_kind: ToolKind,
    /// Turn by which `delegation_min_count` `delegation_kind` tools must have run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation_turn: Option<u32>,
    pub delegation_kind: ToolKind,
    pub delegation_min_count: u32,
    /// Elapsed-time warnings, in seconds.
    pub soft_checkpoint_secs: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    pub recent_tool_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            time_budget_secs: 10 * 60,
            early_stall_turn: Some(5),
            early_stall_kind: ToolKind::Fetch,
            delegation_turn: Some(10),
            delegation_kind: ToolKind::Delegate,
            delegation_min_count: 1,
            soft_checkpoint_secs: vec![5 * 60, 8 * 60],
            max_turns: Some(20),
            recent_tool_limit: 10,
        }
    }
}

impl GatekeeperConfig {
    pub fn rate_limits(&self) -> RateLimiterConfig {
        let limits = &self.limits;
        RateLimiterConfig {
            max_requests_per_window: limits.max_requests_per_window,
            max_cost_per_window: limits.max_cost_per_window,
            max_concurrent: limits.max_concurrent,
            window: Duration::from_secs(limits.window_secs),
            min_wait: Duration::from_millis(limits.min_wait_ms),
            max_wait: Duration::from_millis(limits.max_wait_ms),
            expiry_buffer: Duration::from_millis(limits.expiry_buffer_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_jitter: Duration::from_millis(self.retry.max_jitter_ms),
        }
    }

    pub fn abort_policy(&self) -> AbortPolicy {
        let monitor = &self.monitor;
        let mut policy = AbortPolicy::new(Duration::from_secs(monitor.time_budget_secs))
            .with_soft_checkpoints(
                monitor
                    .soft_checkpoint_secs
                    .iter()
                    .map(|secs| Duration::from_secs(*secs))
                    .collect(),
            );
        if let Some(turn) = monitor.early_stall_turn {
            policy = policy.with_early_stall(turn, monitor.early_stall_kind);
        }
        if let Some(turn) = monitor.delegation_turn {
            policy =
                policy.with_delegation(turn, monitor.delegation_kind, monitor.delegation_min_count);
        }
        if let Some(max_turns) = monitor.max_turns {
            policy = policy.with_max_turns(max_turns);
        }
        policy.recent_tool_limit = monitor.recent_tool_limit;
        policy
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            retry: self.retry_policy(),
            attempt_timeout: Duration::from_secs(self.retry.attempt_timeout_secs),
            policy: self.abort_policy(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limits().validate()?;
        self.driver_settings().validate()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GatekeeperConfig::default()`.
pub fn load_config(path: &Path) -> Result<GatekeeperConfig> {
    if !path.exists() {
        let cfg = GatekeeperConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GatekeeperConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GatekeeperConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
