//! shardscale.toml configuration parser.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{ScaleOn, TieBreak};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between control-loop passes.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Upper bound on streams processed concurrently within a pass.
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: usize,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    #[serde(default)]
    pub voting: VotingConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub metrics: MetricsWindowConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VotingConfig {
    #[serde(default)]
    pub tie_break: TieBreak,
}

/// Per-shard throughput limits used as the utilization denominator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    pub bytes_per_sec: f64,
    pub records_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsWindowConfig {
    pub window_secs: u64,
    pub period_secs: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
    pub icon_emoji: Option<String>,
}

/// An account whose streams are reached through an assumed role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub role_arn: String,
    #[serde(default = "default_role_session_name")]
    pub role_session_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub region: String,
    /// Key into `accounts`; `None` uses the default credential chain.
    pub account: Option<String>,
    pub min_shards: usize,
    pub max_shards: usize,
    pub scale_on: ScaleOn,
    #[serde(default)]
    pub shard_level_scale: bool,
    pub scaling: ScalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub up: ScaleUpConfig,
    pub down: ScaleDownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleUpConfig {
    pub threshold_pct: f64,
    pub rate: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleDownConfig {
    pub threshold_pct: f64,
    pub rate: usize,
    /// Shards that must never be chosen as the lower member of a merge.
    #[serde(default)]
    pub ignore_list: Vec<String>,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            timeout_secs: 600,
        }
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            bytes_per_sec: 2_097_152.0,
            records_per_sec: 2000.0,
        }
    }
}

impl Default for MetricsWindowConfig {
    fn default() -> Self {
        Self {
            window_secs: 1440,
            period_secs: 60,
        }
    }
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_max_concurrent_streams() -> usize {
    4
}

fn default_role_session_name() -> String {
    "shardscale".to_string()
}

impl ConvergenceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.streams.is_empty() {
            return Err(invalid("no streams configured"));
        }
        if self.max_concurrent_streams == 0 {
            return Err(invalid("max_concurrent_streams must be at least 1"));
        }
        if self.refresh_interval_secs == 0 {
            return Err(invalid("refresh_interval_secs must be at least 1"));
        }
        if self.metrics.window_secs == 0 || self.metrics.period_secs == 0 {
            return Err(invalid("metrics window and period must be non-zero"));
        }
        if self.capacity.bytes_per_sec <= 0.0 || self.capacity.records_per_sec <= 0.0 {
            return Err(invalid("per-shard capacity must be positive"));
        }
        if self.convergence.timeout_secs == 0 {
            return Err(invalid("convergence timeout_secs must be at least 1"));
        }
        if self.convergence.poll_interval_ms == 0 {
            return Err(invalid("convergence poll_interval_ms must be at least 1"));
        }

        let mut seen = HashSet::new();
        for stream in &self.streams {
            if !seen.insert((stream.region.as_str(), stream.name.as_str())) {
                return Err(invalid(format!(
                    "stream {} in {} is configured more than once",
                    stream.name, stream.region
                )));
            }
            if let Some(account) = &stream.account
                && !self.accounts.contains_key(account)
            {
                return Err(invalid(format!(
                    "stream {} references unknown account {account}",
                    stream.name
                )));
            }
            stream.validate()?;
        }

        Ok(())
    }
}

impl StreamConfig {
    fn validate(&self) -> ConfigResult<()> {
        let name = &self.name;
        if self.min_shards == 0 {
            return Err(invalid(format!("stream {name}: min_shards must be at least 1")));
        }
        if self.min_shards > self.max_shards {
            return Err(invalid(format!(
                "stream {name}: min_shards ({}) exceeds max_shards ({})",
                self.min_shards, self.max_shards
            )));
        }
        if self.scaling.up.rate == 0 || self.scaling.down.rate == 0 {
            return Err(invalid(format!("stream {name}: scaling rate must be at least 1")));
        }
        if self.scaling.up.threshold_pct < 0.0 || self.scaling.down.threshold_pct < 0.0 {
            return Err(invalid(format!("stream {name}: thresholds must be non-negative")));
        }
        if self.scaling.down.threshold_pct >= self.scaling.up.threshold_pct {
            return Err(invalid(format!(
                "stream {name}: down threshold ({}) must be below up threshold ({})",
                self.scaling.down.threshold_pct, self.scaling.up.threshold_pct
            )));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[[streams]]
name = "events"
region = "us-east-1"
min_shards = 1
max_shards = 8
scale_on = "ALL"

[streams.scaling.up]
threshold_pct = 75.0
rate = 1

[streams.scaling.down]
threshold_pct = 25.0
rate = 1
"#;

    #[test]
    fn test_parse_minimal_applies_defaults() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.refresh_interval_secs, 300);
        assert_eq!(config.max_concurrent_streams, 4);
        assert_eq!(config.metrics.window_secs, 1440);
        assert_eq!(config.capacity.bytes_per_sec, 2_097_152.0);
        assert_eq!(config.capacity.records_per_sec, 2000.0);
        assert_eq!(config.voting.tie_break, TieBreak::Conservative);
        assert_eq!(config.convergence.poll_interval(), Duration::from_secs(1));
        assert!(config.notifier.slack.is_none());

        let stream = &config.streams[0];
        assert_eq!(stream.scale_on, ScaleOn::All);
        assert!(!stream.shard_level_scale);
        assert!(stream.scaling.down.ignore_list.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r##"
refresh_interval_secs = 60
max_concurrent_streams = 2

[voting]
tie_break = "first_seen"

[notifier.slack]
webhook_url = "https://hooks.example.com/T000"
channel = "#ops"

[accounts.prod]
role_arn = "arn:aws:iam::123456789012:role/scaler"

[[streams]]
name = "clicks"
region = "eu-west-1"
account = "prod"
min_shards = 2
max_shards = 4
scale_on = "BOTH_PUTS"
shard_level_scale = true

[streams.scaling.up]
threshold_pct = 80.0
rate = 2

[streams.scaling.down]
threshold_pct = 10.0
rate = 1
ignore_list = ["shardId-000000000000"]
"##;
        let config = Config::from_toml_str(toml_str).unwrap();
        assert_eq!(config.voting.tie_break, TieBreak::FirstSeen);
        assert_eq!(config.accounts["prod"].role_session_name, "shardscale");
        assert_eq!(
            config.notifier.slack.as_ref().unwrap().channel.as_deref(),
            Some("#ops")
        );
        let stream = &config.streams[0];
        assert_eq!(stream.scale_on, ScaleOn::BothPuts);
        assert!(stream.shard_level_scale);
        assert_eq!(stream.scaling.down.ignore_list, vec!["shardId-000000000000"]);
    }

    #[test]
    fn test_rejects_min_above_max() {
        let toml_str = MINIMAL.replace("min_shards = 1", "min_shards = 9");
        let err = Config::from_toml_str(&toml_str).unwrap_err();
        assert!(err.to_string().contains("exceeds max_shards"));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let toml_str = MINIMAL.replace("threshold_pct = 25.0", "threshold_pct = 90.0");
        let err = Config::from_toml_str(&toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_rate() {
        let toml_str = MINIMAL.replacen("rate = 1", "rate = 0", 1);
        assert!(Config::from_toml_str(&toml_str).is_err());
    }

    #[test]
    fn test_rejects_zero_convergence_timeout() {
        let toml_str = format!("[convergence]\npoll_interval_ms = 500\ntimeout_secs = 0\n{MINIMAL}");
        let err = Config::from_toml_str(&toml_str).unwrap_err();
        assert!(err.to_string().contains("timeout_secs must be at least 1"));
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let toml_str = format!("[convergence]\npoll_interval_ms = 0\ntimeout_secs = 60\n{MINIMAL}");
        let err = Config::from_toml_str(&toml_str).unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms must be at least 1"));
    }

    #[test]
    fn test_rejects_unknown_account() {
        let toml_str = MINIMAL.replace(
            "region = \"us-east-1\"",
            "region = \"us-east-1\"\naccount = \"missing\"",
        );
        let err = Config::from_toml_str(&toml_str).unwrap_err();
        assert!(err.to_string().contains("unknown account missing"));
    }

    #[test]
    fn test_rejects_duplicate_stream() {
        let toml_str = format!("{MINIMAL}{}", MINIMAL.replace("[[streams]]", "\n[[streams]]"));
        let err = Config::from_toml_str(&toml_str).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_rejects_unknown_scale_on() {
        let toml_str = MINIMAL.replace("\"ALL\"", "\"SIDEWAYS\"");
        assert!(matches!(
            Config::from_toml_str(&toml_str),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.streams[0].name, "events");

        let missing = Config::from_file(Path::new("/nonexistent/shardscale.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config =
            Config::from_toml_str(include_str!("../../../shardscale.example.toml")).unwrap();
        assert_eq!(config.streams.len(), 2);
        assert!(config.notifier.slack.is_some());
        assert_eq!(config.accounts["prod"].role_session_name, "shardscale");
        let clicks = &config.streams[1];
        assert_eq!(clicks.account.as_deref(), Some("prod"));
        assert_eq!(clicks.scale_on, ScaleOn::BothPuts);
        assert!(clicks.shard_level_scale);
    }
}
