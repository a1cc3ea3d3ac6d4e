use std::path::PathBuf;
use std::time::Duration;

use action_flow::{clamp_delay_secs, DriverOptions, FailureStrategy, DEFAULT_DELAY_SECS};
use bai_protocol::RetentionPolicy;
use bai_session::ProtocolDescriptor;
use extensions_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const ENV_STATE_PATH: &str = "BAI_STATE_PATH";
pub const ENV_DELAY_SEC: &str = "BAI_DELAY_SEC";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// JSON document holding session and durable state
    pub state_path: PathBuf,
    /// Pause between executed steps, seconds
    pub delay_sec: f64,
    /// Tab the bridge is attached to; payloads naming another tab are flagged
    pub current_tab: Option<String>,
    pub failure_strategy: FailureStrategy,
    pub bridge: BridgeConfig,
    pub retention: RetentionPolicy,
    pub protocol: ProtocolDescriptor,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("./baibridge-state/state.json"),
            delay_sec: DEFAULT_DELAY_SECS,
            current_tab: None,
            failure_strategy: FailureStrategy::Continue,
            bridge: BridgeConfig::default(),
            retention: RetentionPolicy::default(),
            protocol: ProtocolDescriptor::default(),
        }
    }
}

impl Config {
    /// Clamp values a hand-edited file may have pushed out of range.
    pub fn normalized(mut self) -> Self {
        self.delay_sec = clamp_delay_secs(self.delay_sec);
        if self.retention.max_entries == 0 {
            warn!("retention.max_entries of 0 would disable dedup; using default");
            self.retention.max_entries = RetentionPolicy::default().max_entries;
        }
        self
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_STATE_PATH).filter(|v| !v.trim().is_empty()) {
            info!(path = %path, "state path overridden by {}", ENV_STATE_PATH);
            self.state_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(ENV_DELAY_SEC) {
            match raw.trim().parse::<f64>() {
                Ok(secs) => self.delay_sec = clamp_delay_secs(secs),
                Err(_) => warn!(value = %raw, "ignoring non-numeric {}", ENV_DELAY_SEC),
            }
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(clamp_delay_secs(self.delay_sec))
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions::default()
            .with_delay_secs(self.delay_sec)
            .with_highlight_settle(self.bridge.highlight_settle())
            .with_failure_strategy(self.failure_strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("delay_sec: 42\ncurrent_tab: \"7\"\n").unwrap();
        let config = config.normalized();
        assert_eq!(config.delay_sec, 10.0);
        assert_eq!(config.current_tab.as_deref(), Some("7"));
        assert_eq!(config.retention, RetentionPolicy::default());
        assert_eq!(config.protocol.ack_state, "extension_acknowledged");
    }

    #[test]
    fn env_overrides_apply_and_clamp() {
        let mut config = Config::default();
        config.apply_overrides_from(|key| match key {
            ENV_STATE_PATH => Some("/tmp/bai/state.json".into()),
            ENV_DELAY_SEC => Some("0.04".into()),
            _ => None,
        });
        assert_eq!(config.state_path, PathBuf::from("/tmp/bai/state.json"));
        assert_eq!(config.delay_sec, 0.1);

        config.apply_overrides_from(|key| (key == ENV_DELAY_SEC).then(|| "fast".to_string()));
        assert_eq!(config.delay_sec, 0.1);
    }

    #[test]
    fn driver_options_follow_config() {
        let config = Config {
            delay_sec: 1.25,
            ..Config::default()
        };
        let options = config.driver_options();
        assert!((options.delay.as_secs_f64() - 1.3).abs() < 1e-6);
        assert_eq!(options.highlight_settle, Duration::from_millis(120));
    }
}
