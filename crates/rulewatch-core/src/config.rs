use crate::error::{Result, RulewatchError};
use crate::metrics::DEFAULT_CAMPAIGN_ID;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// MetricsApiConfig
// ---------------------------------------------------------------------------

/// Upstream metrics proxy. With no `base_url`, synthesized metrics are used.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Per-subscriber event queue depth.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_campaigns")]
    pub campaigns: Vec<String>,
    #[serde(default)]
    pub metrics_api: MetricsApiConfig,
}

fn default_port() -> u16 {
    4000
}

fn default_poll_interval() -> u64 {
    10
}

fn default_fetch_timeout() -> u64 {
    8
}

fn default_event_buffer() -> usize {
    64
}

fn default_campaigns() -> Vec<String> {
    vec![DEFAULT_CAMPAIGN_ID.to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            poll_interval_secs: default_poll_interval(),
            fetch_timeout_secs: default_fetch_timeout(),
            event_buffer: default_event_buffer(),
            campaigns: default_campaigns(),
            metrics_api: MetricsApiConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RulewatchError::ConfigNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.poll_interval_secs == 0 {
            error("poll_interval_secs must be greater than 0".to_string());
        }
        if self.fetch_timeout_secs == 0 {
            error("fetch_timeout_secs must be greater than 0".to_string());
        }
        if self.event_buffer == 0 {
            error("event_buffer must be greater than 0".to_string());
        }
        if self.campaigns.is_empty() {
            error("campaigns is empty: nothing to poll".to_string());
        }
        if let Some(idx) = self.campaigns.iter().position(|c| c.trim().is_empty()) {
            error(format!("campaigns[{idx}] is blank"));
        }
        if let Some(url) = &self.metrics_api.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                error(format!(
                    "metrics_api.base_url '{url}' must start with http:// or https://"
                ));
            }
        }

        if self.poll_interval_secs > 0 && self.fetch_timeout_secs >= self.poll_interval_secs {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "fetch_timeout_secs={} is not shorter than poll_interval_secs={}; slow fetches will skip cycles",
                    self.fetch_timeout_secs, self.poll_interval_secs
                ),
            });
        }
        if self.metrics_api.bearer_token.is_some() && self.metrics_api.base_url.is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "metrics_api.bearer_token is set without base_url; it is unused"
                    .to_string(),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.poll_interval(), Duration::from_secs(10));
        assert_eq!(cfg.fetch_timeout(), Duration::from_secs(8));
        assert_eq!(cfg.campaigns, vec![DEFAULT_CAMPAIGN_ID.to_string()]);
        assert!(cfg.metrics_api.base_url.is_none());
    }

    #[test]
    fn validate_default_config_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg = Config::from_yaml("port: 8080\ncampaigns: [a, b]\n").unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.campaigns, vec!["a", "b"]);
        assert_eq!(cfg.poll_interval_secs, 10);
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn yaml_roundtrip() {
        let mut cfg = Config::default();
        cfg.metrics_api.base_url = Some("https://proxy.example.com".into());
        let back = Config::from_yaml(&cfg.to_yaml().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("rulewatch.yaml")).unwrap_err();
        assert!(matches!(err, RulewatchError::ConfigNotFound(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rulewatch.yaml");
        std::fs::write(
            &path,
            "poll_interval_secs: 30\nmetrics_api:\n  base_url: http://localhost:9000\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.poll_interval_secs, 30);
        assert_eq!(
            cfg.metrics_api.base_url.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn load_rejects_malformed_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rulewatch.yaml");
        std::fs::write(&path, "port: [not a number\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(RulewatchError::Yaml(_))
        ));
    }

    #[test]
    fn validate_zero_values_are_errors() {
        let cfg = Config {
            poll_interval_secs: 0,
            fetch_timeout_secs: 0,
            event_buffer: 0,
            campaigns: vec![],
            ..Config::default()
        };
        let warnings = cfg.validate();
        let errors = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .count();
        assert_eq!(errors, 4);
    }

    #[test]
    fn validate_timeout_not_shorter_than_interval() {
        let cfg = Config {
            poll_interval_secs: 5,
            fetch_timeout_secs: 5,
            ..Config::default()
        };
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| {
            w.level == WarnLevel::Warning && w.message.contains("fetch_timeout_secs=5")
        }));
    }

    #[test]
    fn validate_base_url_scheme() {
        let mut cfg = Config::default();
        cfg.metrics_api.base_url = Some("proxy.example.com".into());
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("base_url")));
    }

    #[test]
    fn validate_token_without_url() {
        let mut cfg = Config::default();
        cfg.metrics_api.bearer_token = Some("secret".into());
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
    }

    #[test]
    fn validate_blank_campaign() {
        let cfg = Config {
            campaigns: vec!["a".into(), " ".into()],
            ..Config::default()
        };
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message == "campaigns[1] is blank"));
    }
}
