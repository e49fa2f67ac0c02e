use anyhow::Context;
use clap::Args;
use rulewatch_core::config::Config;
use std::path::{Path, PathBuf};

/// File picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "rulewatch.yaml";

/// Command-line and environment values that take precedence over the file.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Port for the HTTP API
    #[arg(long, global = true, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL of the metrics proxy (absent: synthesized metrics)
    #[arg(long, global = true, env = "META_PROXY_API_BASE_URL")]
    pub metrics_url: Option<String>,

    /// Bearer token sent to the metrics proxy
    #[arg(long, global = true, env = "META_PROXY_BEARER_TOKEN", hide_env_values = true)]
    pub metrics_token: Option<String>,

    /// Campaign to poll (repeatable; replaces the configured list)
    #[arg(
        long = "campaign",
        global = true,
        env = "SAMPLE_CAMPAIGN_ID",
        value_delimiter = ','
    )]
    pub campaigns: Vec<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(url) = &self.metrics_url {
            config.metrics_api.base_url = non_blank(url);
        }
        if let Some(token) = &self.metrics_token {
            config.metrics_api.bearer_token = non_blank(token);
        }
        if !self.campaigns.is_empty() {
            config.campaigns = self.campaigns.clone();
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Locate the config file.
///
/// Priority:
/// 1. `--config` flag / `RULEWATCH_CONFIG` env var (passed in as `explicit`)
/// 2. `rulewatch.yaml` in the current directory
/// 3. None (built-in defaults)
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let candidate = cwd.join(DEFAULT_CONFIG_FILE);
    candidate.is_file().then_some(candidate)
}

/// Load the file (if any) and layer the overrides on top.
pub fn resolve(explicit: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Config> {
    let mut config = match config_path(explicit) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    overrides.apply(&mut config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_path_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.yaml");
        assert_eq!(config_path(Some(&path)), Some(path));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.yaml");
        let err = resolve(Some(&path), &Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("absent.yaml"));
    }

    #[test]
    fn overrides_replace_file_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rulewatch.yaml");
        std::fs::write(&path, "port: 5000\ncampaigns: [a]\n").unwrap();

        let overrides = Overrides {
            port: Some(6000),
            metrics_url: Some("https://proxy.example.com".into()),
            metrics_token: Some("  ".into()),
            campaigns: vec!["b".into(), "c".into()],
        };
        let config = resolve(Some(&path), &overrides).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(
            config.metrics_api.base_url.as_deref(),
            Some("https://proxy.example.com")
        );
        assert_eq!(config.metrics_api.bearer_token, None);
        assert_eq!(config.campaigns, vec!["b", "c"]);
    }

    #[test]
    fn empty_overrides_keep_file_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rulewatch.yaml");
        std::fs::write(&path, "port: 5000\n").unwrap();
        let config = resolve(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.campaigns, Config::default().campaigns);
    }
}
