use crate::output::{print_json, print_pairs};
use clap::Subcommand;
use rulewatch_core::config::{Config, WarnLevel};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration (file, then flags and env)
    Show,

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config: &Config, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(config, json),
        ConfigSubcommand::Validate => validate(config, json),
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        let mut redacted = config.clone();
        if redacted.metrics_api.bearer_token.is_some() {
            redacted.metrics_api.bearer_token = Some("(redacted)".to_string());
        }
        return print_json(&redacted);
    }

    let source = match &config.metrics_api.base_url {
        Some(url) => url.clone(),
        None => "(synthetic)".to_string(),
    };
    let token = match &config.metrics_api.bearer_token {
        Some(_) => "(set)",
        None => "-",
    };
    print_pairs(&[
        ("port", config.port.to_string()),
        ("poll_interval_secs", config.poll_interval_secs.to_string()),
        ("fetch_timeout_secs", config.fetch_timeout_secs.to_string()),
        ("event_buffer", config.event_buffer.to_string()),
        ("campaigns", config.campaigns.join(", ")),
        ("metrics_api.base_url", source),
        ("metrics_api.bearer_token", token.to_string()),
    ]);
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(config: &Config, json: bool) -> anyhow::Result<()> {
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}
