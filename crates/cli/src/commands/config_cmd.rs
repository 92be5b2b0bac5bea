//! `flowgate config`: configuration management commands.

use std::path::Path;

use anyhow::Context;
use clap::Subcommand;
use flowgate_config::AppConfig;

const REDACTED: &str = "[REDACTED]";

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
}

pub fn run(config: &AppConfig, explicit_path: Option<&Path>, action: ConfigAction) -> anyhow::Result<()> {
    let path = explicit_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    match action {
        ConfigAction::Show => {
            println!("{}", render_redacted(config)?);
            Ok(())
        }
        ConfigAction::Init { force } => init(&path, force),
        ConfigAction::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Validate => validate(config),
    }
}

/// The effective configuration as TOML, with the gateway token hidden.
pub fn render_redacted(config: &AppConfig) -> anyhow::Result<String> {
    let mut shown = config.clone();
    if shown.gateway.token.is_some() {
        shown.gateway.token = Some(REDACTED.into());
    }
    Ok(toml::to_string_pretty(&shown)?)
}

pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Hard errors were already raised while loading; this reports warnings.
fn validate(config: &AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    let warnings = warnings(config);
    if warnings.is_empty() {
        println!("Configuration OK");
    } else {
        for w in &warnings {
            println!("warning: {w}");
        }
    }
    println!("  gateway:  {}", config.gateway.normalized_base_url());
    println!("  timezone: {}", config.timezone());
    println!("  debounce: {}ms", config.debounce.window_ms);
    match &config.fixture {
        Some(path) => println!("  fixture:  {}", path.display()),
        None => println!("  fixture:  (none)"),
    }
    Ok(())
}

fn warnings(config: &AppConfig) -> Vec<String> {
    let mut out = Vec::new();
    if config.gateway.token.is_none() {
        out.push("no gateway token set (FLOWGATE_GATEWAY_TOKEN)".to_string());
    }
    if config.gateway.stream_deadline_secs < config.gateway.timeout_secs {
        out.push("gateway.stream_deadline_secs is shorter than gateway.timeout_secs".to_string());
    }
    if let Some(path) = config.fixture.as_ref().filter(|p| !p.exists()) {
        out.push(format!("fixture {} does not exist", path.display()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_hides_token() {
        let mut config = AppConfig::default();
        config.gateway.token = Some("super-secret".into());
        let out = render_redacted(&config).unwrap();
        assert!(!out.contains("super-secret"));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        init(&path, false).unwrap();
        let written = AppConfig::load_from(&path).unwrap();
        assert_eq!(written.gateway.base_url, AppConfig::default().gateway.base_url);

        assert!(init(&path, false).is_err());
        init(&path, true).unwrap();
    }

    #[test]
    fn warns_on_missing_token_and_fixture() {
        let config = AppConfig {
            fixture: Some("/nonexistent/fixture.toml".into()),
            ..Default::default()
        };
        let warnings = warnings(&config);
        assert!(warnings.iter().any(|w| w.contains("token")));
        assert!(warnings.iter().any(|w| w.contains("fixture")));
    }
}
