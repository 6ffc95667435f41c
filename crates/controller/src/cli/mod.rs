pub mod config;
pub mod console;

use clap::{Parser, Subcommand};

/// Lumina: home-automation message broker.
#[derive(Debug, Parser)]
#[command(name = "lumina", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the controller (default when no subcommand is given).
    Serve,
    /// Open an interactive admin shell on a running controller.
    Console {
        /// Controller node port, `host:port`.  Defaults to the configured
        /// session port on localhost.
        #[arg(long)]
        addr: Option<String>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
    /// Print one resolved value as JSON.
    Get {
        /// Dotted key, e.g. `session.command_timeout_secs`.
        key: String,
        /// Section to resolve `key` in, e.g. `server`.
        #[arg(long)]
        namespace: Option<String>,
    },
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `LUMINA_CONFIG` (or
/// `config.toml` by default).  Returns the parsed [`Config`] and the
/// path that was used.  A missing file yields the defaults.
///
/// [`Config`]: lu_domain::config::Config
pub fn load_config() -> anyhow::Result<(lu_domain::config::Config, String)> {
    let config_path = std::env::var("LUMINA_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<lu_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(lu_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    lu_domain::config::Config::from_toml(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 5326);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 7000\n\n[responder.groups]\nmovie = [\"hw50/on\"]").unwrap();
        let config = load_config_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.responder.groups["movie"], vec!["hw50/on"]);
    }

    #[test]
    fn bad_toml_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains(&path));
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["lumina", "console", "--addr", "hub:5326"]);
        assert!(matches!(
            cli.command,
            Some(Command::Console { addr: Some(a) }) if a == "hub:5326"
        ));
        let cli = Cli::parse_from(["lumina"]);
        assert!(cli.command.is_none());
    }
}
