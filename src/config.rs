use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::{env, fs, path::PathBuf};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8004;
pub const FALLBACK_EMAIL: &str = "unknown@syftbox.local";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub datasites_dir: PathBuf,
    pub user_email: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Browse and manage syft objects in SyftBox datasites")]
pub struct Args {
    /// Host to bind to (overrides SYFT_OBJECTS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SYFT_OBJECTS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root holding one directory per datasite (overrides SYFTBOX_DATASITES)
    #[arg(long)]
    pub datasites_dir: Option<PathBuf>,

    /// Local user; requests without `x-syft-user` act as this email
    /// (overrides SYFTBOX_EMAIL)
    #[arg(long)]
    pub email: Option<String>,
}

/// The bits of the SyftBox client config we read.
#[derive(Deserialize)]
struct ClientConfig {
    email: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse(), |key| env::var(key).ok())
    }

    /// Flags win over `lookup`, which wins over defaults.
    pub fn merge(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_port = match lookup("SYFT_OBJECTS_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing SYFT_OBJECTS_PORT value `{}`", value))?,
            None => DEFAULT_PORT,
        };
        let home = lookup("HOME").map(PathBuf::from);

        let datasites_dir = match args
            .datasites_dir
            .or_else(|| lookup("SYFTBOX_DATASITES").map(PathBuf::from))
        {
            Some(dir) => dir,
            None => home
                .as_ref()
                .map(|home| home.join("SyftBox").join("datasites"))
                .context("no datasites directory given and HOME is not set")?,
        };

        let user_email = args
            .email
            .or_else(|| lookup("SYFTBOX_EMAIL"))
            .filter(|email| !email.trim().is_empty())
            .or_else(|| {
                home.as_ref()
                    .and_then(|home| client_email(&home.join(".syftbox/config.json")))
            })
            .unwrap_or_else(|| FALLBACK_EMAIL.to_string());

        Ok(Self {
            host: args
                .host
                .or_else(|| lookup("SYFT_OBJECTS_HOST"))
                .unwrap_or_else(|| DEFAULT_HOST.into()),
            port: args.port.unwrap_or(env_port),
            datasites_dir,
            user_email,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `email` from the SyftBox client config, if the file exists and parses.
fn client_email(path: &std::path::Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<ClientConfig>(&raw) {
        Ok(config) => config.email.filter(|email| !email.trim().is_empty()),
        Err(err) => {
            tracing::warn!("ignoring unreadable {}: {}", path.display(), err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_come_from_home() {
        let home = TempDir::new().unwrap();
        let cfg = AppConfig::merge(
            Args::default(),
            env_of(&[("HOME", home.path().to_str().unwrap())]),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8004");
        assert_eq!(cfg.datasites_dir, home.path().join("SyftBox/datasites"));
        assert_eq!(cfg.user_email, FALLBACK_EMAIL);
    }

    #[test]
    fn email_is_read_from_client_config() {
        let home = TempDir::new().unwrap();
        fs::create_dir_all(home.path().join(".syftbox")).unwrap();
        fs::write(
            home.path().join(".syftbox/config.json"),
            r#"{"email": "me@example.com", "server_url": "https://x"}"#,
        )
        .unwrap();
        let cfg = AppConfig::merge(
            Args::default(),
            env_of(&[("HOME", home.path().to_str().unwrap())]),
        )
        .unwrap();
        assert_eq!(cfg.user_email, "me@example.com");
    }

    #[test]
    fn flags_override_environment() {
        let args = Args {
            port: Some(9000),
            email: Some("flag@example.com".into()),
            ..Default::default()
        };
        let cfg = AppConfig::merge(
            args,
            env_of(&[
                ("SYFT_OBJECTS_PORT", "7000"),
                ("SYFT_OBJECTS_HOST", "0.0.0.0"),
                ("SYFTBOX_EMAIL", "env@example.com"),
                ("SYFTBOX_DATASITES", "/srv/datasites"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.user_email, "flag@example.com");
        assert_eq!(cfg.datasites_dir, PathBuf::from("/srv/datasites"));
    }

    #[test]
    fn bad_port_is_an_error() {
        let result = AppConfig::merge(
            Args::default(),
            env_of(&[("SYFT_OBJECTS_PORT", "http"), ("HOME", "/home/x")]),
        );
        assert!(result.is_err());
    }
}
