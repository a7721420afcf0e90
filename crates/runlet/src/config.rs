//! Server configuration.
//!
//! Loaded from a TOML file merged with `RUNLET__`-prefixed environment
//! variables (`RUNLET__SERVER__PORT=9443`). A commented default file is
//! written on first use.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::auth::UserBinding;
use crate::process::ManagerConfig;
use crate::tls::TlsSettings;

pub const APP_NAME: &str = "runlet";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8443;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub tls: TlsSettings,
    pub process: ManagerConfig,
    /// Client certificate bindings. Each entry is provisioned at startup.
    pub users: Vec<UserBinding>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            tls: TlsSettings::default(),
            process: ManagerConfig::default(),
            users: vec![
                UserBinding {
                    id: 1,
                    cert: PathBuf::from("certs/client_cert.pem"),
                },
                UserBinding {
                    id: 2,
                    cert: PathBuf::from("certs/client_cert2.pem"),
                },
            ],
        }
    }
}

impl AppConfig {
    /// Expand `~` and environment variables in every configured path.
    pub fn expand_paths(&mut self) -> Result<()> {
        self.tls.cert = expand_path(&self.tls.cert)?;
        self.tls.key = expand_path(&self.tls.key)?;
        if let Some(ref ca) = self.tls.client_ca {
            self.tls.client_ca = Some(expand_path(ca)?);
        }
        for user in &mut self.users {
            user.cert = expand_path(&user.cert)?;
        }
        Ok(())
    }
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Load the configuration at `path`, merged with the environment.
///
/// A missing file is not an error; defaults apply.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let built = Config::builder()
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(&env_prefix()).separator("__"))
        .build()
        .with_context(|| format!("loading config from {}", path.display()))?;

    let mut config: AppConfig = built
        .try_deserialize()
        .with_context(|| format!("parsing config {}", path.display()))?;
    config.expand_paths()?;
    Ok(config)
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {APP_NAME}\n\
         # File: {}\n\
         # Relative certificate paths resolve against the working directory.\n\n",
        path.display()
    )
}

/// Resolve `--config`: a directory means `<dir>/config.toml`.
pub fn resolve_config_file(override_path: Option<&Path>) -> Result<PathBuf> {
    let config_file = match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                expanded.join("config.toml")
            } else {
                expanded
            }
        }
        None => default_config_dir()?.join("config.toml"),
    };

    if config_file.parent().is_none() {
        return Err(anyhow!("invalid config file path: {config_file:?}"));
    }
    Ok(config_file)
}

pub fn expand_path(path: &Path) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => {
            let expanded = shellexpand::full(text).context("expanding path")?;
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => Ok(path.to_path_buf()),
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn env_prefix() -> String {
    APP_NAME.to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_roundtrips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        write_default_config(&path).unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("# Configuration for runlet"));

        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.process.max_log_bytes, None);
        assert_eq!(config.users.len(), 2);
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[server]
port = 9443

[tls]
client_ca = "/etc/runlet/ca.pem"

[process]
max_log_bytes = 4096

[[users]]
id = 7
cert = "/etc/runlet/alice.pem"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.tls.cert, PathBuf::from("certs/cert.pem"));
        assert_eq!(config.tls.client_ca, Some(PathBuf::from("/etc/runlet/ca.pem")));
        assert_eq!(config.process.max_log_bytes, Some(4096));
        assert_eq!(
            config.users,
            vec![UserBinding {
                id: 7,
                cert: PathBuf::from("/etc/runlet/alice.pem"),
            }]
        );
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nport = \"not a port\"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_resolve_config_file_directory() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_config_file(Some(dir.path())).unwrap();
        assert_eq!(resolved, dir.path().join("config.toml"));
    }
}
