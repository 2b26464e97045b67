// Configuration loading and parsing (config/buzzer.toml, seeded from defaults/).

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Name of the single config file inside `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "buzzer.toml";

/// Environment variable that overrides `server.port`.
pub const PORT_ENV: &str = "PORT";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// buzzer.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub channels: ChannelConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelConfig {
    pub event_buffer: usize,
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{}]:{}", self.host, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/buzzer.toml` relative to `base_dir`.
///
/// Does not copy defaults and does not look at the environment; prefer
/// `load_config()` for the full startup behavior.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

/// Seed `config/buzzer.toml` from `defaults/buzzer.toml` when it is missing.
///
/// Returns the path written, or `None` when a local config already exists.
/// An existing file is never touched, so local edits survive upgrades.
pub fn seed_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }

    let default = base_dir.join("defaults").join(CONFIG_FILE);
    if !default.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither config/{CONFIG_FILE} nor defaults/{CONFIG_FILE} found in {}; \
                 run from the buzzer-server directory",
                base_dir.display()
            ),
        });
    }

    let seed = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to seed {}: {e}", target.display()),
    };
    std::fs::create_dir_all(base_dir.join("config")).map_err(seed)?;
    std::fs::copy(&default, &target).map_err(seed)?;

    Ok(Some(target))
}

/// Apply a `PORT` value on top of the file config. `None` leaves it alone.
pub fn apply_port_override(config: &mut Config, port: Option<&str>) -> Result<(), ConfigError> {
    let Some(raw) = port else {
        return Ok(());
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    config.server.port = raw.parse().map_err(|_| ConfigError::ValidationError {
        field: PORT_ENV.into(),
        message: format!("must be a port number between 0 and 65535, got {raw:?}"),
    })?;
    Ok(())
}

/// Convenience wrapper: loads config relative to the current working
/// directory after seeding defaults, then applies the `PORT` override.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    seed_config_file(&cwd)?;
    let mut config = load_config_from(&cwd)?;
    apply_port_override(&mut config, std::env::var(PORT_ENV).ok().as_deref())?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.host.parse::<IpAddr>().is_err() {
        return Err(ConfigError::ValidationError {
            field: "server.host".into(),
            message: format!("must be an IP address, got {:?}", config.server.host),
        });
    }

    if config.channels.event_buffer == 0 {
        return Err(ConfigError::ValidationError {
            field: "channels.event_buffer".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.logging.filter.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "logging.filter".into(),
            message: "must not be empty".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Helper: returns the buzzer-server crate root (works whether `cargo
    /// test` runs from the crate root or the workspace root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("crates/buzzer-server/defaults").exists() {
            cwd.join("crates/buzzer-server")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    /// Fresh temp dir containing `config/buzzer.toml` with `contents`.
    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), contents).unwrap();
        tmp
    }

    fn default_text() -> String {
        fs::read_to_string(project_root().join("defaults").join(CONFIG_FILE)).unwrap()
    }

    #[test]
    fn load_defaults_from_project_files() {
        let tmp = temp_config("buzzer_config_defaults", &default_text());
        let config = load_config_from(&tmp).expect("should load default config");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.bind_addr(), "0.0.0.0:3000");
        assert_eq!(
            config.logging.filter,
            "buzzer_server=info,buzzer_core=info,warn"
        );
        assert_eq!(config.channels.event_buffer, 256);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let text = default_text().replace("0.0.0.0", "::1");
        let tmp = temp_config("buzzer_config_ipv6", &text);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.server.bind_addr(), "[::1]:3000");
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_hostname_instead_of_ip() {
        let text = default_text().replace("0.0.0.0", "localhost");
        let tmp = temp_config("buzzer_config_bad_host", &text);
        let err = load_config_from(&tmp).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError { ref field, .. } if field == "server.host"),
            "unexpected error: {err}"
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_event_buffer() {
        let text = default_text().replace("event_buffer = 256", "event_buffer = 0");
        let tmp = temp_config("buzzer_config_zero_buffer", &text);
        let err = load_config_from(&tmp).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError { ref field, .. } if field == "channels.event_buffer")
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_config("buzzer_config_invalid", "[server\nhost = ");
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_missing_section() {
        let tmp = temp_config(
            "buzzer_config_missing_section",
            "[server]\nhost = \"127.0.0.1\"\nport = 1\n",
        );
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_config() {
        let tmp = std::env::temp_dir().join("buzzer_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn port_override_replaces_file_port() {
        let tmp = temp_config("buzzer_config_port_override", &default_text());
        let mut config = load_config_from(&tmp).unwrap();

        apply_port_override(&mut config, None).unwrap();
        assert_eq!(config.server.port, 3000);

        apply_port_override(&mut config, Some("  ")).unwrap();
        assert_eq!(config.server.port, 3000);

        apply_port_override(&mut config, Some("8080")).unwrap();
        assert_eq!(config.server.port, 8080);

        let err = apply_port_override(&mut config, Some("99999")).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == PORT_ENV));
        assert_eq!(config.server.port, 8080);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn seed_config_file_copies_default_when_missing() {
        let tmp = std::env::temp_dir().join("buzzer_config_seed_copy");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults").join(CONFIG_FILE), default_text()).unwrap();

        let seeded = seed_config_file(&tmp).unwrap();
        assert_eq!(seeded, Some(tmp.join("config").join(CONFIG_FILE)));
        assert!(load_config_from(&tmp).is_ok());

        // Second run finds the seeded file and leaves it alone.
        assert_eq!(seed_config_file(&tmp).unwrap(), None);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn seed_config_file_keeps_local_edits() {
        let tmp = std::env::temp_dir().join("buzzer_config_seed_keep");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("defaults").join(CONFIG_FILE), default_text()).unwrap();
        let local = default_text().replace("port = 3000", "port = 4000");
        fs::write(tmp.join("config").join(CONFIG_FILE), &local).unwrap();

        assert_eq!(seed_config_file(&tmp).unwrap(), None);
        assert_eq!(load_config_from(&tmp).unwrap().server.port, 4000);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn seed_config_file_without_defaults_needs_local_config() {
        let tmp = std::env::temp_dir().join("buzzer_config_seed_none");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = seed_config_file(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));

        // A local config alone is enough.
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), default_text()).unwrap();
        assert_eq!(seed_config_file(&tmp).unwrap(), None);

        let _ = fs::remove_dir_all(&tmp);
    }
}
