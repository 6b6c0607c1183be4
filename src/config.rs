use crate::lifecycle::Request;
use crate::paths;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_DIR: &str = ".";
pub const DEFAULT_TIMEOUT_SECS: f64 = 3.0;

/// One layer of settings. Layers are stacked lowest-precedence first: the
/// settings file, then the environment, then command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    /// Health check timeout, seconds.
    pub timeout: Option<f64>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    TomlParse(String),
    #[error("{0}")]
    IoError(String),
    #[error("invalid timeout: {0} (expected a non-negative number of seconds)")]
    InvalidTimeout(f64),
}

impl ConfigError {
    pub fn exit_code(&self) -> u8 {
        1
    }
}

impl Settings {
    /// Values from the environment (`SERVE_DIR`).
    pub fn from_env() -> Self {
        Self {
            dir: std::env::var_os(paths::SERVE_DIR_ENV).map(PathBuf::from),
            ..Self::default()
        }
    }

    /// Overlay `over` on top of `self`; any value set in `over` wins.
    pub fn layer(self, over: Settings) -> Settings {
        Settings {
            port: over.port.or(self.port),
            bind: over.bind.or(self.bind),
            dir: over.dir.or(self.dir),
            log_file: over.log_file.or(self.log_file),
            timeout: over.timeout.or(self.timeout),
        }
    }

    /// Resolve into a request, filling built-in defaults and anchoring
    /// relative paths at `cwd`.
    pub fn into_request(self, cwd: &Path) -> Result<Request, ConfigError> {
        let timeout_secs = self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if !timeout_secs.is_finite() || timeout_secs < 0.0 {
            return Err(ConfigError::InvalidTimeout(timeout_secs));
        }

        let dir = paths::absolutize(
            &self.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DIR)),
            cwd,
        );
        // Prefer the resolved form; a missing directory is reported by start.
        let dir = dir.canonicalize().unwrap_or(dir);
        let log_file = match self.log_file {
            Some(path) => paths::absolutize(&path, cwd),
            None => paths::default_log_file(&dir),
        };

        Ok(Request {
            port: self.port,
            bind: self.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            dir,
            log_file,
            legacy_log: paths::legacy_log_file(cwd),
            timeout: Duration::from_secs_f64(timeout_secs),
        })
    }
}

pub fn parse_settings(content: &str) -> Result<Settings, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))
}

/// Load the settings file. A file that does not exist yields empty settings.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_settings(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(ConfigError::IoError(format!("{}: {}", path.display(), e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_valid_toml_parses() {
        let settings = parse_settings(
            r#"
port = 9000
bind = "127.0.0.1"
dir = "/var/www"
log_file = "/var/log/hserve.log"
timeout = 1.5
"#,
        )
        .unwrap();
        assert_eq!(
            settings,
            Settings {
                port: Some(9000),
                bind: Some("127.0.0.1".to_string()),
                dir: Some(PathBuf::from("/var/www")),
                log_file: Some(PathBuf::from("/var/log/hserve.log")),
                timeout: Some(1.5),
            }
        );
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        assert_eq!(parse_settings("").unwrap(), Settings::default());
    }

    #[test]
    fn test_unknown_field_errors() {
        let err = parse_settings("colour = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(ref msg) if msg.contains("colour")));
    }

    #[test]
    fn test_wrong_type_errors() {
        assert!(parse_settings("port = \"eighty\"\n").is_err());
        assert!(parse_settings("port = 70000\n").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let settings = load_settings(&dir.path().join("config.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "bind = \"::1\"\n").unwrap();
        assert_eq!(load_settings(&path).unwrap().bind.as_deref(), Some("::1"));
    }

    #[test]
    fn test_layer_precedence() {
        let file = Settings {
            port: Some(9000),
            bind: Some("127.0.0.1".to_string()),
            dir: Some(PathBuf::from("from-file")),
            ..Settings::default()
        };
        let env = Settings {
            dir: Some(PathBuf::from("from-env")),
            ..Settings::default()
        };
        let flags = Settings {
            port: Some(9100),
            ..Settings::default()
        };

        let merged = file.layer(env).layer(flags);
        assert_eq!(merged.port, Some(9100));
        assert_eq!(merged.bind.as_deref(), Some("127.0.0.1"));
        assert_eq!(merged.dir, Some(PathBuf::from("from-env")));
        assert_eq!(merged.log_file, None);
    }

    #[test]
    fn test_into_request_defaults() {
        let cwd = tempdir().unwrap();
        let cwd_path = cwd.path().canonicalize().unwrap();
        let request = Settings::default().into_request(&cwd_path).unwrap();

        assert_eq!(request.port, None);
        assert_eq!(request.bind, DEFAULT_BIND);
        assert_eq!(request.dir, cwd_path);
        assert_eq!(request.log_file, cwd_path.join(paths::LOG_FILE_NAME));
        assert_eq!(request.legacy_log, cwd_path.join(paths::LEGACY_LOG_FILE_NAME));
        assert_eq!(request.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_into_request_relative_paths_anchor_at_cwd() {
        let cwd = PathBuf::from("/nonexistent-hserve-cwd");
        let request = Settings {
            dir: Some(PathBuf::from("site")),
            log_file: Some(PathBuf::from("logs/server.log")),
            ..Settings::default()
        }
        .into_request(&cwd)
        .unwrap();

        assert_eq!(request.dir, cwd.join("site"));
        assert_eq!(request.log_file, cwd.join("logs/server.log"));
    }

    #[test]
    fn test_into_request_rejects_negative_timeout() {
        let err = Settings {
            timeout: Some(-1.0),
            ..Settings::default()
        }
        .into_request(Path::new("/"))
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidTimeout(-1.0));
    }
}
