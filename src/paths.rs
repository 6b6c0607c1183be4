use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const SETTINGS_ENV: &str = "HSERVE_CONFIG";
pub const SERVE_DIR_ENV: &str = "SERVE_DIR";

/// Log file name inside the served directory.
pub const LOG_FILE_NAME: &str = ".hserve.log";

/// Where older releases wrote the log: the invoking working directory.
pub const LEGACY_LOG_FILE_NAME: &str = ".hserve_http.log";

/// `HSERVE_CONFIG` if set, otherwise `<config dir>/hserve/config.toml`.
pub fn settings_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(SETTINGS_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|base| base.join("hserve").join("config.toml"))
}

/// Expand a leading `~` and anchor relative paths at `cwd`.
pub fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}

pub fn default_log_file(serve_dir: &Path) -> PathBuf {
    serve_dir.join(LOG_FILE_NAME)
}

pub fn legacy_log_file(cwd: &Path) -> PathBuf {
    cwd.join(LEGACY_LOG_FILE_NAME)
}

/// Move `legacy` to `target` when only the legacy file exists. Returns whether
/// a move happened.
pub fn migrate_legacy_log(legacy: &Path, target: &Path) -> io::Result<bool> {
    if legacy == target || target.exists() || !legacy.is_file() {
        return Ok(false);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(legacy, target)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_relative() {
        let cwd = PathBuf::from("/srv/site");
        assert_eq!(absolutize(Path::new("public"), &cwd), cwd.join("public"));
        assert_eq!(absolutize(Path::new("."), &cwd), cwd.join("."));
    }

    #[test]
    fn test_absolutize_absolute_untouched() {
        let cwd = PathBuf::from("/srv/site");
        assert_eq!(
            absolutize(Path::new("/var/www"), &cwd),
            PathBuf::from("/var/www")
        );
    }

    #[test]
    fn test_absolutize_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let cwd = PathBuf::from("/srv/site");
        assert_eq!(absolutize(Path::new("~/www"), &cwd), home.join("www"));
    }

    #[test]
    fn test_default_log_inside_serve_dir() {
        let log = default_log_file(Path::new("/var/www"));
        assert!(log.starts_with("/var/www"));
        assert!(log.ends_with(LOG_FILE_NAME));
    }

    #[test]
    fn test_migrate_moves_legacy_log() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = legacy_log_file(dir.path());
        let target = dir.path().join("site").join(LOG_FILE_NAME);
        fs::write(&legacy, "old line\n").unwrap();

        assert!(migrate_legacy_log(&legacy, &target).unwrap());
        assert!(!legacy.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "old line\n");
    }

    #[test]
    fn test_migrate_keeps_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = legacy_log_file(dir.path());
        let target = dir.path().join(LOG_FILE_NAME);
        fs::write(&legacy, "old\n").unwrap();
        fs::write(&target, "new\n").unwrap();

        assert!(!migrate_legacy_log(&legacy, &target).unwrap());
        assert!(legacy.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "new\n");
    }

    #[test]
    fn test_migrate_without_legacy_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(LOG_FILE_NAME);
        assert!(!migrate_legacy_log(&legacy_log_file(dir.path()), &target).unwrap());
        assert!(!target.exists());
    }
}
