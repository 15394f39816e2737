//! Data directory resolution

use std::path::{Path, PathBuf};

/// Environment variable that overrides the data directory
pub const HOME_ENV: &str = "HOPWIRE_HOME";

/// Expand a path, replacing a leading `~` with the user's home directory
pub fn expand_path(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

/// Directory holding config, credential, tokens and cached metadata.
///
/// `$HOPWIRE_HOME` when set, otherwise `~/.hopwire`.
pub fn default_data_dir() -> PathBuf {
    match std::env::var(HOME_ENV) {
        Ok(dir) if !dir.is_empty() => expand_path(Path::new(&dir)),
        _ => home_dir()
            .map(|h| h.join(".hopwire"))
            .unwrap_or_else(|| PathBuf::from(".hopwire")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_no_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path), path);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path(&PathBuf::from("~/some/path"));
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("some/path"));
    }
}
