// src/core/paths.rs

use crate::constants::{APP_DIR_NAME, SHELLS_CONFIG_FILENAME};
use crate::error::{Error, ErrorKind, Result};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

lazy_static! {
    static ref PLUMB_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

/// Returns the plumb configuration directory (`~/.config/plumb` on Linux).
///
/// Memoized: only the first call asks the system for its config directory.
/// The directory is not created.
pub fn config_dir() -> Result<PathBuf> {
    let mut cached = PLUMB_CONFIG_DIR
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(path) = &*cached {
        return Ok(path.clone());
    }

    let path = dirs::config_dir()
        .ok_or_else(|| Error::new(ErrorKind::Io, "Could not find system config directory."))?
        .join(APP_DIR_NAME);
    *cached = Some(path.clone());
    Ok(path)
}

/// Path of the user's `shells.toml`.
pub fn shells_config_path() -> Result<PathBuf> {
    config_dir().map(|dir| dir.join(SHELLS_CONFIG_FILENAME))
}

/// Treats drive-letter and UNC paths as absolute when targeting Windows,
/// regardless of the host.
pub fn is_absolute_for_windows(path: &str) -> bool {
    let bytes = path.as_bytes();
    let has_drive = matches!(
        (bytes.first(), bytes.get(1)),
        (Some(letter), Some(b':')) if letter.is_ascii_alphabetic()
    );
    has_drive || path.starts_with("\\\\") || path.starts_with("//")
}

/// Joins a relative `path` onto `cwd`; absolute paths are returned unchanged.
pub fn absolutize(path: &str, cwd: Option<&Path>, windows: bool) -> String {
    let absolute = if windows {
        is_absolute_for_windows(path) || Path::new(path).is_absolute()
    } else {
        Path::new(path).is_absolute()
    };
    match cwd {
        Some(cwd) if !absolute => dunce::simplified(&cwd.join(path)).display().to_string(),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_memoized() {
        if dirs::config_dir().is_none() {
            return;
        }
        let first = config_dir().unwrap();
        let second = config_dir().unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with(APP_DIR_NAME));
        assert!(shells_config_path().unwrap().ends_with(SHELLS_CONFIG_FILENAME));
    }

    #[test]
    fn test_windows_absolute_detection() {
        assert!(is_absolute_for_windows("C:\\Users\\me"));
        assert!(is_absolute_for_windows("d:/tmp"));
        assert!(is_absolute_for_windows("\\\\server\\share"));
        assert!(!is_absolute_for_windows("scripts\\run.ps1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolutize() {
        let cwd = Path::new("/work");
        assert_eq!(absolutize("run.sh", Some(cwd), false), "/work/run.sh");
        assert_eq!(absolutize("/tmp/run.sh", Some(cwd), false), "/tmp/run.sh");
        assert_eq!(absolutize("C:\\x.ps1", Some(cwd), true), "C:\\x.ps1");
        assert_eq!(absolutize("run.sh", None, false), "run.sh");
    }
}
