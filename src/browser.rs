//! Chrome/Chromium executable resolution for the live introspection branch.

use std::path::{Path, PathBuf};

/// The managed Chrome installation directory: `~/.websift/chrome/`
pub fn managed_chrome_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".websift").join("chrome"))
}

/// Resolve a Chrome executable: a previously installed managed copy, else
/// None and chromiumoxide falls back to the system default.
pub fn resolve_chrome_executable() -> Option<PathBuf> {
    let chrome_dir = managed_chrome_dir()?;
    if !chrome_dir.exists() {
        return None;
    }
    find_chrome_in_dir(&chrome_dir)
}

/// Search a directory recursively for a Chrome/Chromium executable.
fn find_chrome_in_dir(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let is_exe = name == "chrome"
            || name == "chromium"
            || name == "Chromium"
            || name == "Google Chrome"
            || name == "chrome.exe"
            || name == "chromium.exe";

        if is_exe && path.is_file() {
            return Some(path);
        }
        if name == "Chromium.app" {
            let inner = path.join("Contents/MacOS/Chromium");
            if inner.exists() {
                return Some(inner);
            }
        }
        if path.is_dir() {
            if let Some(found) = find_chrome_in_dir(&path) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_chrome_dir_shape() {
        if let Some(dir) = managed_chrome_dir() {
            assert!(dir.ends_with("chrome"));
            assert!(dir.to_string_lossy().contains(".websift"));
        }
    }
}
