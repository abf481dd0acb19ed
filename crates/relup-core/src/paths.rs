use dirs::data_dir;
use std::path::{Path, PathBuf};

/// Name of the hidden file under an install root that holds the installed tag.
pub const VERSION_MARKER: &str = ".github_release_tag";

/// Returns the directory under which applications are installed by default,
/// or None if no data directory can be resolved.
///
/// `RELUP_HOME` overrides the platform data directory
/// (`$XDG_DATA_HOME/relup` or `~/.local/share/relup` on Linux).
pub fn try_relup_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("RELUP_HOME") {
        return Some(PathBuf::from(val));
    }
    data_dir().map(|d| d.join("relup"))
}

/// Conventional install root for the application called `name`.
pub fn default_install_root(name: &str) -> Option<PathBuf> {
    try_relup_home().map(|home| home.join(name))
}

/// Version marker path: <install root>/.github_release_tag
pub fn version_marker_path(install_root: &Path) -> PathBuf {
    install_root.join(VERSION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_lives_directly_under_root() {
        let marker = version_marker_path(Path::new("/opt/peacock"));
        assert_eq!(marker, PathBuf::from("/opt/peacock/.github_release_tag"));
    }

    #[test]
    fn test_default_install_root_is_per_application() {
        if let Some(root) = default_install_root("Peacock") {
            assert!(root.ends_with("Peacock"));
        }
    }
}
