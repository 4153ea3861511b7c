use std::path::{Component, Path, PathBuf};

/// Replaces a leading `~` with the home directory of the current user.
///
/// Paths not starting with `~` or without a known home directory are returned
/// unchanged. `~user` isn't supported.
pub fn expand_user(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => {
                log::warn!(target: "config", "Unable to expand {}: unknown home directory", path.display());
                path.to_path_buf()
            }
        },
        _ => path.to_path_buf(),
    }
}
