//! Small filesystem helpers.

use std::path::{Path, PathBuf};

/// Returns `path` unchanged when nothing exists there, otherwise the first
/// of `name(1).ext`, `name(2).ext`, … that is free.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let mut counter: u32 = 1;
    loop {
        let mut name = format!("{}({})", stem, counter);
        if let Some(ext) = &extension {
            name.push('.');
            name.push_str(ext);
        }
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
