//! Crash-safe file replacement: write a sibling `<name>.tmp`, then rename it
//! over the target. Readers see either the old or the new contents.

use std::{
    io,
    path::{Path, PathBuf},
};

/// Replace `path` with `contents`, creating parent directories as needed.
pub async fn write(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
