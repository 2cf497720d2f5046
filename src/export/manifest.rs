//! ffconcat playlist giving every frame the same display duration, which
//! turns irregularly spaced captures into constant-cadence video.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to resolve the working directory")?;
    Ok(cwd.join(path))
}

/// Quote a path for an ffconcat `file` directive
fn quote(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Manifest text for `frame_paths` played back at `fps`
pub fn render(frame_paths: &[PathBuf], fps: u32) -> Result<String> {
    let duration = 1.0 / fps.max(1) as f64;
    let mut text = String::from("ffconcat version 1.0\n");
    for path in frame_paths {
        text.push_str(&format!("file {}\n", quote(&absolute(path)?)));
        text.push_str(&format!("duration {:.6}\n", duration));
    }
    Ok(text)
}

/// Write the manifest to a temporary file under `work_dir`. The file is
/// deleted when the returned handle drops.
pub fn write(work_dir: &Path, frame_paths: &[PathBuf], fps: u32) -> Result<NamedTempFile> {
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("Failed to create work directory {}", work_dir.display()))?;

    let text = render(frame_paths, fps)?;
    let mut file = tempfile::Builder::new()
        .prefix("chronicle_concat_")
        .suffix(".txt")
        .tempfile_in(work_dir)
        .context("Failed to create concat manifest")?;
    file.write_all(text.as_bytes())
        .context("Failed to write concat manifest")?;
    file.flush()?;
    Ok(file)
}
