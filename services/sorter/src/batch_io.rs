//! File-system adapters for the batch binary.
//!
//! Images are read from an uploads directory, the category selection from a
//! JSON parameters file, and the run report is written next to the archives.

use crate::classifier::Image;
use crate::pipeline::SortReport;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extensions picked up from the uploads directory
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Name of the run report written to the output directory
pub const REPORT_FILE_NAME: &str = "results.json";

#[derive(Debug, Deserialize)]
struct SelectionParams {
    #[serde(default)]
    categories: Vec<String>,
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Load every image file in `dir`, sorted by file name
pub async fn load_images(dir: &Path) -> Result<Vec<Image>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read uploads directory {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && has_image_extension(&path) {
            paths.push(path);
        } else {
            debug!(path = %path.display(), "Skipping non-image entry");
        }
    }
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context("Image path has no file name")?;
        images.push(Image::new(name, bytes));
    }

    info!(dir = %dir.display(), count = images.len(), "Loaded images");

    Ok(images)
}

/// Read the caller's selection from a `{"categories": [...]}` file.
///
/// Returns `None` when the file does not exist.
pub async fn read_selection(path: &Path) -> Result<Option<Vec<String>>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to read parameters file {}", path.display()))
        }
    };

    let params: SelectionParams = serde_json::from_slice(&bytes)
        .with_context(|| format!("Invalid parameters file {}", path.display()))?;

    Ok(Some(params.categories))
}

/// Write the run report as pretty JSON, returning its path
pub async fn write_report(dir: &Path, report: &SortReport) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let path = dir.join(REPORT_FILE_NAME);
    let json = serde_json::to_vec_pretty(report).context("Failed to serialize run report")?;

    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write run report {}", path.display()))?;

    Ok(path)
}
