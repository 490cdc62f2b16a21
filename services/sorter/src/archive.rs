//! Zip archive output, one file per category group.

use crate::catalog::CategoryCode;
use crate::classifier::Image;
use crate::config::ArchiveCompression;
use crate::error::SortError;
use crate::grouping::{CategoryGroup, CategoryGroups};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Errors writing a single archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Descriptor for one written archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveManifestEntry {
    pub category: CategoryCode,
    pub category_name: String,
    pub filename: String,
    pub count: usize,
}

/// A category whose archive could not be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveFailure {
    pub category: CategoryCode,
    pub filename: String,
    pub reason: String,
}

/// Outcome of archiving all groups
#[derive(Debug, Clone, Default)]
pub struct ArchiveReport {
    pub entries: Vec<ArchiveManifestEntry>,
    pub failures: Vec<ArchiveFailure>,
}

/// Writes one zip archive per category group
pub struct ArchiveBuilder {
    output_dir: PathBuf,
    compression: ArchiveCompression,
    run_id: Option<String>,
}

impl ArchiveBuilder {
    pub fn new(output_dir: impl Into<PathBuf>, compression: ArchiveCompression) -> Self {
        Self {
            output_dir: output_dir.into(),
            compression,
            run_id: None,
        }
    }

    /// Suffix archive filenames with a caller-chosen run identifier
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Archive filename for a category.
    ///
    /// Format: `{code}_{name}[_{run_id}].zip`, e.g.
    /// `3_2_nighttime_or_low_light.zip`
    pub fn archive_filename(&self, category: CategoryCode) -> String {
        let mut stem = format!(
            "{}_{}",
            normalize_component(category.as_str()),
            normalize_component(category.name())
        );

        if let Some(run_id) = &self.run_id {
            stem.push('_');
            stem.push_str(&sanitize_path_component(run_id));
        }

        format!("{}.zip", stem)
    }

    /// Write an archive for every group.
    ///
    /// A failed archive is reported and does not stop the others. Only a
    /// panicked writer task is returned as an error.
    #[instrument(skip_all, fields(groups = groups.len(), output_dir = %self.output_dir.display()))]
    pub async fn build(&self, groups: &CategoryGroups) -> Result<ArchiveReport, SortError> {
        let mut report = ArchiveReport::default();

        for group in groups.iter() {
            let filename = self.archive_filename(group.category);
            let path = self.output_dir.join(&filename);

            match self.write_group(group, path).await? {
                Ok(()) => {
                    info!(
                        category = %group.category,
                        filename = %filename,
                        count = group.images.len(),
                        "Archive written"
                    );
                    metrics::counter!("sorter.archives.written").increment(1);
                    report.entries.push(ArchiveManifestEntry {
                        category: group.category,
                        category_name: group.category.name().to_string(),
                        filename,
                        count: group.images.len(),
                    });
                }
                Err(e) => {
                    error!(
                        category = %group.category,
                        filename = %filename,
                        error = %e,
                        "Failed to write archive"
                    );
                    metrics::counter!("sorter.archives.failed").increment(1);
                    report.failures.push(ArchiveFailure {
                        category: group.category,
                        filename,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn write_group(
        &self,
        group: &CategoryGroup,
        path: PathBuf,
    ) -> Result<Result<(), ArchiveError>, tokio::task::JoinError> {
        let images = group.images.clone();
        let compression = self.compression;

        tokio::task::spawn_blocking(move || write_archive(&path, &images, compression)).await
    }
}

/// Write the archive under a temporary name and move it into place
fn write_archive(
    path: &Path,
    images: &[Arc<Image>],
    compression: ArchiveCompression,
) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let partial = partial_path(path);
    let result = write_entries(&partial, images, compression)
        .and_then(|()| std::fs::rename(&partial, path).map_err(ArchiveError::from));

    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }

    result
}

fn write_entries(
    path: &Path,
    images: &[Arc<Image>],
    compression: ArchiveCompression,
) -> Result<(), ArchiveError> {
    let file = File::create(path)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));

    for image in images {
        writer.start_file(image.name.as_str(), entry_options(compression))?;
        writer.write_all(&image.bytes)?;
    }

    let mut inner = writer.finish()?;
    inner.flush()?;
    Ok(())
}

fn entry_options(compression: ArchiveCompression) -> SimpleFileOptions {
    let method = match compression {
        ArchiveCompression::Stored => CompressionMethod::Stored,
        ArchiveCompression::Deflated => CompressionMethod::Deflated,
    };

    SimpleFileOptions::default().compression_method(method)
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Lowercase, collapsing each run of non-alphanumeric characters to `_`
fn normalize_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_separator = false;

    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    out
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Selection, CATALOG};
    use crate::classifier::ClassificationOutcome;
    use crate::grouping::{group, ImageOutcome};
    use std::io::Read;

    fn code(c: &str) -> CategoryCode {
        CATALOG.lookup(c).unwrap()
    }

    fn outcome(name: &str, bytes: &[u8], codes: &[&str]) -> ImageOutcome {
        ImageOutcome {
            image: Arc::new(Image::new(name, bytes.to_vec())),
            outcome: ClassificationOutcome::classified(codes.iter().map(|c| code(c))),
        }
    }

    fn groups(outcomes: Vec<ImageOutcome>) -> CategoryGroups {
        group(&outcomes, &Selection::all()).groups
    }

    fn read_zip(path: &Path) -> Vec<(String, Vec<u8>, CompressionMethod)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data, entry.compression())
            })
            .collect()
    }

    #[test]
    fn test_archive_filename() {
        let builder = ArchiveBuilder::new("/tmp/out", ArchiveCompression::Deflated);
        assert_eq!(
            builder.archive_filename(code("3.2")),
            "3_2_nighttime_or_low_light.zip"
        );
        assert_eq!(
            builder.archive_filename(code("1")),
            "1_natural_landscape_no_people.zip"
        );
        assert_eq!(
            builder.archive_filename(code("3.5")),
            "3_5_text_heavy_image.zip"
        );
    }

    #[test]
    fn test_archive_filename_with_run_id() {
        let builder = ArchiveBuilder::new("/tmp/out", ArchiveCompression::Deflated)
            .with_run_id("20240115T103045/../x");
        assert_eq!(
            builder.archive_filename(code("2.1")),
            "2_1_one_person_20240115T103045____x.zip"
        );
    }

    #[test]
    fn test_normalize_component() {
        assert_eq!(
            normalize_component("Natural Landscape (No People)"),
            "natural_landscape_no_people"
        );
        assert_eq!(normalize_component("  --a--b--  "), "a_b");
        assert_eq!(normalize_component("3.0"), "3_0");
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("run-001"), "run-001");
        assert_eq!(sanitize_path_component("a/b"), "a_b");
        assert_eq!(sanitize_path_component("a..b"), "a__b");
    }

    #[tokio::test]
    async fn test_build_writes_image_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("zips");
        let builder = ArchiveBuilder::new(&out, ArchiveCompression::Deflated);
        let groups = groups(vec![
            outcome("A.jpg", b"jpeg-bytes-a", &["1", "3.2"]),
            outcome("B.png", b"png-bytes-b", &["3.2"]),
        ]);

        let report = builder.build(&groups).await.unwrap();

        assert!(report.failures.is_empty());
        assert_eq!(
            report.entries,
            vec![
                ArchiveManifestEntry {
                    category: code("1"),
                    category_name: "Natural Landscape (No People)".to_string(),
                    filename: "1_natural_landscape_no_people.zip".to_string(),
                    count: 1,
                },
                ArchiveManifestEntry {
                    category: code("3.2"),
                    category_name: "Nighttime or Low-light".to_string(),
                    filename: "3_2_nighttime_or_low_light.zip".to_string(),
                    count: 2,
                },
            ]
        );

        let night = read_zip(&out.join("3_2_nighttime_or_low_light.zip"));
        let names: Vec<_> = night.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A.jpg", "B.png"]);
        assert_eq!(night[0].1, b"jpeg-bytes-a");
        assert_eq!(night[1].1, b"png-bytes-b");
        assert_eq!(night[0].2, CompressionMethod::Deflated);
    }

    #[tokio::test]
    async fn test_build_stored_entries() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ArchiveBuilder::new(dir.path(), ArchiveCompression::Stored);
        let groups = groups(vec![outcome("cat.gif", b"GIF89a", &["3.1"])]);

        let report = builder.build(&groups).await.unwrap();

        let entries = read_zip(&dir.path().join(&report.entries[0].filename));
        assert_eq!(
            entries,
            vec![(
                "cat.gif".to_string(),
                b"GIF89a".to_vec(),
                CompressionMethod::Stored
            )]
        );
    }

    #[tokio::test]
    async fn test_failed_archive_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ArchiveBuilder::new(dir.path(), ArchiveCompression::Deflated);

        // A non-empty directory squatting on the target name makes the final rename fail
        let blocked = dir.path().join("1_natural_landscape_no_people.zip");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), b"x").unwrap();

        let groups = groups(vec![
            outcome("a.jpg", b"a", &["1"]),
            outcome("b.jpg", b"b", &["2.4"]),
        ]);

        let report = builder.build(&groups).await.unwrap();

        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].category, code("2.4"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].category, code("1"));
        assert!(!dir
            .path()
            .join("1_natural_landscape_no_people.zip.partial")
            .exists());
        assert!(dir.path().join("2_4_city_scene.zip").is_file());
    }

    #[tokio::test]
    async fn test_build_without_groups_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("never-created");
        let builder = ArchiveBuilder::new(&out, ArchiveCompression::Deflated);

        let report = builder.build(&CategoryGroups::default()).await.unwrap();

        assert!(report.entries.is_empty());
        assert!(report.failures.is_empty());
        assert!(!out.exists());
    }

    #[test]
    fn test_manifest_entry_json_shape() {
        let entry = ArchiveManifestEntry {
            category: code("2.2"),
            category_name: "Two People".to_string(),
            filename: "2_2_two_people.zip".to_string(),
            count: 4,
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            serde_json::json!({
                "category": "2.2",
                "categoryName": "Two People",
                "filename": "2_2_two_people.zip",
                "count": 4
            })
        );
    }
}
