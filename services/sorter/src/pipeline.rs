//! End-to-end sort run: validate, classify, group, archive.

use crate::archive::{ArchiveBuilder, ArchiveFailure, ArchiveManifestEntry};
use crate::catalog::Selection;
use crate::classifier::{Classifier, Image};
use crate::error::{RequestError, SortError};
use crate::grouping::{Grouping, ImageFailure};
use crate::orchestrator::BatchOrchestrator;
use serde::Serialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// A batch submitted for sorting
#[derive(Debug, Clone)]
pub struct SortRequest {
    pub images: Vec<Image>,
    /// Raw category codes; validated against the catalog
    pub selection: Vec<String>,
}

/// Result of a sort run, also written as `results.json`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SortReport {
    pub run_id: Option<String>,
    /// No image or archive failed
    pub success: bool,
    pub total_images: usize,
    pub zip_files: Vec<ArchiveManifestEntry>,
    pub failures: Vec<ImageFailure>,
    pub archive_failures: Vec<ArchiveFailure>,
}

/// Validate a request without touching the classifier
pub fn validate_request(images: &[Image], selection: &[String]) -> Result<Selection, RequestError> {
    if images.is_empty() {
        return Err(RequestError::EmptyBatch);
    }

    let mut seen = HashSet::with_capacity(images.len());
    for image in images {
        if !is_valid_image_name(&image.name) {
            return Err(RequestError::InvalidImageName {
                name: image.name.clone(),
            });
        }
        if !seen.insert(image.name.as_str()) {
            return Err(RequestError::DuplicateImage {
                name: image.name.clone(),
            });
        }
    }

    Selection::parse(selection)
}

/// Image names become archive entry names, so they must be plain file names
fn is_valid_image_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

/// Every image must be either classified or failed, and groups may only
/// reference images from the batch
fn check_accounting(grouping: &Grouping, batch: &HashSet<String>) -> Result<(), SortError> {
    let accounted = grouping.classified + grouping.failures.len();
    if accounted != batch.len() {
        return Err(SortError::Invariant(format!(
            "{} outcomes for a batch of {} images",
            accounted,
            batch.len()
        )));
    }

    for group in grouping.groups.iter() {
        if let Some(name) = group.image_names().find(|name| !batch.contains(*name)) {
            return Err(SortError::Invariant(format!(
                "group {} references image {} outside the batch",
                group.category, name
            )));
        }
    }

    if let Some(failure) = grouping.failures.iter().find(|f| !batch.contains(&f.image)) {
        return Err(SortError::Invariant(format!(
            "failure recorded for image {} outside the batch",
            failure.image
        )));
    }

    Ok(())
}

/// Classification, grouping and archiving for one batch
pub struct SortPipeline<C: ?Sized> {
    orchestrator: BatchOrchestrator<C>,
    archives: ArchiveBuilder,
}

impl<C: Classifier + ?Sized> SortPipeline<C> {
    pub fn new(orchestrator: BatchOrchestrator<C>, archives: ArchiveBuilder) -> Self {
        Self {
            orchestrator,
            archives,
        }
    }

    /// Run a batch.
    ///
    /// Request errors are returned before any classification call is made.
    /// Per-image and per-archive failures are reported in the result.
    #[instrument(skip_all, fields(images = request.images.len(), run_id = ?self.archives.run_id()))]
    pub async fn run(
        &self,
        request: SortRequest,
        cancel: &CancellationToken,
    ) -> Result<SortReport, SortError> {
        let selection = validate_request(&request.images, &request.selection)?;
        let total_images = request.images.len();
        let batch: HashSet<String> = request.images.iter().map(|i| i.name.clone()).collect();

        info!(
            total_images,
            selected = ?selection.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            "Starting sort run"
        );

        let grouping = self.orchestrator.run(request.images, &selection, cancel).await;
        check_accounting(&grouping, &batch)?;

        let archives = self.archives.build(&grouping.groups).await?;

        let report = SortReport {
            run_id: self.archives.run_id().map(String::from),
            success: grouping.failures.is_empty() && archives.failures.is_empty(),
            total_images,
            zip_files: archives.entries,
            failures: grouping.failures,
            archive_failures: archives.failures,
        };

        info!(
            archives = report.zip_files.len(),
            image_failures = report.failures.len(),
            archive_failures = report.archive_failures.len(),
            "Sort run complete"
        );

        Ok(report)
    }
}
