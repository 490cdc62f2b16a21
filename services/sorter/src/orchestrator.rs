//! Bounded-concurrency classification of a whole batch.

use crate::catalog::Selection;
use crate::classifier::{ClassificationFailure, ClassificationOutcome, Classifier, Image};
use crate::grouping::{self, Grouping, ImageOutcome};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Drives a classifier over a batch with bounded concurrency.
///
/// Every image yields exactly one outcome. A failing call is recorded and
/// never aborts the batch; there are no retries.
pub struct BatchOrchestrator<C: ?Sized> {
    classifier: Arc<C>,
    max_in_flight: usize,
    call_timeout: Duration,
}

impl<C: Classifier + ?Sized> BatchOrchestrator<C> {
    pub fn new(classifier: Arc<C>, max_in_flight: usize, call_timeout: Duration) -> Self {
        Self {
            classifier,
            max_in_flight: max_in_flight.max(1),
            call_timeout,
        }
    }

    /// Classify every image, then group the complete set of outcomes
    #[instrument(skip_all, fields(images = images.len(), selected = selection.len()))]
    pub async fn run(
        &self,
        images: Vec<Image>,
        selection: &Selection,
        cancel: &CancellationToken,
    ) -> Grouping {
        let outcomes = self.classify_all(images, cancel).await;
        let grouping = grouping::group(&outcomes, selection);

        info!(
            classified = grouping.classified,
            failed = grouping.failures.len(),
            groups = grouping.groups.len(),
            "Batch classification finished"
        );

        grouping
    }

    /// Classify every image; outcomes are returned in completion order.
    ///
    /// Once `cancel` fires, images that have not started are recorded as
    /// cancelled without a call. Calls already in flight run to completion
    /// or timeout.
    pub async fn classify_all(
        &self,
        images: Vec<Image>,
        cancel: &CancellationToken,
    ) -> Vec<ImageOutcome> {
        stream::iter(images.into_iter().map(Arc::new))
            .map(|image| self.classify_one(image, cancel))
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await
    }

    async fn classify_one(&self, image: Arc<Image>, cancel: &CancellationToken) -> ImageOutcome {
        if cancel.is_cancelled() {
            debug!(image = %image.name, "Run cancelled, skipping classification");
            metrics::counter!("sorter.images.failed").increment(1);
            return ImageOutcome {
                image,
                outcome: ClassificationOutcome::failed(ClassificationFailure::Cancelled),
            };
        }

        let started = Instant::now();
        let call = self.classifier.classify(&image);
        let outcome = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => ClassificationOutcome::failed(ClassificationFailure::Timeout),
        };
        metrics::histogram!("sorter.classify.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &outcome {
            ClassificationOutcome::Classified { codes } => {
                let codes: Vec<&str> = codes.iter().map(|c| c.as_str()).collect();
                debug!(image = %image.name, codes = ?codes, "Image classified");
                metrics::counter!("sorter.images.classified").increment(1);
            }
            ClassificationOutcome::Failed { reason } => {
                warn!(image = %image.name, reason = %reason, "Image failed classification");
                metrics::counter!("sorter.images.failed").increment(1);
            }
        }

        ImageOutcome { image, outcome }
    }
}
