//! Photosort Sorter Service
//!
//! Batch photo sorter. Each uploaded image is classified by a vision model
//! against a fixed catalog of scene categories, images are grouped under the
//! categories the caller selected, and one zip archive is written per
//! non-empty group.
//!
//! ## Features
//!
//! - **Fixed Category Catalog**: Sixteen hierarchical scene codes compiled in
//! - **Multi-label Classification**: An image may land in several archives
//! - **Bounded Concurrency**: At most N classification calls in flight, with a
//!   per-call timeout and cooperative cancellation
//! - **Partial Results**: Failed images are reported, never fatal to the batch
//! - **Atomic Archives**: Zips are written to a temporary file and renamed
//!
//! ## Architecture
//!
//! ```text
//! uploads/                                              output/
//! ┌──────────────┐                                     ┌──────────────┐
//! │ *.jpg *.png  │                                     │ 1_people.zip │
//! └──────────────┘                                     │ 3_2_beach... │
//!        │                                             │ results.json │
//!        ▼                                             └──────────────┘
//! ┌──────────────┐     ┌──────────────┐                       ▲
//! │ Batch        │────▶│ Vision       │                       │
//! │ Orchestrator │◀────│ Classifier   │                       │
//! └──────────────┘     └──────────────┘                       │
//!        │                                                    │
//!        ▼                                                    │
//! ┌──────────────┐     ┌──────────────┐                       │
//! │ Grouping     │────▶│ Archive      │───────────────────────┘
//! │ (selection)  │     │ Builder      │
//! └──────────────┘     └──────────────┘
//! ```

pub mod archive;
pub mod batch_io;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod grouping;
pub mod orchestrator;
pub mod pipeline;

pub use archive::{ArchiveBuilder, ArchiveFailure, ArchiveManifestEntry, ArchiveReport};
pub use catalog::{Catalog, Category, CategoryCode, Selection, CATALOG};
pub use classifier::{
    ClassificationFailure, ClassificationOutcome, Classifier, Image, VisionClassifier,
};
pub use config::Config;
pub use error::{RequestError, SortError};
pub use grouping::{group, CategoryGroup, CategoryGroups, Grouping, ImageFailure, ImageOutcome};
pub use orchestrator::BatchOrchestrator;
pub use pipeline::{validate_request, SortPipeline, SortReport, SortRequest};
