//! Sorting classified images into the caller's selected categories.

use crate::catalog::{CategoryCode, Selection};
use crate::classifier::{ClassificationFailure, ClassificationOutcome, Image};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

/// One image paired with its classification outcome
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub image: Arc<Image>,
    pub outcome: ClassificationOutcome,
}

/// An image that could not be classified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageFailure {
    /// Image name
    pub image: String,
    /// Failure reason, rendered as text in reports
    #[serde(serialize_with = "serialize_display")]
    pub reason: ClassificationFailure,
}

fn serialize_display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Display,
    S: Serializer,
{
    serializer.collect_str(value)
}

/// Images assigned to one selected category, in outcome arrival order
#[derive(Debug, Clone)]
pub struct CategoryGroup {
    pub category: CategoryCode,
    pub images: Vec<Arc<Image>>,
}

impl CategoryGroup {
    pub fn image_names(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(|image| image.name.as_str())
    }
}

/// Non-empty groups ordered by category code
#[derive(Debug, Clone, Default)]
pub struct CategoryGroups {
    groups: Vec<CategoryGroup>,
}

impl CategoryGroups {
    pub fn get(&self, category: &CategoryCode) -> Option<&CategoryGroup> {
        self.groups.iter().find(|g| &g.category == category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryGroup> {
        self.groups.iter()
    }

    pub fn categories(&self) -> impl Iterator<Item = CategoryCode> + '_ {
        self.groups.iter().map(|g| g.category)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Groups and failures for a whole batch
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub groups: CategoryGroups,
    pub failures: Vec<ImageFailure>,
    /// Images with a `Classified` outcome, whether or not they matched
    pub classified: usize,
}

/// Group outcomes by the selected categories.
///
/// Each classified image is appended to every group in the intersection of
/// its codes and the selection; failed images go to `failures` and to no
/// group. Categories that end up empty are omitted.
pub fn group(outcomes: &[ImageOutcome], selection: &Selection) -> Grouping {
    let mut buckets: BTreeMap<CategoryCode, Vec<Arc<Image>>> = BTreeMap::new();
    let mut failures = Vec::new();
    let mut classified = 0;

    for ImageOutcome { image, outcome } in outcomes {
        match outcome {
            ClassificationOutcome::Classified { codes } => {
                classified += 1;
                for code in codes.iter().filter(|code| selection.contains(code)) {
                    buckets.entry(*code).or_default().push(Arc::clone(image));
                }
            }
            ClassificationOutcome::Failed { reason } => {
                failures.push(ImageFailure {
                    image: image.name.clone(),
                    reason: reason.clone(),
                });
            }
        }
    }

    let groups = buckets
        .into_iter()
        .filter(|(_, images)| !images.is_empty())
        .map(|(category, images)| CategoryGroup { category, images })
        .collect();

    Grouping {
        groups: CategoryGroups { groups },
        failures,
        classified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CATALOG;

    fn code(c: &str) -> CategoryCode {
        CATALOG.lookup(c).unwrap()
    }

    fn classified(name: &str, codes: &[&str]) -> ImageOutcome {
        ImageOutcome {
            image: Arc::new(Image::new(name, vec![0u8])),
            outcome: ClassificationOutcome::classified(codes.iter().map(|c| code(c))),
        }
    }

    fn failed(name: &str, reason: ClassificationFailure) -> ImageOutcome {
        ImageOutcome {
            image: Arc::new(Image::new(name, vec![0u8])),
            outcome: ClassificationOutcome::failed(reason),
        }
    }

    fn names(grouping: &Grouping, c: &str) -> Vec<String> {
        grouping
            .groups
            .get(&code(c))
            .map(|g| g.image_names().map(String::from).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_three_image_batch() {
        let outcomes = vec![
            classified("A.jpg", &["1", "3.2"]),
            classified("B.jpg", &[]),
            failed("C.jpg", ClassificationFailure::Timeout),
        ];
        let selection = Selection::parse(["1", "3.2", "2.1"]).unwrap();

        let grouping = group(&outcomes, &selection);

        assert_eq!(grouping.groups.len(), 2);
        assert_eq!(names(&grouping, "1"), vec!["A.jpg"]);
        assert_eq!(names(&grouping, "3.2"), vec!["A.jpg"]);
        assert!(grouping.groups.get(&code("2.1")).is_none());
        assert_eq!(
            grouping.failures,
            vec![ImageFailure {
                image: "C.jpg".to_string(),
                reason: ClassificationFailure::Timeout,
            }]
        );
        assert_eq!(grouping.classified, 2);
    }

    #[test]
    fn test_codes_outside_selection_are_ignored() {
        let outcomes = vec![
            classified("a.jpg", &["2.4", "3.6"]),
            classified("b.jpg", &["3.6"]),
        ];
        let selection = Selection::parse(["2.4"]).unwrap();

        let grouping = group(&outcomes, &selection);

        let categories: Vec<_> = grouping.groups.categories().collect();
        assert_eq!(categories, vec![code("2.4")]);
        assert_eq!(names(&grouping, "2.4"), vec!["a.jpg"]);
        for g in grouping.groups.iter() {
            assert!(selection.contains(&g.category));
        }
    }

    #[test]
    fn test_group_order_follows_outcome_order() {
        let outcomes = vec![
            classified("z.jpg", &["3.1"]),
            classified("a.jpg", &["3.1"]),
            classified("m.jpg", &["3.1"]),
        ];
        let selection = Selection::parse(["3.1"]).unwrap();

        let grouping = group(&outcomes, &selection);

        assert_eq!(names(&grouping, "3.1"), vec!["z.jpg", "a.jpg", "m.jpg"]);
    }

    #[test]
    fn test_grouping_is_idempotent() {
        let outcomes = vec![
            classified("a.jpg", &["1", "2.1"]),
            failed("b.jpg", ClassificationFailure::EmptyReply),
            classified("c.jpg", &["2.1"]),
        ];
        let selection = Selection::all();

        let first = group(&outcomes, &selection);
        let second = group(&outcomes, &selection);

        let summarize = |g: &Grouping| -> Vec<(String, Vec<String>)> {
            g.groups
                .iter()
                .map(|grp| {
                    (
                        grp.category.to_string(),
                        grp.image_names().map(String::from).collect(),
                    )
                })
                .collect()
        };
        assert_eq!(summarize(&first), summarize(&second));
        assert_eq!(first.failures, second.failures);
    }

    #[test]
    fn test_no_empty_groups_and_full_accounting() {
        let outcomes = vec![
            classified("a.jpg", &[]),
            classified("b.jpg", &["3.8"]),
            failed("c.jpg", ClassificationFailure::Cancelled),
        ];
        let selection = Selection::all();

        let grouping = group(&outcomes, &selection);

        assert!(grouping.groups.iter().all(|g| !g.images.is_empty()));
        assert_eq!(grouping.groups.len(), 1);
        assert_eq!(grouping.classified + grouping.failures.len(), outcomes.len());
    }

    #[test]
    fn test_image_failure_serializes_reason_as_text() {
        let failure = ImageFailure {
            image: "C.jpg".to_string(),
            reason: ClassificationFailure::Timeout,
        };
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            serde_json::json!({ "image": "C.jpg", "reason": "timeout" })
        );
    }
}
