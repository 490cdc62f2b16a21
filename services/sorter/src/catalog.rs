//! Fixed category taxonomy.
//!
//! The catalog is compiled into the binary and never mutated. A
//! [`CategoryCode`] can only be obtained through [`Catalog::lookup`], so any
//! code held by the rest of the service is known to be valid.

use crate::error::RequestError;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// A single taxonomy entry
#[derive(Debug)]
pub struct Category {
    /// Short identifier, e.g. "3.2"
    pub code: &'static str,
    /// Human-readable name used in manifests and archive filenames
    pub name: &'static str,
    /// Wording used when describing the category to the classifier
    pub description: &'static str,
}

const fn category(code: &'static str, name: &'static str, description: &'static str) -> Category {
    Category {
        code,
        name,
        description,
    }
}

const CATEGORIES: [Category; 16] = [
    category("1", "Natural Landscape (No People)", "Natural landscape (no people)"),
    category("2.1", "One Person", "One person"),
    category("2.2", "Two People", "Two people"),
    category("2.3", "More than Two People", "More than two people"),
    category("2.4", "City Scene", "City scene"),
    category("2.5", "Natural Landscape with People", "Natural landscape (with people)"),
    category("2.6", "Food Present", "Food present"),
    category("3.0", "Indoor Scene", "Indoor scene"),
    category("3.1", "Pets or Animals", "Pets or animals"),
    category("3.2", "Nighttime or Low-light", "Nighttime or low-light"),
    category("3.3", "Group Selfie or Posed Group", "Group selfie or posed group"),
    category("3.4", "Artistic or Abstract Image", "Artistic or abstract image"),
    category("3.5", "Text-heavy Image", "Text-heavy image (e.g. signs, menus)"),
    category("3.6", "Vehicles or Transportation", "Vehicles or transportation"),
    category("3.7", "Child or Baby Present", "Child or baby present"),
    category("3.8", "Celebration or Event", "Celebration or event"),
];

/// The process-wide catalog
pub static CATALOG: Catalog = Catalog {
    entries: &CATEGORIES,
};

/// Lookup of a code that is not part of the taxonomy
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown category code: {0}")]
pub struct UnknownCategory(pub String);

/// Read-only view over the category table
#[derive(Debug)]
pub struct Catalog {
    entries: &'static [Category],
}

impl Catalog {
    /// Check whether `code` names a catalog entry exactly
    pub fn is_valid(&self, code: &str) -> bool {
        self.entries.iter().any(|c| c.code == code)
    }

    /// Resolve a code to its human-readable name
    pub fn name_of(&self, code: &str) -> Result<&'static str, UnknownCategory> {
        self.entries
            .iter()
            .find(|c| c.code == code)
            .map(|c| c.name)
            .ok_or_else(|| UnknownCategory(code.to_string()))
    }

    /// Resolve a code to a typed [`CategoryCode`]
    pub fn lookup(&self, code: &str) -> Option<CategoryCode> {
        self.entries
            .iter()
            .find(|c| c.code == code)
            .map(CategoryCode)
    }

    /// All entries in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &'static Category> {
        self.entries.iter()
    }

    /// All codes in catalog order
    pub fn codes(&self) -> impl Iterator<Item = CategoryCode> {
        self.entries.iter().map(CategoryCode)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A category code known to exist in the catalog
#[derive(Clone, Copy)]
pub struct CategoryCode(&'static Category);

impl CategoryCode {
    pub fn as_str(&self) -> &'static str {
        self.0.code
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }
}

impl PartialEq for CategoryCode {
    fn eq(&self, other: &Self) -> bool {
        self.0.code == other.0.code
    }
}

impl Eq for CategoryCode {}

impl PartialOrd for CategoryCode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CategoryCode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.code.cmp(other.0.code)
    }
}

impl Hash for CategoryCode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.code.hash(state);
    }
}

impl fmt::Debug for CategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CategoryCode({})", self.0.code)
    }
}

impl fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.code)
    }
}

impl Serialize for CategoryCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.code)
    }
}

/// The caller's chosen categories for a batch. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    codes: BTreeSet<CategoryCode>,
}

impl Selection {
    /// Validate caller-supplied codes against the catalog.
    ///
    /// The first unknown code is rejected; duplicates collapse.
    pub fn parse<I, S>(codes: I) -> Result<Self, RequestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selected = BTreeSet::new();

        for raw in codes {
            let raw = raw.as_ref().trim();
            let code = CATALOG
                .lookup(raw)
                .ok_or_else(|| RequestError::UnknownCategory {
                    code: raw.to_string(),
                })?;
            selected.insert(code);
        }

        if selected.is_empty() {
            return Err(RequestError::EmptySelection);
        }

        Ok(Self { codes: selected })
    }

    /// Every catalog category
    pub fn all() -> Self {
        Self {
            codes: CATALOG.codes().collect(),
        }
    }

    pub fn contains(&self, code: &CategoryCode) -> bool {
        self.codes.contains(code)
    }

    /// Selected codes in catalog order
    pub fn iter(&self) -> impl Iterator<Item = CategoryCode> + '_ {
        self.codes.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_sixteen_entries() {
        assert_eq!(CATALOG.len(), 16);
        let codes: Vec<_> = CATALOG.iter().map(|c| c.code).collect();
        let mut sorted = codes.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(codes, sorted, "catalog must be in code order without duplicates");
    }

    #[test]
    fn test_name_of() {
        assert_eq!(CATALOG.name_of("1").unwrap(), "Natural Landscape (No People)");
        assert_eq!(CATALOG.name_of("3.7").unwrap(), "Child or Baby Present");
        assert_eq!(
            CATALOG.name_of("9.9"),
            Err(UnknownCategory("9.9".to_string()))
        );
    }

    #[test]
    fn test_is_valid_requires_exact_match() {
        assert!(CATALOG.is_valid("3.0"));
        assert!(!CATALOG.is_valid("3"));
        assert!(!CATALOG.is_valid(" 3.2"));
        assert!(!CATALOG.is_valid("banana"));
    }

    #[test]
    fn test_category_code_serializes_as_string() {
        let code = CATALOG.lookup("3.2").unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"3.2\"");
        assert_eq!(code.name(), "Nighttime or Low-light");
    }

    #[test]
    fn test_selection_rejects_empty() {
        let empty: Vec<&str> = vec![];
        assert_eq!(Selection::parse(empty), Err(RequestError::EmptySelection));
    }

    #[test]
    fn test_selection_rejects_unknown_code() {
        let err = Selection::parse(["1", "9.9"]).unwrap_err();
        assert_eq!(
            err,
            RequestError::UnknownCategory {
                code: "9.9".to_string()
            }
        );
        assert!(err.to_string().contains("9.9"));
    }

    #[test]
    fn test_selection_dedups_and_orders() {
        let selection = Selection::parse(["3.2", "1", "3.2", " 2.1 "]).unwrap();
        let codes: Vec<_> = selection.iter().map(|c| c.as_str()).collect();
        assert_eq!(codes, vec!["1", "2.1", "3.2"]);
    }

    #[test]
    fn test_selection_all_covers_catalog() {
        assert_eq!(Selection::all().len(), CATALOG.len());
    }
}
