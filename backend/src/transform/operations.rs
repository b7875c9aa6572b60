//! Pipeline operations.
//!
//! An [`Operation`] takes a record and returns it, possibly modified. Stateless
//! operations are pure functions of the record; accumulators such as
//! [`CollectManufacturers`] also update state that is read through a handle.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use regex::Regex;

use crate::error::{ConfigError, ConfigResult, OperationResult};
use crate::models::CatalogRecord;

/// Attribute written by [`CopyNameToAttrs`] unless configured otherwise.
pub const NAME_ATTRIBUTE: &str = "Nazwa";

/// Attribute written by [`ExtractAttribute::pieces_count`].
pub const PIECES_ATTRIBUTE: &str = "Całkowita liczba elementów";

/// Patterns tried in order by [`ExtractAttribute::pieces_count`].
pub const PIECES_PATTERNS: &[&str] = &[r"(\d+)\s+elementów", r"(\d+)\s+elem", r"(\d+)\s+el\."];

/// A single record-in, record-out step.
pub trait Operation<R>: Send {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &str;

    fn apply(&mut self, record: R) -> OperationResult<R>;
}

impl<R, O: Operation<R> + ?Sized> Operation<R> for Box<O> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn apply(&mut self, record: R) -> OperationResult<R> {
        (**self).apply(record)
    }
}

// =============================================================================
// Stateless transforms
// =============================================================================

/// Collapse over-escaped ampersands in name and description fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixAmpersands;

/// `&amp;nbsp;` → space, `&amp;amp;` → `&`, `&amp;` → `&`, in that order.
pub fn fix_amps(text: &str) -> String {
    text.replace("&amp;nbsp;", " ")
        .replace("&amp;amp;", "&")
        .replace("&amp;", "&")
}

impl<R: CatalogRecord> Operation<R> for FixAmpersands {
    fn name(&self) -> &str {
        "fix_ampersands"
    }

    fn apply(&mut self, mut record: R) -> OperationResult<R> {
        for text in record.free_text_mut() {
            if text.contains("&amp;") {
                *text = fix_amps(text);
            }
        }
        Ok(record)
    }
}

/// Store the record's display name as an attribute.
///
/// Uses the secondary name when the record has a non-blank one, the primary
/// name otherwise.
#[derive(Debug, Clone)]
pub struct CopyNameToAttrs {
    attribute: String,
}

impl CopyNameToAttrs {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }
}

impl Default for CopyNameToAttrs {
    fn default() -> Self {
        Self::new(NAME_ATTRIBUTE)
    }
}

impl<R: CatalogRecord> Operation<R> for CopyNameToAttrs {
    fn name(&self) -> &str {
        "copy_name_to_attrs"
    }

    fn apply(&mut self, mut record: R) -> OperationResult<R> {
        let value = record
            .secondary_name()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| record.name())
            .to_string();
        record.attributes_mut().upsert(self.attribute.as_str(), value);
        Ok(record)
    }
}

/// Capture a value from the record name into an attribute.
///
/// Patterns are tried in order; the first one that matches wins and its first
/// capture group (or whole match, without groups) becomes the value.
#[derive(Debug, Clone)]
pub struct ExtractAttribute {
    attribute: String,
    patterns: Vec<Regex>,
}

impl ExtractAttribute {
    pub fn new<P: AsRef<str>>(attribute: impl Into<String>, patterns: &[P]) -> ConfigResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            attribute: attribute.into(),
            patterns,
        })
    }

    /// Total piece count, as written in Polish product names ("250 elementów").
    pub fn pieces_count() -> ConfigResult<Self> {
        Self::new(PIECES_ATTRIBUTE, PIECES_PATTERNS)
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    fn extract<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.patterns.iter().find_map(|re| {
            let caps = re.captures(text)?;
            caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
        })
    }
}

impl<R: CatalogRecord> Operation<R> for ExtractAttribute {
    fn name(&self) -> &str {
        "extract_attribute"
    }

    fn apply(&mut self, mut record: R) -> OperationResult<R> {
        if let Some(value) = self.extract(record.name()).map(str::to_string) {
            record.attributes_mut().upsert(self.attribute.as_str(), value);
        }
        Ok(record)
    }
}

// =============================================================================
// Accumulators
// =============================================================================

/// Shared read handle over per-key counts.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    counts: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    fn increment(&self, key: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Copy of the counts accumulated so far.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total(&self) -> u64 {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }
}

/// Count records per manufacturer. Records pass through unchanged.
#[derive(Debug, Clone)]
pub struct CollectManufacturers {
    tally: Tally,
}

impl CollectManufacturers {
    pub fn new(tally: Tally) -> Self {
        Self { tally }
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }
}

impl<R: CatalogRecord> Operation<R> for CollectManufacturers {
    fn name(&self) -> &str {
        "collect_manufacturers"
    }

    fn apply(&mut self, record: R) -> OperationResult<R> {
        self.tally.increment(record.manufacturer_name());
        Ok(record)
    }
}

// =============================================================================
// Closures
// =============================================================================

/// A named closure used as an operation.
pub struct FnOperation<F> {
    name: String,
    f: F,
}

impl<F> FnOperation<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<R, F> Operation<R> for FnOperation<F>
where
    F: FnMut(R) -> OperationResult<R> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, record: R) -> OperationResult<R> {
        (self.f)(record)
    }
}
