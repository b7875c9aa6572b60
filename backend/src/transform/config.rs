//! Declarative pipeline configuration.
//!
//! A pipeline can be described as JSON and built for any [`CatalogRecord`]:
//!
//! ```json
//! {
//!   "failure_policy": "skip_record",
//!   "operations": [
//!     { "type": "fix_ampersands" },
//!     { "type": "copy_name_to_attrs", "attribute": "Nazwa" },
//!     { "type": "extract_attribute", "attribute": "Wiek", "patterns": ["(\\d+\\+)"] },
//!     { "type": "pieces_count" },
//!     { "type": "collect_manufacturers" }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::operations::{
    CollectManufacturers, CopyNameToAttrs, ExtractAttribute, FixAmpersands, Operation, Tally,
    NAME_ATTRIBUTE,
};
use super::pipeline::{FailurePolicy, Pipeline};
use crate::error::{ConfigError, ConfigResult};
use crate::models::CatalogRecord;

/// One configured operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationSpec {
    /// Collapse over-escaped ampersands in name and descriptions
    FixAmpersands,

    /// Copy the display name into an attribute
    CopyNameToAttrs {
        #[serde(default = "default_name_attribute")]
        attribute: String,
    },

    /// Capture a value from the name with the first matching pattern
    ExtractAttribute {
        attribute: String,
        patterns: Vec<String>,
    },

    /// Piece count from Polish product names
    PiecesCount,

    /// Count records per manufacturer
    CollectManufacturers,
}

fn default_name_attribute() -> String {
    NAME_ATTRIBUTE.to_string()
}

impl OperationSpec {
    /// Parse a parameterless operation by name, as given on the command line.
    pub fn from_name(name: &str) -> ConfigResult<Self> {
        match name.trim().replace('-', "_").as_str() {
            "fix_ampersands" | "fix_amps" => Ok(Self::FixAmpersands),
            "copy_name_to_attrs" | "name_to_attrs" => Ok(Self::CopyNameToAttrs {
                attribute: default_name_attribute(),
            }),
            "pieces_count" => Ok(Self::PiecesCount),
            "collect_manufacturers" => Ok(Self::CollectManufacturers),
            _ => Err(ConfigError::InvalidValue {
                key: "operation".to_string(),
                value: name.to_string(),
            }),
        }
    }
}

/// Ordered operations plus the failure policy of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// A pipeline built from configuration, with the handles its accumulators report to.
pub struct BuiltPipeline<R> {
    pub pipeline: Pipeline<R>,
    /// Present when the configuration counts manufacturers.
    pub manufacturers: Option<Tally>,
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn push(&mut self, operation: OperationSpec) {
        self.operations.push(operation);
    }

    /// Instantiate every operation in order.
    ///
    /// All `collect_manufacturers` entries share one tally.
    pub fn build<R: CatalogRecord>(&self) -> ConfigResult<BuiltPipeline<R>> {
        let mut pipeline = Pipeline::new().with_policy(self.failure_policy);
        let mut manufacturers: Option<Tally> = None;

        for spec in &self.operations {
            let operation: Box<dyn Operation<R>> = match spec {
                OperationSpec::FixAmpersands => Box::new(FixAmpersands),
                OperationSpec::CopyNameToAttrs { attribute } => {
                    Box::new(CopyNameToAttrs::new(attribute.as_str()))
                }
                OperationSpec::ExtractAttribute {
                    attribute,
                    patterns,
                } => Box::new(ExtractAttribute::new(attribute.as_str(), patterns.as_slice())?),
                OperationSpec::PiecesCount => Box::new(ExtractAttribute::pieces_count()?),
                OperationSpec::CollectManufacturers => {
                    let tally = manufacturers.get_or_insert_with(Tally::new).clone();
                    Box::new(CollectManufacturers::new(tally))
                }
            };
            pipeline.push(operation);
        }

        Ok(BuiltPipeline {
            pipeline,
            manufacturers,
        })
    }
}

/// Names and descriptions of the configurable operations.
pub fn operations_description() -> &'static [(&'static str, &'static str)] {
    &[
        (
            "fix_ampersands",
            "Replace &amp;nbsp; with a space and &amp;amp; / &amp; with & in name and descriptions",
        ),
        (
            "copy_name_to_attrs",
            "Upsert attribute \"Nazwa\" with the secondary name, or the name when it is blank",
        ),
        (
            "extract_attribute",
            "Upsert an attribute from the first pattern matching the name (JSON config only)",
        ),
        (
            "pieces_count",
            "Upsert \"Całkowita liczba elementów\" from names like \"250 elementów\"",
        ),
        ("collect_manufacturers", "Count records per manufacturer"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Product, ProductWithName};
    use std::convert::Infallible;

    const CONFIG: &str = r#"{
        "failure_policy": "skip_record",
        "operations": [
            { "type": "fix_ampersands" },
            { "type": "copy_name_to_attrs" },
            { "type": "extract_attribute", "attribute": "Wiek", "patterns": ["(\\d+\\+)"] },
            { "type": "collect_manufacturers" }
        ]
    }"#;

    #[test]
    fn test_parse_config() {
        let config = PipelineConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::SkipRecord);
        assert_eq!(config.operations.len(), 4);
        assert_eq!(
            config.operations[1],
            OperationSpec::CopyNameToAttrs {
                attribute: "Nazwa".into()
            }
        );
    }

    #[test]
    fn test_build_applies_in_order() {
        let config = PipelineConfig::from_json(CONFIG).unwrap();
        let BuiltPipeline {
            mut pipeline,
            manufacturers,
        } = config.build::<Product>().unwrap();

        assert_eq!(
            pipeline.step_names(),
            vec![
                "fix_ampersands",
                "copy_name_to_attrs",
                "extract_attribute",
                "collect_manufacturers"
            ]
        );

        let record = Product {
            name: "Gra 8+ &amp;amp; karty".into(),
            manufacturer_name: "Trefl".into(),
            ..Default::default()
        };
        let out: Vec<_> = pipeline
            .run(vec![Ok::<_, Infallible>(record)])
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(out[0].name, "Gra 8+ & karty");
        assert_eq!(out[0].attributes.get("Nazwa"), Some("Gra 8+ & karty"));
        assert_eq!(out[0].attributes.get("Wiek"), Some("8+"));
        let tally = manufacturers.unwrap();
        assert_eq!(tally.snapshot().get("Trefl"), Some(&1));
    }

    #[test]
    fn test_build_for_extended_records() {
        let mut config = PipelineConfig::default();
        config.push(OperationSpec::from_name("copy-name-to-attrs").unwrap());
        let mut built = config.build::<ProductWithName>().unwrap();
        assert!(built.manufacturers.is_none());

        let record = ProductWithName {
            base: Product {
                name: "Lalka".into(),
                ..Default::default()
            },
            man_name: Some("Doll".into()),
        };
        let record = built.pipeline.apply(record).unwrap();
        assert_eq!(record.base.attributes.get("Nazwa"), Some("Doll"));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(matches!(
            PipelineConfig::from_json(r#"{"operations":[{"type":"explode"}]}"#),
            Err(ConfigError::Json(_))
        ));

        let config = PipelineConfig::from_json(
            r#"{"operations":[{"type":"extract_attribute","attribute":"x","patterns":["("]}]}"#,
        )
        .unwrap();
        assert!(matches!(
            config.build::<Product>(),
            Err(ConfigError::InvalidPattern { .. })
        ));

        assert!(OperationSpec::from_name("teleport").is_err());
    }
}
