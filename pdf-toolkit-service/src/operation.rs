//! The uniform result envelope and the closed set of named operations.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::{ServiceError, format_error_chain};

/// Success/failure envelope returned by every document-processing call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    /// Paths inside the service; the API layer swaps these for file ids
    #[serde(default)]
    pub output_files: Vec<String>,
    /// Seconds
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            errors: vec![error.into()],
            ..Default::default()
        }
    }

    /// Failed envelope carrying the full error chain
    pub fn from_error(operation: Operation, error: &ServiceError) -> Self {
        Self::failure(
            format!("{} failed", operation),
            format_error_chain(error),
        )
    }

    pub fn with_output(mut self, path: impl AsRef<Path>) -> Self {
        self.output_files
            .push(path.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn with_outputs<P: AsRef<Path>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        for path in paths {
            self = self.with_output(path);
        }
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// Stamp the elapsed time since `start`
    pub fn timed(mut self, start: Instant) -> Self {
        self.execution_time = start.elapsed().as_secs_f64();
        self
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.output_files.iter().map(PathBuf::from).collect()
    }

    /// Set a key on the `data` object, creating it when absent
    pub fn set_data_field(&mut self, key: &str, value: serde_json::Value) {
        match self.data.as_mut() {
            Some(serde_json::Value::Object(map)) => {
                map.insert(key.to_string(), value);
            }
            _ => {
                let mut map = serde_json::Map::new();
                map.insert(key.to_string(), value);
                self.data = Some(serde_json::Value::Object(map));
            }
        }
    }
}

/// Operations addressable by name (batch jobs, metrics labels, cache keys)
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Merge,
    Split,
    Rotate,
    ExtractPages,
    ReorderPages,
    ExtractText,
    ExtractImages,
    ExtractTables,
    ExtractMetadata,
    ExtractLinks,
    Ocr,
    ConvertToImages,
    ConvertToText,
    ConvertToHtml,
    ConvertToMarkdown,
    AddPassword,
    RemovePassword,
    SetPermissions,
    AddWatermark,
    Compress,
    OptimizeWeb,
    Summarize,
    Analyze,
    Classify,
}

impl Operation {
    /// Whether the operation can run on one file at a time inside a batch
    pub fn is_batchable(self) -> bool {
        !matches!(self, Operation::Merge)
    }

    /// Whether identical input and parameters always produce identical output
    pub fn is_cacheable(self) -> bool {
        matches!(
            self,
            Operation::ConvertToImages
                | Operation::ConvertToText
                | Operation::ConvertToHtml
                | Operation::ConvertToMarkdown
                | Operation::ExtractText
                | Operation::Ocr
                | Operation::Summarize
                | Operation::Analyze
                | Operation::Classify
        )
    }

    pub fn parse(name: &str) -> Result<Self, ServiceError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::invalid("Operation cannot be empty"));
        }
        trimmed
            .parse::<Operation>()
            .map_err(|_| ServiceError::invalid(format!("Unsupported operation: {}", trimmed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_operation_names_round_trip_through_strings() {
        for op in Operation::iter() {
            assert_eq!(Operation::parse(op.as_ref()).unwrap(), op);
        }
        assert_eq!(Operation::ExtractPages.to_string(), "extract_pages");
    }

    #[test]
    fn test_parse_rejects_unknown_and_empty() {
        assert!(Operation::parse("").is_err());
        assert!(Operation::parse("teleport").is_err());
        assert_eq!(Operation::parse(" ocr ").unwrap(), Operation::Ocr);
    }

    #[test]
    fn test_merge_is_not_batchable() {
        assert!(!Operation::Merge.is_batchable());
        assert!(Operation::Compress.is_batchable());
    }

    #[test]
    fn test_result_builders() {
        let mut result = OperationResult::ok("done")
            .with_output("/tmp/a.pdf")
            .with_warning("careful")
            .with_data(serde_json::json!({"pages": 3}));
        result.set_data_field("cached", serde_json::json!(true));

        assert!(result.success);
        assert_eq!(result.output_files, vec!["/tmp/a.pdf"]);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.data.as_ref().unwrap()["pages"], 3);
        assert_eq!(result.data.as_ref().unwrap()["cached"], true);
    }

    #[test]
    fn test_failure_serializes_without_data() {
        let result = OperationResult::failure("merge failed", "boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errors"][0], "boom");
        assert!(json.get("data").is_none());
    }
}
