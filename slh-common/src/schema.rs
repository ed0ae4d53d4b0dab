//! Machine-readable exports: JSON schemas for harness reports and the
//! error code catalog.
//!
//! # Generated Files
//!
//! - `suite-report.schema.json` - [`SuiteReport`](crate::harness::SuiteReport) returned by suite teardown
//! - `reap-plan.schema.json` - `ReapPlan` as printed by `slh reap-plan`
//! - `error-codes.json` - every `SLH-E` code with remediation

use crate::errors::catalog::{ErrorCategory, ErrorCode};
use crate::harness::reaper::ReapPlan;
use crate::harness::report::report_schema;
use schemars::schema::RootSchema;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version of the exported catalog layout.
pub const CATALOG_SCHEMA_VERSION: &str = "1.0";

#[must_use]
pub fn generate_report_schema() -> RootSchema {
    report_schema()
}

#[must_use]
pub fn generate_reap_plan_schema() -> RootSchema {
    schema_for!(ReapPlan)
}

/// One error code with its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCodeEntry {
    pub code: String,
    pub number: u16,
    pub category: ErrorCategory,
    pub message: String,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCategoryEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub code_range: String,
    /// Whether codes in this category stop the suite.
    pub halts_suite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorCatalog {
    pub schema_version: String,
    pub harness_version: String,
    pub categories: Vec<ErrorCategoryEntry>,
    pub errors: Vec<ErrorCodeEntry>,
}

#[must_use]
pub fn generate_error_catalog() -> ErrorCatalog {
    let categories = ErrorCategory::all()
        .iter()
        .map(|category| ErrorCategoryEntry {
            id: category.name().to_lowercase(),
            name: category.name().to_string(),
            description: category.description().to_string(),
            code_range: category.code_range().to_string(),
            halts_suite: category.halts_suite(),
        })
        .collect();

    let errors = ErrorCode::all()
        .iter()
        .map(|code| ErrorCodeEntry {
            code: code.code_string(),
            number: code.code_number(),
            category: code.category(),
            message: code.message().to_string(),
            remediation: code
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        })
        .collect();

    ErrorCatalog {
        schema_version: CATALOG_SCHEMA_VERSION.to_string(),
        harness_version: env!("CARGO_PKG_VERSION").to_string(),
        categories,
        errors,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaExportResult {
    pub files_generated: usize,
    pub files: Vec<String>,
    pub output_dir: String,
}

/// Write every schema and the error catalog into `output_dir`.
///
/// # Errors
///
/// Returns error if directory creation or file writing fails.
pub fn export_schemas(output_dir: &Path) -> std::io::Result<SchemaExportResult> {
    use std::fs;

    fs::create_dir_all(output_dir)?;

    let exports: [(&str, serde_json::Value); 3] = [
        (
            "suite-report.schema.json",
            serde_json::to_value(generate_report_schema())?,
        ),
        (
            "reap-plan.schema.json",
            serde_json::to_value(generate_reap_plan_schema())?,
        ),
        (
            "error-codes.json",
            serde_json::to_value(generate_error_catalog())?,
        ),
    ];

    let mut files = Vec::new();
    for (name, value) in exports {
        let path = output_dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(&value)?)?;
        files.push(path.display().to_string());
    }

    Ok(SchemaExportResult {
        files_generated: files.len(),
        files,
        output_dir: output_dir.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_guard;

    #[test]
    fn test_report_schema_mentions_outcome() {
        let _guard = test_guard!();
        let json = serde_json::to_string(&generate_report_schema()).unwrap();
        assert!(json.contains("outcome"));
        assert!(json.contains("budget_exceeded"));
        assert!(json.contains("reset_failures"));
    }

    #[test]
    fn test_error_catalog_covers_every_code() {
        let _guard = test_guard!();
        let catalog = generate_error_catalog();
        assert_eq!(catalog.schema_version, "1.0");
        assert_eq!(catalog.categories.len(), 6);
        assert_eq!(catalog.errors.len(), ErrorCode::all().len());

        let first = &catalog.errors[0];
        assert_eq!(first.code, "SLH-E001");
        assert_eq!(first.category, ErrorCategory::Setup);

        let budget = catalog.categories.iter().find(|c| c.id == "budget").unwrap();
        assert_eq!(budget.code_range, "400-499");
        assert!(!budget.halts_suite);
    }

    #[test]
    fn test_export_schemas_to_temp_dir() {
        let _guard = test_guard!();
        let dir = tempfile::tempdir().unwrap();
        let result = export_schemas(dir.path()).unwrap();

        assert_eq!(result.files_generated, 3);
        for file in &result.files {
            let content = std::fs::read_to_string(file).unwrap();
            let _: serde_json::Value = serde_json::from_str(&content).unwrap();
        }
        assert!(result.files.iter().any(|f| f.ends_with("error-codes.json")));
    }
}
