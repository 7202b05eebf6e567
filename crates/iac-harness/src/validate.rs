//! Static module validation.
//!
//! Validation never touches remote state: the module directory is
//! initialized without a backend, then the tool's validate mode checks
//! syntax and internal consistency.

use crate::errors::HarnessError;
use crate::run_config::RunConfig;
use crate::tool::{args, ProvisioningTool, RunControl, Stage};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// One validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: String,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
}

impl Diagnostic {
    fn render(&self) -> String {
        if self.detail.is_empty() {
            self.summary.clone()
        } else {
            format!("{}: {}", self.summary, self.detail)
        }
    }
}

/// `validate -json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub warning_count: u64,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationReport {
    /// Error diagnostics joined into one message.
    pub fn error_detail(&self) -> String {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == "error")
            .map(Diagnostic::render)
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == "warning")
    }
}

/// Runs init (without backend) and validate.
#[derive(Debug, Clone)]
pub struct Validator {
    tool: ProvisioningTool,
}

impl Validator {
    pub fn new(tool: ProvisioningTool) -> Self {
        Self { tool }
    }

    /// Validate the module at `config`'s working directory.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Validation` with the tool diagnostics if init
    /// or validate fails, or the runner's `Timeout`/`Cancelled`/`Launch`.
    #[instrument(skip_all, fields(module = %config.working_dir().display()))]
    pub async fn validate(
        &self,
        config: &RunConfig,
        control: &RunControl,
    ) -> Result<ValidationReport, HarnessError> {
        self.tool
            .init(config, control, false, HarnessError::Validation)
            .await?;

        let invocation = self
            .tool
            .invocation(Stage::Validate, config)
            .args(args::validate());
        let output = self.tool.invoke(&invocation, control, &[]).await?;

        let report = match serde_json::from_str::<ValidationReport>(&output.stdout) {
            Ok(report) => report,
            Err(_) if output.success() => ValidationReport {
                valid: true,
                ..ValidationReport::default()
            },
            Err(_) => {
                return Err(HarnessError::Validation(output.diagnostic_text()));
            }
        };

        if !report.valid || !output.success() {
            let detail = report.error_detail();
            let detail = if detail.is_empty() {
                output.diagnostic_text()
            } else {
                detail
            };
            warn!(
                target: "iac.harness.validate",
                error_count = report.error_count,
                "Module failed validation"
            );
            return Err(HarnessError::Validation(detail));
        }

        for warning in report.warnings() {
            warn!(target: "iac.harness.validate", warning = %warning.render(), "Validation warning");
        }
        info!(
            target: "iac.harness.validate",
            warning_count = report.warning_count,
            "Module is valid"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invalid_report() {
        let json = r#"{
            "format_version": "1.0",
            "valid": false,
            "error_count": 1,
            "warning_count": 1,
            "diagnostics": [
                {"severity": "error", "summary": "Unsupported argument", "detail": "An argument named \"nme\" is not expected here."},
                {"severity": "warning", "summary": "Deprecated attribute"}
            ]
        }"#;
        let report: ValidationReport = serde_json::from_str(json).unwrap();

        assert!(!report.valid);
        assert_eq!(
            report.error_detail(),
            "Unsupported argument: An argument named \"nme\" is not expected here."
        );
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_parse_valid_report() {
        let json = r#"{"valid": true, "error_count": 0, "warning_count": 0, "diagnostics": []}"#;
        let report: ValidationReport = serde_json::from_str(json).unwrap();
        assert!(report.valid);
        assert!(report.error_detail().is_empty());
    }
}
