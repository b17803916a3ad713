//! Progress and result reporting.
//!
//! Live feedback (sync indicator, status changes, error details) goes
//! through the [`Reporter`] trait on stderr. Final results are rendered by
//! [`render_result`] / [`render_report`] for stdout.

use crate::monitor::JobSnapshot;
use crate::types::{DeploymentResult, PromotionResult, WorkItem};
use std::fmt::Write as _;

/// How much the user wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    Concise,
    #[default]
    Normal,
    Verbose,
    Json,
}

/// Live feedback while a command runs.
pub trait Reporter: Send + Sync {
    /// The remote is still synchronizing source control; retries begin.
    fn sync_started(&self);

    /// Retries ended, either because a request went through or because
    /// they gave up.
    fn sync_finished(&self, resolved: bool);

    /// A promotion job exists remotely.
    fn job_started(&self, job_id: &str);

    /// A non-final status update arrived for the watched job.
    fn progress(&self, snapshot: &JobSnapshot);

    /// The watched job reported error details, possibly before finishing.
    fn error_details(&self, job_id: &str, details: &str);
}

/// Reporter that prints to stderr.
pub struct ConsoleReporter {
    mode: OutputMode,
}

impl ConsoleReporter {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    fn quiet(&self) -> bool {
        matches!(self.mode, OutputMode::Json | OutputMode::Concise)
    }
}

impl Reporter for ConsoleReporter {
    fn sync_started(&self) {
        if !self.quiet() {
            eprintln!("Waiting for source control changes to finish synchronizing...");
        }
    }

    fn sync_finished(&self, resolved: bool) {
        if !self.quiet() {
            if resolved {
                eprintln!("Synchronization finished.");
            } else {
                eprintln!("Synchronization did not finish.");
            }
        }
    }

    fn job_started(&self, job_id: &str) {
        if self.mode != OutputMode::Json {
            eprintln!("Promotion job started: {}", job_id);
        }
    }

    fn progress(&self, snapshot: &JobSnapshot) {
        if self.mode == OutputMode::Verbose {
            match &snapshot.message {
                Some(msg) => eprintln!("[{}] {}: {}", snapshot.job_id, snapshot.status, msg),
                None => eprintln!("[{}] {}", snapshot.job_id, snapshot.status),
            }
        }
    }

    fn error_details(&self, job_id: &str, details: &str) {
        if self.mode != OutputMode::Json {
            eprintln!("[{}] error details: {}", job_id, details);
        }
    }
}

/// Reporter that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn sync_started(&self) {}
    fn sync_finished(&self, _resolved: bool) {}
    fn job_started(&self, _job_id: &str) {}
    fn progress(&self, _snapshot: &JobSnapshot) {}
    fn error_details(&self, _job_id: &str, _details: &str) {}
}

/// Render a command result for stdout.
pub fn render_result(result: &PromotionResult, mode: OutputMode) -> String {
    if mode == OutputMode::Json {
        return serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string());
    }

    let mut out = String::new();
    let Some(status) = result.status else {
        let _ = writeln!(out, "Job ID: {}", result.job_id);
        if mode != OutputMode::Concise {
            let _ = writeln!(
                out,
                "Run `devops-promote resume --job-id {}` to watch it, or `devops-promote report --job-id {}` to check on it.",
                result.job_id, result.job_id
            );
        }
        return out;
    };

    let _ = writeln!(out, "Job ID: {}", result.job_id);
    let _ = writeln!(out, "Status: {}", status);
    if mode == OutputMode::Concise {
        return out;
    }
    if let Some(message) = &result.message {
        let _ = writeln!(out, "Message: {}", message);
    }
    if let Some(details) = &result.error_details {
        let _ = writeln!(out, "Error details: {}", details);
    }
    if let Some(deployment_id) = &result.deployment_id {
        let _ = writeln!(out, "Deployment ID: {}", deployment_id);
        let _ = writeln!(
            out,
            "Run `devops-promote quick --deployment-id {}` to deploy the validated changes.",
            deployment_id
        );
    }
    out
}

/// Render a report, including deployment details and work items when present.
pub fn render_report(
    result: &PromotionResult,
    deployment: Option<&DeploymentResult>,
    work_items: &[WorkItem],
    mode: OutputMode,
) -> String {
    if mode == OutputMode::Json {
        let json = serde_json::json!({
            "result": result,
            "deployment": deployment,
            "workItems": work_items,
        });
        return serde_json::to_string_pretty(&json).unwrap_or_else(|_| "{}".to_string());
    }

    let mut out = render_result(result, mode);
    if mode != OutputMode::Verbose {
        return out;
    }
    if let Some(deployment) = deployment {
        let kind = if deployment.check_deploy {
            "validation"
        } else {
            "deployment"
        };
        let _ = writeln!(
            out,
            "Remote {}: {}",
            kind,
            deployment.deployment_id.as_deref().unwrap_or("-")
        );
    }
    if !work_items.is_empty() {
        let _ = writeln!(out, "Work items:");
        for item in work_items {
            let _ = writeln!(
                out,
                "  {}  {}",
                item.name,
                item.subject.as_deref().unwrap_or("")
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::AsyncOperationStatus;

    fn finished() -> PromotionResult {
        PromotionResult {
            job_id: "0Af000000000001AAA".to_string(),
            status: Some(AsyncOperationStatus::Error),
            message: Some("Deploy failed".to_string()),
            error_details: Some("Apex test failure".to_string()),
            deployment_id: None,
        }
    }

    #[test]
    fn test_render_async_start() {
        let out = render_result(
            &PromotionResult::started("0Af000000000001AAA"),
            OutputMode::Normal,
        );
        assert!(out.contains("Job ID: 0Af000000000001AAA"));
        assert!(out.contains("resume --job-id 0Af000000000001AAA"));

        let concise = render_result(
            &PromotionResult::started("0Af000000000001AAA"),
            OutputMode::Concise,
        );
        assert!(!concise.contains("resume"));
    }

    #[test]
    fn test_render_finished_modes() {
        let normal = render_result(&finished(), OutputMode::Normal);
        assert!(normal.contains("Status: Error"));
        assert!(normal.contains("Error details: Apex test failure"));

        let concise = render_result(&finished(), OutputMode::Concise);
        assert!(concise.contains("Status: Error"));
        assert!(!concise.contains("Apex test failure"));

        let json = render_result(&finished(), OutputMode::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["jobId"], "0Af000000000001AAA");
        assert_eq!(value["errorDetails"], "Apex test failure");
    }

    #[test]
    fn test_render_report_verbose_lists_work_items() {
        let items = vec![WorkItem {
            id: "a01".to_string(),
            name: "WI-000001".to_string(),
            subject: Some("Add field".to_string()),
            change_bundle_id: "cb1".to_string(),
        }];
        let deployment = DeploymentResult {
            id: "d01".to_string(),
            deployment_id: Some("0Af00000000DEPL".to_string()),
            check_deploy: true,
            change_bundle_ids: vec!["cb1".to_string()],
        };

        let out = render_report(&finished(), Some(&deployment), &items, OutputMode::Verbose);
        assert!(out.contains("Remote validation: 0Af00000000DEPL"));
        assert!(out.contains("WI-000001  Add field"));

        let normal = render_report(&finished(), Some(&deployment), &items, OutputMode::Normal);
        assert!(!normal.contains("WI-000001"));
    }
}
