//! Per-portal outcomes of one request and the final status they imply.

use std::fmt;
use std::time::Duration;

use crate::request::UploadStatus;

/// Why a portal did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NotRecognized,
    NotImplemented,
    NoMapper,
    MapperError(String),
    MapperTimeout(Duration),
    OutputNotGenerated,
    OutputEmpty,
    OutputLocked,
    InsertFailed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotRecognized => f.write_str("not recognized"),
            FailureReason::NotImplemented => {
                f.write_str("not recognized: mapper not implemented")
            }
            FailureReason::NoMapper => f.write_str("no mapper available"),
            FailureReason::MapperError(msg) => write!(f, "mapper execution error: {}", msg),
            FailureReason::MapperTimeout(limit) => {
                write!(f, "mapper timed out after {}s", limit.as_secs())
            }
            FailureReason::OutputNotGenerated => f.write_str("output file not generated"),
            FailureReason::OutputEmpty => f.write_str("output file is empty"),
            FailureReason::OutputLocked => f.write_str("output file is locked"),
            FailureReason::InsertFailed(msg) => write!(f, "database insertion failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeState {
    Completed,
    Failed(FailureReason),
    NotAttempted,
}

/// Result for one requested portal name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalOutcome {
    /// Name as requested.
    pub portal_name: String,
    pub normalized_portal: Option<String>,
    pub state: OutcomeState,
}

impl PortalOutcome {
    pub fn completed(portal_name: &str, canonical: &str) -> Self {
        Self {
            portal_name: portal_name.to_string(),
            normalized_portal: Some(canonical.to_string()),
            state: OutcomeState::Completed,
        }
    }

    pub fn failed(portal_name: &str, canonical: Option<&str>, reason: FailureReason) -> Self {
        Self {
            portal_name: portal_name.to_string(),
            normalized_portal: canonical.map(str::to_string),
            state: OutcomeState::Failed(reason),
        }
    }

    pub fn not_attempted(portal_name: &str) -> Self {
        Self {
            portal_name: portal_name.to_string(),
            normalized_portal: None,
            state: OutcomeState::NotAttempted,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == OutcomeState::Completed
    }

    /// Diagnostic text, present only for failed outcomes.
    pub fn reason(&self) -> Option<String> {
        match &self.state {
            OutcomeState::Failed(reason) => Some(reason.to_string()),
            _ => None,
        }
    }
}

/// Accumulates outcomes across one request.
///
/// Outcomes are stored by position in the requested list, so a name listed
/// twice gets two outcomes. [`RequestReport::finalize`] marks every slot
/// that was never recorded as not attempted.
#[derive(Debug, Clone, Default)]
pub struct RequestReport {
    requested: Vec<String>,
    outcomes: Vec<Option<PortalOutcome>>,
    errors: Vec<String>,
}

impl RequestReport {
    pub fn new(requested: &[String]) -> Self {
        Self {
            requested: requested.to_vec(),
            outcomes: vec![None; requested.len()],
            errors: Vec::new(),
        }
    }

    /// Report for a request that failed before any portal ran.
    pub fn aborted(requested: &[String], error: impl Into<String>) -> Self {
        let mut report = Self::new(requested);
        report.record_error(error);
        report.finalize();
        report
    }

    /// Stores the outcome of the portal at `index`. Later writes to the
    /// same slot are ignored.
    pub fn record(&mut self, index: usize, outcome: PortalOutcome) {
        match self.outcomes.get_mut(index) {
            Some(Some(existing)) => log::warn!(
                "Ignoring second outcome for portal '{}' at position {}",
                existing.portal_name,
                index
            ),
            Some(slot) => *slot = Some(outcome),
            None => log::warn!("Ignoring outcome for out-of-range position {}", index),
        }
    }

    /// Records a processing error that is not tied to one portal outcome.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn finalize(&mut self) {
        for (slot, name) in self.outcomes.iter_mut().zip(&self.requested) {
            if slot.is_none() {
                log::warn!("Portal '{}' was never processed", name);
                *slot = Some(PortalOutcome::not_attempted(name));
            }
        }
    }

    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &PortalOutcome> {
        self.outcomes.iter().flatten()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn completed(&self) -> Vec<&PortalOutcome> {
        self.outcomes().filter(|o| o.is_completed()).collect()
    }

    pub fn failed(&self) -> Vec<&PortalOutcome> {
        self.outcomes()
            .filter(|o| matches!(o.state, OutcomeState::Failed(_)))
            .collect()
    }

    pub fn not_attempted(&self) -> Vec<&PortalOutcome> {
        self.outcomes()
            .filter(|o| o.state == OutcomeState::NotAttempted)
            .collect()
    }

    /// Terminal status of the request.
    ///
    /// `Completed` needs every portal completed and no error recorded;
    /// no completed portal at all is `Failed`; anything else is `Partial`.
    pub fn final_status(&self) -> UploadStatus {
        let completed = self.completed().len();
        if completed == 0 {
            return UploadStatus::Failed;
        }

        let all_completed = completed == self.requested.len()
            && self.outcomes.iter().all(|o| o.is_some());
        if all_completed && self.errors.is_empty() {
            UploadStatus::Completed
        } else {
            UploadStatus::Partial
        }
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} requested, {} completed, {} failed, {} not attempted, {} errors",
            self.requested.len(),
            self.completed().len(),
            self.failed().len(),
            self.not_attempted().len(),
            self.errors.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(FailureReason::NotRecognized.to_string(), "not recognized");
        assert_eq!(
            FailureReason::NotImplemented.to_string(),
            "not recognized: mapper not implemented"
        );
        assert_eq!(FailureReason::NoMapper.to_string(), "no mapper available");
        assert_eq!(
            FailureReason::MapperError("boom".into()).to_string(),
            "mapper execution error: boom"
        );
        assert_eq!(
            FailureReason::MapperTimeout(Duration::from_secs(600)).to_string(),
            "mapper timed out after 600s"
        );
        assert_eq!(
            FailureReason::OutputNotGenerated.to_string(),
            "output file not generated"
        );
        assert_eq!(
            FailureReason::InsertFailed("disk full".into()).to_string(),
            "database insertion failed: disk full"
        );
    }

    #[test]
    fn test_empty_request_is_failed() {
        let mut report = RequestReport::new(&[]);
        report.finalize();
        assert_eq!(report.final_status(), UploadStatus::Failed);
    }

    #[test]
    fn test_all_completed() {
        let requested = names(&["ADNIC", "GIG"]);
        let mut report = RequestReport::new(&requested);
        report.record(0, PortalOutcome::completed("ADNIC", "ADNIC"));
        report.record(1, PortalOutcome::completed("GIG", "GIG"));
        report.finalize();
        assert_eq!(report.final_status(), UploadStatus::Completed);
    }

    #[test]
    fn test_one_failure_is_partial() {
        let requested = names(&["ADNIC", "UNKNOWN_CO"]);
        let mut report = RequestReport::new(&requested);
        report.record(0, PortalOutcome::completed("ADNIC", "ADNIC"));
        report.record(
            1,
            PortalOutcome::failed("UNKNOWN_CO", None, FailureReason::NotRecognized),
        );
        report.finalize();
        assert_eq!(report.final_status(), UploadStatus::Partial);
        assert_eq!(report.failed()[0].reason().as_deref(), Some("not recognized"));
    }

    #[test]
    fn test_all_failed_is_failed() {
        let requested = names(&["UNKNOWN_CO"]);
        let mut report = RequestReport::new(&requested);
        report.record(
            0,
            PortalOutcome::failed("UNKNOWN_CO", None, FailureReason::NotRecognized),
        );
        report.finalize();
        assert_eq!(report.final_status(), UploadStatus::Failed);
    }

    #[test]
    fn test_recorded_error_downgrades_to_partial() {
        let requested = names(&["ADNIC"]);
        let mut report = RequestReport::new(&requested);
        report.record(0, PortalOutcome::completed("ADNIC", "ADNIC"));
        report.record_error("other_data could not be parsed");
        report.finalize();
        assert_eq!(report.final_status(), UploadStatus::Partial);
    }

    #[test]
    fn test_unrecorded_slots_become_not_attempted() {
        let requested = names(&["ADNIC", "DAMAN", "GIG"]);
        let mut report = RequestReport::new(&requested);
        report.record(0, PortalOutcome::completed("ADNIC", "ADNIC"));
        report.finalize();

        let skipped: Vec<&str> = report
            .not_attempted()
            .iter()
            .map(|o| o.portal_name.as_str())
            .collect();
        assert_eq!(skipped, vec!["DAMAN", "GIG"]);
        assert_eq!(report.outcomes().count(), 3);
        assert_eq!(report.final_status(), UploadStatus::Partial);
    }

    #[test]
    fn test_second_record_is_ignored() {
        let requested = names(&["ADNIC"]);
        let mut report = RequestReport::new(&requested);
        report.record(0, PortalOutcome::completed("ADNIC", "ADNIC"));
        report.record(
            0,
            PortalOutcome::failed("ADNIC", Some("ADNIC"), FailureReason::OutputEmpty),
        );
        report.record(5, PortalOutcome::completed("GIG", "GIG"));
        report.finalize();

        assert_eq!(report.outcomes().count(), 1);
        assert!(report.failed().is_empty());
    }

    #[test]
    fn test_aborted_report() {
        let requested = names(&["ADNIC", "BUPA"]);
        let report = RequestReport::aborted(&requested, "census file is empty");
        assert_eq!(report.not_attempted().len(), 2);
        assert_eq!(report.errors(), &["census file is empty".to_string()]);
        assert_eq!(report.final_status(), UploadStatus::Failed);
    }

    #[test]
    fn test_duplicates_get_separate_outcomes() {
        let requested = names(&["ADNIC", "ADNIC"]);
        let mut report = RequestReport::new(&requested);
        report.record(0, PortalOutcome::completed("ADNIC", "ADNIC"));
        report.record(
            1,
            PortalOutcome::failed("ADNIC", Some("ADNIC"), FailureReason::OutputNotGenerated),
        );
        report.finalize();
        assert_eq!(report.completed().len(), 1);
        assert_eq!(report.failed().len(), 1);
        assert!(report.summary().starts_with("2 requested, 1 completed, 1 failed"));
    }
}
