//! Assertions over pipeline results.

use crate::core::{PipelineResult, RunStatus};
use crate::errors::ErrorKind;

/// Asserts that the run succeeded.
pub fn assert_pipeline_succeeded(result: &PipelineResult) {
    assert!(
        result.success,
        "Expected success, got status {:?} with error {:?}",
        result.status, result.error
    );
    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.final_output.is_some(), "Successful run has no final output");
}

/// Asserts that the run failed with an error of `kind`.
pub fn assert_pipeline_failed_with(result: &PipelineResult, kind: ErrorKind) {
    assert!(!result.success, "Expected failure, but the run succeeded");
    let actual = result.error.as_ref().map(crate::errors::PipelineError::kind);
    assert_eq!(
        actual,
        Some(kind),
        "Expected error kind {kind}, got {:?}",
        result.error
    );
    assert!(result.final_output.is_none(), "Failed run carries a final output");
}

/// Asserts the exact phase names recorded, in order.
pub fn assert_phase_names(result: &PipelineResult, expected: &[&str]) {
    let actual: Vec<&str> = result.phases.iter().map(|p| p.phase.as_str()).collect();
    assert_eq!(actual, expected, "Unexpected phase sequence");
}

/// Asserts that every recorded phase took time and the total covers them.
pub fn assert_timing_consistent(result: &PipelineResult) {
    for phase in &result.phases {
        assert!(
            !phase.execution_time.is_zero(),
            "Phase '{}' has a zero execution time",
            phase.phase
        );
    }
    assert!(
        result.total_execution_time >= result.phase_time_sum(),
        "Total {:?} is below the phase sum {:?}",
        result.total_execution_time,
        result.phase_time_sum()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ImageMetadata, InputPayload, PhaseData, PhaseKind, PhaseResult};
    use crate::errors::PipelineError;
    use std::time::Duration;

    fn ok_phase(name: &str) -> PhaseResult {
        PhaseResult::succeeded(
            name,
            PhaseKind::Custom,
            PhaseData::Design(InputPayload::image(vec![1], ImageMetadata::new())),
            Duration::from_millis(2),
            0,
        )
    }

    #[test]
    fn test_success_assertions() {
        let result = PipelineResult::completed(
            "p1",
            vec![ok_phase("a"), ok_phase("b")],
            Duration::from_millis(5),
            PhaseData::Design(InputPayload::image(vec![1], ImageMetadata::new())),
        );
        assert_pipeline_succeeded(&result);
        assert_phase_names(&result, &["a", "b"]);
        assert_timing_consistent(&result);
    }

    #[test]
    fn test_failure_assertion() {
        let result = PipelineResult::failed(
            "p1",
            Vec::new(),
            Duration::ZERO,
            PipelineError::request("empty id"),
        );
        assert_pipeline_failed_with(&result, ErrorKind::RequestValidation);
    }

    #[test]
    #[should_panic(expected = "Unexpected phase sequence")]
    fn test_phase_names_mismatch_panics() {
        let result = PipelineResult::completed(
            "p1",
            vec![ok_phase("a")],
            Duration::from_millis(5),
            PhaseData::Design(InputPayload::image(vec![1], ImageMetadata::new())),
        );
        assert_phase_names(&result, &["b"]);
    }
}
