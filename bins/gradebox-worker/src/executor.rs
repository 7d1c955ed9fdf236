/// Submission Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Coordinate the sandbox engine, evaluator and partitioner to produce the
/// final response for one submission.
///
/// **Architecture:**
/// 1. Guard the submission size (oversized sources are never executed)
/// 2. Use the engine to run every catalog test in its own context (engine.rs)
/// 3. Use the evaluator to classify and score the outputs (evaluator.rs)
/// 4. Use the partitioner to build the candidate-facing view (partition.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How scoring works (evaluator's job)

use crate::catalog::TestCatalog;
use crate::engine::{execute_run, CancelFlag, ExecutionLimits, SandboxEngine};
use crate::evaluator::{self, FailureKind, TestExecutionOutput};
use crate::partition::partition_results;
use gradebox_common::config::SandboxConfig;
use gradebox_common::error::GradeError;
use gradebox_common::types::TestRunResponse;
use std::sync::Arc;
use uuid::Uuid;

/// Grade one submission against the catalog.
///
/// Candidate faults end up inside the response; `Err` means the run could
/// not be completed (infrastructure fault or cancellation).
pub async fn grade_submission(
    engine: Arc<dyn SandboxEngine>,
    catalog: &TestCatalog,
    source: &str,
    config: &SandboxConfig,
    cancel: &CancelFlag,
) -> Result<TestRunResponse, GradeError> {
    let run_id = Uuid::new_v4();

    tracing::info!(
        run_id = %run_id,
        test_count = catalog.len(),
        source_size = source.len(),
        "Starting submission grading"
    );

    let outputs = if source.len() > config.max_source_bytes {
        tracing::warn!(
            run_id = %run_id,
            source_size = source.len(),
            max_source_bytes = config.max_source_bytes,
            "Source exceeds size limit; marking all tests as failed"
        );
        rejected_source_outputs(catalog, config.max_source_bytes)
    } else {
        execute_run(
            run_id,
            engine,
            catalog,
            source,
            ExecutionLimits::from_config(config),
            config.max_parallel_tests,
            cancel,
        )
        .await?
    };

    // Cross-layer guard: surface limit hits before evaluation
    for output in &outputs {
        match output.failure {
            Some(FailureKind::Timeout) => tracing::warn!(
                run_id = %run_id,
                test_id = output.test_id,
                execution_time_ms = output.execution_time_ms,
                "Execution timed out; test cannot pass"
            ),
            Some(FailureKind::ResourceExceeded) => tracing::warn!(
                run_id = %run_id,
                test_id = output.test_id,
                "Memory ceiling reached; test cannot pass"
            ),
            _ => {}
        }
    }

    let report = evaluator::aggregate_results(&outputs, catalog);
    let view = partition_results(&report.results);

    tracing::info!(
        run_id = %run_id,
        score = report.score,
        hidden_passed = view.hidden_summary.passed,
        hidden_total = view.hidden_summary.total,
        "Submission graded"
    );

    Ok(TestRunResponse { report, view })
}

/// Outputs for a source that was refused before execution
fn rejected_source_outputs(catalog: &TestCatalog, max_source_bytes: usize) -> Vec<TestExecutionOutput> {
    let message = format!(
        "Source code exceeds maximum size of {} bytes",
        max_source_bytes
    );
    catalog
        .iter()
        .map(|tc| TestExecutionOutput::failed(tc.id, FailureKind::CandidateError, message.clone(), 0))
        .collect()
}
