/// Test Evaluator - Tier-Weighted Scoring
///
/// **Core Responsibility:**
/// Turn raw execution outputs into candidate-facing results and a score.
///
/// **Critical Properties:**
/// - Knows nothing about QuickJS
/// - Knows nothing about timeouts or memory ceilings beyond their outcome
/// - Pure function: (catalog, execution outputs) → report
///
/// **Scoring Rules:**
/// - points(tier) = round2(passed / total_for_tier × budget(tier))
/// - score = round2(Σ points), clamped to [0, 100]
/// - An empty tier divides by 1 and earns nothing
///
/// **Visibility Rules:**
/// - Tiers 1-2: name and literal error text are kept
/// - Tiers 3-5: name, error text and timing are dropped here, before a
///   result leaves this module

use crate::catalog::{TestCase, TestCatalog};
use gradebox_common::types::{RunResult, Tier, TierScores, TestRunReport};
use std::collections::HashMap;
use tracing::{debug, info};

/// Why a test did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Exception, failed assertion, or syntax error in the candidate's code.
    CandidateError,
    Timeout,
    /// Heap ceiling reached.
    ResourceExceeded,
    /// The run was cancelled before this test finished.
    Cancelled,
}

/// Raw execution output for a single test case
/// Produced by the engine, consumed by the evaluator
#[derive(Debug, Clone, PartialEq)]
pub struct TestExecutionOutput {
    pub test_id: u32,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl TestExecutionOutput {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn passed_in(test_id: u32, execution_time_ms: u64) -> Self {
        Self {
            test_id,
            failure: None,
            error: None,
            execution_time_ms,
        }
    }

    pub fn failed(
        test_id: u32,
        failure: FailureKind,
        error: impl Into<String>,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            test_id,
            failure: Some(failure),
            error: Some(error.into()),
            execution_time_ms,
        }
    }

    pub fn cancelled(test_id: u32) -> Self {
        Self::failed(test_id, FailureKind::Cancelled, "Run cancelled", 0)
    }
}

/// Round to two decimals, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Evaluate a single test output against its catalog entry
///
/// Hidden-tier results never carry the test name, error text, or a
/// per-test execution time.
pub fn evaluate_test(output: &TestExecutionOutput, test_case: &TestCase) -> RunResult {
    let visible = test_case.visible();
    let passed = output.passed();

    if !passed && !visible {
        debug!(
            test_id = test_case.id,
            tier = test_case.tier.get(),
            failure = ?output.failure,
            "Hidden test failed"
        );
    }

    RunResult {
        test_id: test_case.id,
        name: visible.then(|| test_case.name.clone()),
        tier: test_case.tier,
        passed,
        error: if visible && !passed {
            output.error.clone()
        } else {
            None
        },
        visible,
        execution_time_ms: if visible { output.execution_time_ms } else { 0 },
    }
}

/// Per-tier points from a result list
pub fn score_tiers(results: &[RunResult], catalog: &TestCatalog) -> TierScores {
    let mut tier_scores = TierScores::default();
    for tier in Tier::ALL {
        let passed = results
            .iter()
            .filter(|result| result.tier == tier && result.passed)
            .count();
        let total = catalog.total_for_tier(tier);
        let budget = catalog.budget(tier) as f64;
        tier_scores.set(tier, round2(passed as f64 / total as f64 * budget));
    }
    tier_scores
}

pub fn total_score(tier_scores: &TierScores) -> f64 {
    round2(tier_scores.sum()).clamp(0.0, 100.0)
}

/// Aggregate raw outputs into the final report
///
/// Results follow catalog order and there is exactly one per catalog test;
/// a test without an output counts as failed.
pub fn aggregate_results(outputs: &[TestExecutionOutput], catalog: &TestCatalog) -> TestRunReport {
    let by_id: HashMap<u32, &TestExecutionOutput> =
        outputs.iter().map(|output| (output.test_id, output)).collect();

    let results: Vec<RunResult> = catalog
        .iter()
        .map(|test_case| match by_id.get(&test_case.id) {
            Some(output) => evaluate_test(output, test_case),
            None => evaluate_test(
                &TestExecutionOutput::failed(
                    test_case.id,
                    FailureKind::CandidateError,
                    "Test was not executed",
                    0,
                ),
                test_case,
            ),
        })
        .collect();

    let tier_scores = score_tiers(&results, catalog);
    let score = total_score(&tier_scores);

    info!(
        score = score,
        tests = results.len(),
        passed = results.iter().filter(|r| r.passed).count(),
        "Evaluation complete"
    );

    TestRunReport {
        results,
        score,
        tier_scores,
    }
}
