/// Integration tests for the QuickJS sandbox
///
/// These tests run real candidate code through the embedded engine:
/// 1. A complete reference implementation scores 100
/// 2. Syntax errors fail every test without leaking hidden detail
/// 3. Each test gets a fresh context (no global state leaks)
/// 4. Infinite loops and heap hogs are contained per test, and a caught
///    out-of-memory exception still fails the test
/// 5. Assertion helpers cannot be replaced by the candidate
/// 6. Caller cancellation stops the whole run

#[cfg(test)]
mod quickjs_tests {
    use crate::catalog::{standard_policies, TestCase, TestCatalog};
    use crate::engine::{execute_run, CancelFlag, ExecutionLimits, QuickJsEngine, SandboxEngine};
    use crate::evaluator::{FailureKind, TestExecutionOutput};
    use crate::executor::grade_submission;
    use gradebox_common::config::SandboxConfig;
    use gradebox_common::error::GradeError;
    use gradebox_common::types::Tier;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    const REFERENCE_MINIGIT: &str = include_str!("../fixtures/reference_minigit.js");

    fn engine() -> Arc<dyn SandboxEngine> {
        Arc::new(QuickJsEngine::new())
    }

    fn tier(n: u8) -> Tier {
        Tier::new(n).unwrap()
    }

    fn catalog_of(tests: Vec<TestCase>) -> TestCatalog {
        TestCatalog::new(tests, &standard_policies()).unwrap()
    }

    /// Keeps allocating until the heap ceiling refuses a request.
    const HEAP_HOG: &str = r#"
        const chunks = [];
        while (true) { chunks.push(new Array(100000).fill("x")); }
    "#;

    fn heap_limits() -> ExecutionLimits {
        ExecutionLimits {
            memory_limit_bytes: 16 * 1024 * 1024,
            ..short_limits(3000)
        }
    }

    fn short_limits(timeout_ms: u64) -> ExecutionLimits {
        ExecutionLimits {
            timeout: Duration::from_millis(timeout_ms),
            teardown_grace: Duration::from_millis(500),
            ..ExecutionLimits::default()
        }
    }

    async fn run(
        catalog: &TestCatalog,
        candidate: &str,
        limits: ExecutionLimits,
    ) -> Vec<TestExecutionOutput> {
        execute_run(
            Uuid::new_v4(),
            engine(),
            catalog,
            candidate,
            limits,
            4,
            &CancelFlag::new(),
        )
        .await
        .expect("run should complete")
    }

    /// Test: The reference implementation passes every catalog test
    #[tokio::test]
    async fn test_reference_implementation_scores_100() {
        let catalog = TestCatalog::standard();
        let response = grade_submission(
            engine(),
            &catalog,
            REFERENCE_MINIGIT,
            &SandboxConfig::default(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        for result in &response.report.results {
            assert!(result.passed, "test {} failed: {:?}", result.test_id, result.error);
        }
        assert_eq!(response.report.results.len(), 28);
        assert_eq!(response.report.score, 100.0);
        assert_eq!(response.view.visible_results.len(), 13);
        assert_eq!(response.view.hidden_summary.total, 15);
        assert_eq!(response.view.hidden_summary.passed, 15);
    }

    /// Test: Fresh repository log, reverse-chronological log, merge conflict
    #[tokio::test]
    async fn test_repository_scenarios() {
        let catalog = catalog_of(vec![
            TestCase::new(
                1,
                "fresh log is empty",
                tier(1),
                r#"
                const git = new MiniGit();
                git.init();
                assertEqual(git.log().length, 0);
                "#,
            ),
            TestCase::new(
                2,
                "log is newest first",
                tier(1),
                r#"
                const git = new MiniGit();
                git.init();
                git.add("file1.txt", "v1");
                git.commit("first");
                git.add("file1.txt", "v2");
                git.commit("second");
                const messages = git.log().map(e => e.message);
                assertEqual(JSON.stringify(messages), JSON.stringify(["second", "first"]));
                "#,
            ),
            TestCase::new(
                3,
                "divergent edits conflict",
                tier(4),
                r#"
                const git = new MiniGit();
                git.init();
                git.add("file.txt", "base");
                git.commit("initial");
                git.branch("feature");
                git.checkout("feature");
                git.add("file.txt", "f");
                git.commit("fc");
                git.checkout("main");
                git.add("file.txt", "m");
                git.commit("mc");
                const result = git.merge("feature");
                assert(result.conflicts.includes("file.txt"), "expected conflict on file.txt");
                "#,
            ),
        ]);

        let outputs = run(&catalog, REFERENCE_MINIGIT, ExecutionLimits::default()).await;

        assert_eq!(outputs.len(), 3);
        for output in &outputs {
            assert!(output.passed(), "test {} failed: {:?}", output.test_id, output.error);
        }
    }

    /// Test: Assertion failures carry the literal message
    #[tokio::test]
    async fn test_assertion_message_is_reported() {
        let catalog = catalog_of(vec![TestCase::new(
            1,
            "log length",
            tier(1),
            r#"
            const git = new MiniGit();
            git.init();
            git.add("a.txt", "a");
            git.commit("one");
            assertEqual(git.log().length, 2);
            "#,
        )]);

        let outputs = run(&catalog, REFERENCE_MINIGIT, ExecutionLimits::default()).await;

        assert_eq!(outputs[0].failure, Some(FailureKind::CandidateError));
        assert_eq!(outputs[0].error.as_deref(), Some("Expected 2 but got 1"));
    }

    /// Test: Syntax error fails everything, error text only on visible tiers
    #[tokio::test]
    async fn test_syntax_error_fails_every_test() {
        let catalog = TestCatalog::standard();
        let response = grade_submission(
            engine(),
            &catalog,
            "class MiniGit { init() { ",
            &SandboxConfig::default(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(response.report.results.len(), catalog.len());
        assert_eq!(response.report.score, 0.0);
        for result in &response.report.results {
            assert!(!result.passed);
            if result.visible {
                assert!(!result.error.as_deref().unwrap_or("").is_empty());
            } else {
                assert_eq!(result.error, None);
            }
        }
    }

    /// Test: No hidden test name reaches the serialized response
    #[tokio::test]
    async fn test_hidden_names_never_serialized() {
        let catalog = TestCatalog::standard();
        let response = grade_submission(
            engine(),
            &catalog,
            "class MiniGit { init() { throw new Error('broken init'); } }",
            &SandboxConfig::default(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        let json = serde_json::to_string(&response).unwrap();
        for test in catalog.iter().filter(|t| !t.visible()) {
            assert!(!json.contains(&test.name), "hidden name leaked: {}", test.name);
        }
        let visible_errors = response
            .view
            .visible_results
            .iter()
            .filter(|r| r.error.as_deref() == Some("broken init"))
            .count();
        assert_eq!(visible_errors, 13);
        assert_eq!(json.matches("broken init").count(), 26);
    }

    /// Test: Global mutations do not survive into the next test
    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let candidate = r#"
            globalThis.loads = (globalThis.loads || 0) + 1;
            class MiniGit {}
        "#;
        let tests = (1..=6)
            .map(|id| {
                TestCase::new(
                    id,
                    format!("isolation {}", id),
                    tier(1),
                    r#"
                    assertEqual(globalThis.loads, 1);
                    globalThis.leaked = true;
                    assertEqual(Object.prototype.polluted, undefined);
                    Object.prototype.polluted = 1;
                    "#,
                )
            })
            .collect();
        let catalog = catalog_of(tests);

        let outputs = run(&catalog, candidate, ExecutionLimits::default()).await;

        assert_eq!(outputs.len(), 6);
        for output in &outputs {
            assert!(output.passed(), "test {} failed: {:?}", output.test_id, output.error);
        }
    }

    /// Test: An infinite loop times out only the test that runs it
    #[tokio::test]
    async fn test_infinite_loop_is_contained() {
        let candidate = r#"
            class MiniGit {
                init() {}
                log() { while (true) {} }
            }
        "#;
        let catalog = catalog_of(vec![
            TestCase::new(1, "init only", tier(1), "new MiniGit().init();"),
            TestCase::new(2, "log spins", tier(1), "const g = new MiniGit(); g.init(); g.log();"),
            TestCase::new(3, "init again", tier(2), "new MiniGit().init();"),
        ]);

        let start = Instant::now();
        let outputs = run(&catalog, candidate, short_limits(200)).await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(outputs[0].passed());
        assert_eq!(outputs[1].failure, Some(FailureKind::Timeout));
        assert_eq!(outputs[1].error.as_deref(), Some("Test timed out (200ms limit)"));
        assert!(outputs[2].passed());
    }

    /// Test: A heap hog fails its own test and nothing else
    #[tokio::test]
    async fn test_memory_hog_is_contained() {
        let catalog = catalog_of(vec![
            TestCase::new(1, "hog", tier(1), HEAP_HOG),
            TestCase::new(2, "fine", tier(1), "assert(true);"),
        ]);

        let outputs = run(&catalog, "class MiniGit {}", heap_limits()).await;

        assert_eq!(outputs[0].failure, Some(FailureKind::ResourceExceeded));
        assert_eq!(outputs[0].error.as_deref(), Some("Memory limit exceeded (16 MB)"));
        assert!(outputs[1].passed());
    }

    /// Test: Catching the out-of-memory exception does not rescue the test
    #[tokio::test]
    async fn test_caught_out_of_memory_still_fails() {
        let body = format!("try {{ {} }} catch (e) {{}}", HEAP_HOG);
        let catalog = catalog_of(vec![TestCase::new(1, "swallowed hog", tier(1), body)]);

        let outputs = run(&catalog, "class MiniGit {}", heap_limits()).await;

        assert_eq!(outputs[0].failure, Some(FailureKind::ResourceExceeded));
    }

    /// Test: A method that exhausts the heap cannot earn a "throws" test
    #[tokio::test]
    async fn test_heap_exhaustion_is_not_a_thrown_error() {
        let candidate = format!(
            "{}\nMiniGit.prototype.checkout = function() {{ {} }};",
            REFERENCE_MINIGIT, HEAP_HOG
        );
        let throws_test = TestCatalog::standard()
            .iter()
            .find(|t| t.name == "checkout() throws on non-existent branch")
            .cloned()
            .unwrap();
        let catalog = catalog_of(vec![throws_test]);

        let outputs = run(&catalog, &candidate, heap_limits()).await;

        assert_eq!(outputs[0].failure, Some(FailureKind::ResourceExceeded));
    }

    /// Test: Redeclaring or reassigning the assertion helpers cannot mask
    /// failures
    #[tokio::test]
    async fn test_assertion_helpers_cannot_be_replaced() {
        let stub = "class MiniGit { init() {} log() { return [1]; } }";
        let body = "const g = new MiniGit(); g.init(); assertEqual(g.log().length, 0);";
        let catalog = catalog_of(vec![TestCase::new(1, "empty log", tier(1), body)]);

        let redeclared = format!("function assert() {{}}\nfunction assertEqual() {{}}\n{}", stub);
        let outputs = run(&catalog, &redeclared, ExecutionLimits::default()).await;
        assert_eq!(outputs[0].failure, Some(FailureKind::CandidateError));

        let reassigned = format!("globalThis.assertEqual = function() {{}};\n{}", stub);
        let outputs = run(&catalog, &reassigned, ExecutionLimits::default()).await;
        assert_eq!(outputs[0].failure, Some(FailureKind::CandidateError));

        let swallowed = format!(
            "try {{ globalThis.assertEqual = function() {{}}; }} catch (e) {{}}\n{}",
            stub
        );
        let outputs = run(&catalog, &swallowed, ExecutionLimits::default()).await;
        assert_eq!(outputs[0].error.as_deref(), Some("Expected 0 but got 1"));
    }

    /// Test: Same source, same classifications
    #[tokio::test]
    async fn test_runs_are_deterministic() {
        // Reference with merge removed: tier 4 fails, everything else passes
        let candidate = format!(
            "{}\nMiniGit.prototype.merge = function() {{ throw new Error('merge unsupported'); }};",
            REFERENCE_MINIGIT
        );
        let catalog = TestCatalog::standard();

        let first = run(&catalog, &candidate, ExecutionLimits::default()).await;
        let second = run(&catalog, &candidate, ExecutionLimits::default()).await;

        let classify = |outputs: &[TestExecutionOutput]| -> Vec<(u32, Option<FailureKind>, Option<String>)> {
            outputs
                .iter()
                .map(|o| (o.test_id, o.failure, o.error.clone()))
                .collect()
        };
        assert_eq!(classify(&first), classify(&second));

        let failing: Vec<u32> = first.iter().filter(|o| !o.passed()).map(|o| o.test_id).collect();
        let tier4: Vec<u32> = catalog.tests_for_tier(tier(4)).map(|t| t.id).collect();
        assert_eq!(failing, tier4);
    }

    /// Test: Cancelling the run aborts in-flight contexts
    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let tests = (1..=8)
            .map(|id| TestCase::new(id, format!("spin {}", id), tier(1), "while (true) {}"))
            .collect();
        let catalog = catalog_of(tests);
        let cancel = CancelFlag::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = execute_run(
            Uuid::new_v4(),
            engine(),
            &catalog,
            "class MiniGit {}",
            short_limits(30_000),
            4,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(GradeError::Cancelled { completed: 0, total: 8 })));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
