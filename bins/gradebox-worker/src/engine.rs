/// Execution Engine - Sandboxed Test Execution
///
/// **Core Responsibility:**
/// Run one catalog test against a fresh instantiation of the candidate's
/// code and report the raw outcome.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (embedded QuickJS runtime per test)
/// - Engine does NOT know scoring rules or tier budgets
/// - Engine does NOT decide what the candidate may see
/// - Engine returns raw outputs for the Evaluator to judge
///
/// **Isolation Rules:**
/// 1. Every test gets its own runtime and context; nothing is pooled
/// 2. The runtime carries a heap ceiling and a stack ceiling; the heap
///    ceiling is enforced by the allocator, so a refused allocation fails
///    the test even if the script catches the resulting exception
/// 3. An interrupt handler aborts the script at the wall-clock deadline
///    or when the run is cancelled
/// 4. Only ECMAScript intrinsics are installed: no modules, timers, I/O
/// 5. Assertion helpers are frozen globals the candidate cannot redeclare
/// 6. Context and runtime are dropped before the outcome is reported

use crate::catalog::{TestCase, TestCatalog};
use crate::evaluator::{FailureKind, TestExecutionOutput};
use futures_util::stream::{self, StreamExt};
use gradebox_common::config::SandboxConfig;
use gradebox_common::error::{GradeError, HostError};
use rquickjs::allocator::{Allocator, RawMemPtr, RustAllocator};
use rquickjs::{Context, Ctx, Runtime, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Assertion primitives, evaluated in their own script before the
/// candidate's source. Both are non-writable, non-configurable globals:
/// a candidate declaring a function of the same name fails to load.
const ASSERTION_PRELUDE: &str = r#"
(function (global) {
  const JsError = Error;
  const stringify = JSON.stringify;
  const freeze = { writable: false, enumerable: false, configurable: false };
  Object.defineProperty(global, "assert", Object.assign({
    value: function assert(condition, message) {
      if (!condition) throw new JsError(message || "Assertion failed");
    }
  }, freeze));
  Object.defineProperty(global, "assertEqual", Object.assign({
    value: function assertEqual(actual, expected) {
      if (actual !== expected) {
        throw new JsError("Expected " + stringify(expected) + " but got " + stringify(actual));
      }
    }
  }, freeze));
})(globalThis);
"#;

/// Compose the script evaluated for one test after the prelude: the
/// verbatim candidate source, then the test body in an immediately-invoked
/// function.
pub fn compose_script(candidate: &str, body: &str) -> String {
    // The lone `;` keeps a candidate without a trailing semicolon from
    // turning the wrapper into a call expression.
    format!("{}\n;\n(function() {{\n{}\n}})();\n", candidate, body)
}

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything that may stop a running script early.
#[derive(Debug, Clone, Default)]
pub struct AbortSignals {
    /// Set by whoever started the run.
    pub caller: CancelFlag,
    /// Set by the run itself after a host fault.
    pub run: CancelFlag,
    /// Set by the host backstop for this test only.
    pub test: CancelFlag,
}

impl AbortSignals {
    pub fn run_aborted(&self) -> bool {
        self.caller.is_cancelled() || self.run.is_cancelled()
    }

    fn any(&self) -> bool {
        self.run_aborted() || self.test.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub memory_limit_bytes: usize,
    pub max_stack_bytes: usize,
    pub teardown_grace: Duration,
}

impl ExecutionLimits {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            memory_limit_bytes: config.memory_limit_bytes(),
            max_stack_bytes: config.max_stack_bytes(),
            teardown_grace: Duration::from_millis(config.teardown_grace_ms),
        }
    }

    pub fn timeout_message(&self) -> String {
        format!("Test timed out ({}ms limit)", self.timeout.as_millis())
    }

    pub fn memory_message(&self) -> String {
        format!(
            "Memory limit exceeded ({} MB)",
            self.memory_limit_bytes / (1024 * 1024)
        )
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

/// Heap allocator for one runtime. Refuses any request that would take the
/// live heap past `ceiling` and records the refusal in `exceeded`.
struct CeilingAllocator {
    ceiling: usize,
    in_use: usize,
    exceeded: Arc<AtomicBool>,
}

impl CeilingAllocator {
    fn new(ceiling: usize, exceeded: Arc<AtomicBool>) -> Self {
        Self {
            ceiling,
            in_use: 0,
            exceeded,
        }
    }

    fn refuse(&self) -> RawMemPtr {
        self.exceeded.store(true, Ordering::SeqCst);
        std::ptr::null_mut()
    }
}

unsafe impl Allocator for CeilingAllocator {
    fn alloc(&mut self, size: usize) -> RawMemPtr {
        if self.in_use.saturating_add(size) > self.ceiling {
            return self.refuse();
        }
        let ptr = RustAllocator.alloc(size);
        if !ptr.is_null() {
            self.in_use += unsafe { RustAllocator::usable_size(ptr) };
        }
        ptr
    }

    unsafe fn dealloc(&mut self, ptr: RawMemPtr) {
        self.in_use = self.in_use.saturating_sub(RustAllocator::usable_size(ptr));
        RustAllocator.dealloc(ptr);
    }

    unsafe fn realloc(&mut self, ptr: RawMemPtr, new_size: usize) -> RawMemPtr {
        let old_size = RustAllocator::usable_size(ptr);
        let base = self.in_use.saturating_sub(old_size);
        if base.saturating_add(new_size) > self.ceiling {
            return self.refuse();
        }
        let new_ptr = RustAllocator.realloc(ptr, new_size);
        if !new_ptr.is_null() {
            self.in_use = base + RustAllocator::usable_size(new_ptr);
        }
        new_ptr
    }

    unsafe fn usable_size(ptr: RawMemPtr) -> usize {
        RustAllocator::usable_size(ptr)
    }
}

/// A backend able to run one test in a disposable, isolated context.
///
/// `Err` is reserved for infrastructure faults; anything the candidate's
/// code does must come back as an `Ok` output.
pub trait SandboxEngine: Send + Sync {
    fn execute(
        &self,
        candidate: &str,
        test: &TestCase,
        limits: &ExecutionLimits,
        signals: &AbortSignals,
    ) -> Result<TestExecutionOutput, HostError>;
}

/// What the host saw while the script ran, independent of what the script
/// itself reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct HostObservations {
    timed_out: bool,
    memory_exceeded: bool,
}

/// How the evaluated script ended, before limits are taken into account.
#[derive(Debug, Clone, PartialEq)]
enum ScriptVerdict {
    Completed,
    Threw(String),
    OutOfMemory,
}

/// QuickJS-backed engine. One runtime per test, dropped after the test.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuickJsEngine;

impl QuickJsEngine {
    pub fn new() -> Self {
        Self
    }
}

impl SandboxEngine for QuickJsEngine {
    fn execute(
        &self,
        candidate: &str,
        test: &TestCase,
        limits: &ExecutionLimits,
        signals: &AbortSignals,
    ) -> Result<TestExecutionOutput, HostError> {
        let start_time = Instant::now();
        let deadline = start_time + limits.timeout;

        let memory_exceeded = Arc::new(AtomicBool::new(false));
        let allocator =
            CeilingAllocator::new(limits.memory_limit_bytes, Arc::clone(&memory_exceeded));
        let runtime = Runtime::new_with_alloc(allocator)
            .map_err(|e| HostError::RuntimeAllocation(e.to_string()))?;
        runtime.set_max_stack_size(limits.max_stack_bytes);

        let timed_out = Arc::new(AtomicBool::new(false));
        {
            let timed_out = Arc::clone(&timed_out);
            let signals = signals.clone();
            runtime.set_interrupt_handler(Some(Box::new(move || {
                if signals.any() {
                    return true;
                }
                if Instant::now() >= deadline {
                    timed_out.store(true, Ordering::SeqCst);
                    return true;
                }
                false
            })));
        }

        let context =
            Context::full(&runtime).map_err(|e| HostError::ContextCreation(e.to_string()))?;

        let script = compose_script(candidate, &test.body);
        let verdict = context.with(|ctx| {
            match evaluate(&ctx, ASSERTION_PRELUDE) {
                ScriptVerdict::Completed => {}
                ScriptVerdict::Threw(message) => return Err(message),
                ScriptVerdict::OutOfMemory => return Err("out of memory".to_string()),
            }
            Ok(evaluate(&ctx, script))
        });
        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(_) if memory_exceeded.load(Ordering::SeqCst) => ScriptVerdict::OutOfMemory,
            // Interrupted while loading helpers; classified like any other abort
            Err(message) if signals.any() || timed_out.load(Ordering::SeqCst) => {
                ScriptVerdict::Threw(message)
            }
            Err(message) => {
                return Err(HostError::ContextCreation(format!(
                    "assertion helpers failed to load: {}",
                    message
                )));
            }
        };

        // Teardown before anything is reported
        drop(context);
        drop(runtime);

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        let observed = HostObservations {
            timed_out: timed_out.load(Ordering::SeqCst),
            memory_exceeded: memory_exceeded.load(Ordering::SeqCst),
        };
        Ok(classify(test.id, verdict, observed, signals, limits, execution_time_ms))
    }
}

fn evaluate<S: Into<Vec<u8>>>(ctx: &Ctx<'_>, source: S) -> ScriptVerdict {
    match ctx.eval::<(), _>(source) {
        Ok(()) => ScriptVerdict::Completed,
        Err(rquickjs::Error::Exception) => ScriptVerdict::Threw(describe_thrown(&ctx.catch())),
        Err(rquickjs::Error::Allocation) => ScriptVerdict::OutOfMemory,
        Err(other) => ScriptVerdict::Threw(other.to_string()),
    }
}

/// Turn whatever the script threw into the message shown to the candidate.
fn describe_thrown(value: &Value<'_>) -> String {
    if let Some(text) = value.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    value
        .as_object()
        .and_then(|object| object.get::<_, Option<String>>("message").ok().flatten())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| "Unknown error".to_string())
}

fn is_out_of_memory(message: &str) -> bool {
    message.to_ascii_lowercase().contains("out of memory")
}

/// Map a script verdict to a test output.
///
/// Priority: completion within the heap ceiling, run cancellation, refused
/// allocation, deadline, reported out-of-memory, candidate exception. A
/// refused allocation fails the test even when the script caught it.
fn classify(
    test_id: u32,
    verdict: ScriptVerdict,
    observed: HostObservations,
    signals: &AbortSignals,
    limits: &ExecutionLimits,
    execution_time_ms: u64,
) -> TestExecutionOutput {
    if verdict == ScriptVerdict::Completed && !observed.memory_exceeded {
        return TestExecutionOutput::passed_in(test_id, execution_time_ms);
    }
    if signals.run_aborted() {
        return TestExecutionOutput::cancelled(test_id);
    }
    if observed.memory_exceeded {
        return TestExecutionOutput::failed(
            test_id,
            FailureKind::ResourceExceeded,
            limits.memory_message(),
            execution_time_ms,
        );
    }
    if observed.timed_out || signals.test.is_cancelled() {
        return TestExecutionOutput::failed(
            test_id,
            FailureKind::Timeout,
            limits.timeout_message(),
            execution_time_ms,
        );
    }
    match verdict {
        ScriptVerdict::OutOfMemory => TestExecutionOutput::failed(
            test_id,
            FailureKind::ResourceExceeded,
            limits.memory_message(),
            execution_time_ms,
        ),
        ScriptVerdict::Threw(message) if is_out_of_memory(&message) => {
            TestExecutionOutput::failed(
                test_id,
                FailureKind::ResourceExceeded,
                limits.memory_message(),
                execution_time_ms,
            )
        }
        ScriptVerdict::Threw(message) => TestExecutionOutput::failed(
            test_id,
            FailureKind::CandidateError,
            message,
            execution_time_ms,
        ),
        ScriptVerdict::Completed => TestExecutionOutput::passed_in(test_id, execution_time_ms),
    }
}

/// Run a single test on a blocking worker thread with a host-side backstop.
///
/// The interrupt handler is the primary deadline. If the worker is still
/// running `teardown_grace` after the deadline, the test is recorded as a
/// timeout and its context is told to abort.
async fn run_isolated(
    engine: Arc<dyn SandboxEngine>,
    candidate: Arc<str>,
    test: TestCase,
    limits: ExecutionLimits,
    signals: AbortSignals,
) -> Result<TestExecutionOutput, HostError> {
    if signals.run_aborted() {
        return Ok(TestExecutionOutput::cancelled(test.id));
    }

    let test_id = test.id;
    let tier = test.tier;
    let test_abort = signals.test.clone();
    let start_time = Instant::now();

    let worker =
        tokio::task::spawn_blocking(move || engine.execute(&candidate, &test, &limits, &signals));

    match tokio::time::timeout(limits.timeout + limits.teardown_grace, worker).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(HostError::Worker(format!(
            "test {} worker did not complete: {}",
            test_id, join_error
        ))),
        Err(_) => {
            test_abort.cancel();
            warn!(
                test_id = test_id,
                tier = tier.get(),
                timeout_ms = limits.timeout.as_millis() as u64,
                "Sandbox missed its deadline; abandoning context"
            );
            Ok(TestExecutionOutput::failed(
                test_id,
                FailureKind::Timeout,
                limits.timeout_message(),
                start_time.elapsed().as_millis() as u64,
            ))
        }
    }
}

/// Execute every catalog test against the candidate source.
///
/// Up to `max_parallel` contexts run at once; outputs come back in catalog
/// order regardless of completion order. A host fault or caller
/// cancellation aborts the in-flight tests and ends the run with an error.
#[instrument(
    skip_all,
    fields(run_id = %run_id, test_count = catalog.len(), max_parallel = max_parallel)
)]
pub async fn execute_run(
    run_id: uuid::Uuid,
    engine: Arc<dyn SandboxEngine>,
    catalog: &TestCatalog,
    candidate: &str,
    limits: ExecutionLimits,
    max_parallel: usize,
    cancel: &CancelFlag,
) -> Result<Vec<TestExecutionOutput>, GradeError> {
    let total = catalog.len();
    if catalog.is_empty() {
        warn!("Catalog has no tests; nothing to execute");
        return Ok(Vec::new());
    }
    let candidate: Arc<str> = Arc::from(candidate);
    let run_abort = CancelFlag::new();
    let run_start = Instant::now();

    info!(
        timeout_ms = limits.timeout.as_millis() as u64,
        memory_limit_bytes = limits.memory_limit_bytes,
        source_size = candidate.len(),
        "Executing test catalog"
    );

    let mut pending = stream::iter(catalog.iter().cloned())
        .map(|test| {
            let signals = AbortSignals {
                caller: cancel.clone(),
                run: run_abort.clone(),
                test: CancelFlag::new(),
            };
            run_isolated(
                Arc::clone(&engine),
                Arc::clone(&candidate),
                test,
                limits,
                signals,
            )
        })
        .buffered(max_parallel.max(1));

    let mut outputs = Vec::with_capacity(total);
    while let Some(result) = pending.next().await {
        match result {
            Ok(output) if output.failure == Some(FailureKind::Cancelled) => {
                run_abort.cancel();
                warn!(
                    completed = outputs.len(),
                    total = total,
                    "Run cancelled - aborting in-flight tests"
                );
                return Err(GradeError::Cancelled {
                    completed: outputs.len(),
                    total,
                });
            }
            Ok(output) => {
                debug!(
                    test_id = output.test_id,
                    passed = output.passed(),
                    failure = ?output.failure,
                    execution_ms = output.execution_time_ms,
                    "Test executed"
                );
                outputs.push(output);
            }
            Err(host_error) => {
                run_abort.cancel();
                error!(
                    error = %host_error,
                    completed = outputs.len(),
                    "Sandbox infrastructure fault - aborting run"
                );
                return Err(host_error.into());
            }
        }
    }

    info!(
        tests_executed = outputs.len(),
        tests_passed = outputs.iter().filter(|o| o.passed()).count(),
        total_execution_ms = run_start.elapsed().as_millis() as u64,
        "All test cases executed"
    );

    Ok(outputs)
}
