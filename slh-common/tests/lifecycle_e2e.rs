//! Whole-suite lifecycle runs against an in-memory config store.
//!
//! Validates:
//!   - Overrun of the fast-mode budget yields a diagnostic, not a failure
//!   - The budget is compared in whole seconds (25.9s of 25s is not over)
//!   - Force flags abort the suite or skip single tests
//!   - Failed setup rolls the store back
//!   - Per-test and per-suite config restore
//!   - Reset steps stay isolated from one another
//!   - A deferred reap requested mid-suite runs at teardown

use slh_common::config::{
    ConfigStore, FORCE_SUITE_ABORT_KEY, FORCE_TEST_ABORT_KEY, HarnessSettings, MemoryConfigStore,
    SUITE_TIMEOUT_KEY, URL_SCHEME_KEY,
};
use slh_common::errors::ErrorCode;
use slh_common::harness::{
    LifecycleCoordinator, LifecyclePhase, LoggingShutdown, ManualClock, ReapOutcome, ResetError,
    ResetStage, SuiteClock, SuiteOutcome, TeardownReset, TestOutcome, init_suite_file_logging,
    reset_fn,
};
use slh_common::tasks::{Interrupted, TaskRegistry};
use slh_common::test_guard;
use slh_common::testing::init_global_test_logging;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[ctor::ctor]
fn setup() {
    init_global_test_logging();
}

fn seeded() -> HarnessSettings {
    HarnessSettings::default().with_seed(0xC0FFEE)
}

#[test]
fn test_budget_overrun_reports_diagnostic_but_passes() {
    let _guard = test_guard!();
    let store = Arc::new(MemoryConfigStore::new());
    let clock = Arc::new(ManualClock::new());
    let mut coordinator = LifecycleCoordinator::builder("BudgetSuite", store.clone())
        .settings(seeded())
        .clock(SuiteClock::with_clock(clock.clone()))
        .build();

    let handle = coordinator.suite_setup().unwrap();
    assert!(handle.fast_mode());
    assert_eq!(handle.context().budget, Duration::from_secs(25));

    let scope = coordinator.before_test("test_slow_path").unwrap();
    clock.advance(Duration::from_secs(30));
    coordinator.after_test(scope, TestOutcome::Passed).unwrap();

    let report = coordinator.suite_teardown().unwrap();
    assert_eq!(report.outcome, SuiteOutcome::Passed);
    assert!(report.passed());
    let diag = report.budget_exceeded.as_ref().unwrap();
    assert_eq!(diag.code, ErrorCode::BudgetExceeded.code_string());
    assert_eq!(diag.elapsed_secs, 30);
    assert_eq!(diag.budget_secs, 25);
    assert_eq!(report.elapsed_ms, 30_000);
}

/// Run an empty fast-mode suite whose clock reads `elapsed` at teardown.
fn budget_check_after(elapsed: Duration) -> Option<(u64, u64)> {
    let clock = Arc::new(ManualClock::new());
    let mut coordinator =
        LifecycleCoordinator::builder("BoundarySuite", Arc::new(MemoryConfigStore::new()))
            .settings(seeded())
            .clock(SuiteClock::with_clock(clock.clone()))
            .build();
    coordinator.suite_setup().unwrap();
    clock.advance(elapsed);
    let report = coordinator.suite_teardown().unwrap();
    assert!(report.passed());
    report
        .budget_exceeded
        .map(|diag| (diag.elapsed_secs, diag.budget_secs))
}

#[test]
fn test_budget_compares_whole_seconds() {
    let _guard = test_guard!();
    assert_eq!(budget_check_after(Duration::from_secs(25)), None);
    assert_eq!(budget_check_after(Duration::from_millis(25_900)), None);
    assert_eq!(budget_check_after(Duration::from_secs(26)), Some((26, 25)));
}

#[test]
fn test_budget_is_read_from_store_and_ignored_on_nightly() {
    let _guard = test_guard!();
    let clock = Arc::new(ManualClock::new());

    let store = Arc::new(MemoryConfigStore::with_entries([(SUITE_TIMEOUT_KEY, "60")]));
    let mut fast = LifecycleCoordinator::builder("LongBudget", store)
        .settings(seeded())
        .clock(SuiteClock::with_clock(clock.clone()))
        .build();
    fast.suite_setup().unwrap();
    clock.advance(Duration::from_secs(45));
    let report = fast.suite_teardown().unwrap();
    assert_eq!(report.budget_secs, 60);
    assert!(report.budget_exceeded.is_none());

    let mut nightly = LifecycleCoordinator::builder("Nightly", Arc::new(MemoryConfigStore::new()))
        .settings(seeded().with_nightly(true))
        .clock(SuiteClock::with_clock(clock.clone()))
        .build();
    nightly.suite_setup().unwrap();
    clock.advance(Duration::from_secs(600));
    let report = nightly.suite_teardown().unwrap();
    assert!(!report.fast_mode);
    assert!(report.budget_exceeded.is_none());
}

#[test]
fn test_failed_suite_gets_no_budget_diagnostic() {
    let _guard = test_guard!();
    let clock = Arc::new(ManualClock::new());
    let mut coordinator =
        LifecycleCoordinator::builder("FailingSuite", Arc::new(MemoryConfigStore::new()))
            .settings(seeded())
            .clock(SuiteClock::with_clock(clock.clone()))
            .build();
    coordinator.suite_setup().unwrap();
    let scope = coordinator.before_test("test_broken").unwrap();
    clock.advance(Duration::from_secs(40));
    coordinator.after_test(scope, TestOutcome::Failed).unwrap();

    let report = coordinator.suite_teardown().unwrap();
    assert_eq!(report.outcome, SuiteOutcome::Failed);
    assert!(report.budget_exceeded.is_none());
}

#[test]
fn test_suite_force_flag_aborts_before_any_override() {
    let _guard = test_guard!();
    let store = Arc::new(MemoryConfigStore::with_entries([(FORCE_SUITE_ABORT_KEY, "true")]));
    let before = store.snapshot();
    let reset_ran = Arc::new(Mutex::new(false));
    let flag = reset_ran.clone();

    let mut coordinator = LifecycleCoordinator::builder("AbortedSuite", store.clone())
        .settings(seeded())
        .reset_step(reset_fn(ResetStage::FaultInjection, "fault-rules", move || {
            *flag.lock().unwrap() = true;
            Ok(())
        }))
        .build();

    let err = coordinator.suite_setup().unwrap_err();
    assert!(err.is_assumption());
    assert_eq!(coordinator.phase(), LifecyclePhase::Aborted);
    assert!(coordinator.applied_overrides().is_empty());
    assert_eq!(store.snapshot(), before);
    assert!(coordinator.before_test("test_never_runs").is_err());

    let report = coordinator.suite_teardown().unwrap();
    assert_eq!(report.outcome, SuiteOutcome::Aborted);
    assert!(report.ssl.is_none());
    assert!(*reset_ran.lock().unwrap());
}

#[test]
fn test_read_only_key_fails_setup_and_rolls_back() {
    let _guard = test_guard!();
    let store = Arc::new(
        MemoryConfigStore::with_entries([("app.name", "search")])
            .with_read_only("clustering.enabled"),
    );
    let before = store.snapshot();

    let mut coordinator = LifecycleCoordinator::builder("ReadOnlySuite", store.clone())
        .settings(seeded())
        .build();
    let err = coordinator.suite_setup().unwrap_err();
    assert!(!err.is_assumption());
    assert_eq!(coordinator.phase(), LifecyclePhase::SetupFailed);
    assert!(coordinator.applied_overrides().is_empty());
    assert_eq!(store.snapshot(), before);
    assert!(store.get(URL_SCHEME_KEY).is_none());

    let report = coordinator.suite_teardown().unwrap();
    assert_eq!(report.outcome, SuiteOutcome::SetupFailed);
    assert!(!report.passed());
}

#[test]
fn test_test_changes_are_undone_and_suite_restores_store() {
    let _guard = test_guard!();
    let store = Arc::new(MemoryConfigStore::with_entries([("app.name", "search")]));
    let before = store.snapshot();

    let mut coordinator = LifecycleCoordinator::builder("RestoreSuite", store.clone())
        .settings(seeded())
        .build();
    let handle = coordinator.suite_setup().unwrap();
    assert_eq!(
        store.get(URL_SCHEME_KEY).as_deref(),
        Some(handle.ssl().url_scheme().as_str())
    );
    let after_setup = store.snapshot();
    assert!(after_setup.len() > before.len());

    let scope = coordinator.before_test("test_tweaks_config").unwrap();
    store.set("app.name", "changed-by-test").unwrap();
    store.set("test.only.key", "1").unwrap();
    coordinator.after_test(scope, TestOutcome::Passed).unwrap();
    assert_eq!(store.snapshot(), after_setup);

    let report = coordinator.suite_teardown().unwrap();
    assert!(report.reset_failures.is_empty());
    assert_eq!(store.snapshot(), before);
}

#[test]
fn test_test_force_flag_skips_single_tests() {
    let _guard = test_guard!();
    let store = Arc::new(MemoryConfigStore::new());
    let mut coordinator = LifecycleCoordinator::builder("SkipSuite", store.clone())
        .settings(seeded())
        .build();
    coordinator.suite_setup().unwrap();

    let scope = coordinator.before_test("test_first").unwrap();
    coordinator.after_test(scope, TestOutcome::Passed).unwrap();

    store.set(FORCE_TEST_ABORT_KEY, "true").unwrap();
    let err = coordinator.before_test("test_second").unwrap_err();
    assert!(err.is_assumption());
    assert_eq!(coordinator.phase(), LifecyclePhase::Running);
    coordinator.record_skipped("test_second").unwrap();

    store.remove(FORCE_TEST_ABORT_KEY).unwrap();
    let scope = coordinator.before_test("test_third").unwrap();
    coordinator.after_test(scope, TestOutcome::Passed).unwrap();

    let report = coordinator.suite_teardown().unwrap();
    assert_eq!(report.outcome, SuiteOutcome::Passed);
    assert_eq!(report.tests.passed, 2);
    assert_eq!(report.tests.skipped, 1);
}

#[test]
fn test_reset_failures_are_isolated_and_logging_flushed() {
    let _guard = test_guard!();
    let dir = tempfile::tempdir().unwrap();
    let (mut writer, shutdown) = init_suite_file_logging(dir.path(), "ResetSuite").unwrap();
    writer.write_all(b"suite started\n").unwrap();
    let shutdown = Arc::new(shutdown);

    struct SharedShutdown(Arc<LoggingShutdown>);
    impl TeardownReset for SharedShutdown {
        fn stage(&self) -> ResetStage {
            self.0.stage()
        }
        fn name(&self) -> &str {
            self.0.name()
        }
        fn reset(&self) -> Result<(), ResetError> {
            self.0.reset()
        }
    }

    let order = Arc::new(Mutex::new(Vec::new()));
    let (o1, o2) = (order.clone(), order.clone());
    let mut coordinator =
        LifecycleCoordinator::builder("ResetSuite", Arc::new(MemoryConfigStore::new()))
            .settings(seeded())
            .reset_step(Box::new(SharedShutdown(shutdown.clone())))
            .reset_step(reset_fn(ResetStage::FaultInjection, "fault-rules", move || {
                o1.lock().unwrap().push("fault-rules");
                Err(ResetError::new("rule table locked"))
            }))
            .reset_step(reset_fn(ResetStage::ClientFactory, "client-factory", move || {
                o2.lock().unwrap().push("client-factory");
                panic!("factory already closed");
            }))
            .build();
    coordinator.suite_setup().unwrap();

    let report = coordinator.suite_teardown().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["client-factory", "fault-rules"]);
    assert!(shutdown.is_shut_down());
    assert_eq!(report.reset_failures.len(), 2);
    assert_eq!(report.reset_failures[0].step, "client-factory");
    assert_eq!(
        report.reset_failures[0].code,
        ErrorCode::TeardownResetPanicked.code_string()
    );
    assert_eq!(report.reset_failures[1].step, "fault-rules");
    assert_eq!(
        report.reset_failures[1].code,
        ErrorCode::TeardownResetFailed.code_string()
    );

    let log = std::fs::read_to_string(dir.path().join("ResetSuite.log")).unwrap();
    assert!(log.contains("suite started"));
}

#[test]
fn test_deferred_reap_from_test_thread_runs_at_teardown() {
    let _guard = test_guard!();
    let registry = TaskRegistry::new();
    let suite_group = registry.root_group("main").child("LeakySuite");
    let mut coordinator =
        LifecycleCoordinator::builder("LeakySuite", Arc::new(MemoryConfigStore::new()))
            .settings(seeded())
            .task_group(&suite_group)
            .build();
    let handle = coordinator.suite_setup().unwrap();

    let leaked = suite_group
        .child("node-1")
        .child("pool")
        .spawn_thread("searcher-evictor", |token| token.sleep(Duration::from_secs(60)))
        .unwrap();

    let scope = coordinator.before_test("test_leaks_evictor").unwrap();
    let test_handle = handle.clone();
    let outcome = std::thread::spawn(move || {
        test_handle.interrupt_threads_on_teardown("evictor", false)
    })
    .join()
    .unwrap();
    assert!(matches!(outcome, ReapOutcome::Deferred { .. }));
    coordinator.after_test(scope, TestOutcome::Passed).unwrap();
    assert!(!leaked.token().is_interrupted());

    let report = coordinator.suite_teardown().unwrap();
    let reap = report.reap.as_ref().and_then(ReapOutcome::report).unwrap();
    assert_eq!(reap.reference_group, "LeakySuite");
    assert_eq!(reap.interrupted, vec!["searcher-evictor"]);
    assert!(!handle.context().pending.is_set());
    assert_eq!(leaked.join().unwrap(), Err(Interrupted));
}

#[test]
fn test_immediate_reap_through_handle() {
    let _guard = test_guard!();
    let registry = TaskRegistry::new();
    let suite_group = registry.root_group("main").child("ImmediateSuite");
    let mut coordinator =
        LifecycleCoordinator::builder("ImmediateSuite", Arc::new(MemoryConfigStore::new()))
            .settings(seeded())
            .task_group(&suite_group)
            .build();
    let handle = coordinator.suite_setup().unwrap();

    let leaked = suite_group
        .spawn_thread("stats-poller", |token| token.sleep(Duration::from_secs(60)))
        .unwrap();
    let outcome = handle.interrupt_threads_on_teardown("poller", true);
    assert_eq!(outcome.report().unwrap().interrupted, vec!["stats-poller"]);
    leaked.join().unwrap().unwrap_err();

    let report = coordinator.suite_teardown().unwrap();
    assert!(report.reap.is_none());
}

#[test]
fn test_hooks_out_of_order_are_rejected() {
    let _guard = test_guard!();
    let mut coordinator =
        LifecycleCoordinator::builder("OrderSuite", Arc::new(MemoryConfigStore::new()))
            .settings(seeded())
            .build();
    assert!(coordinator.before_test("too_early").is_err());
    assert!(coordinator.record_skipped("too_early").is_err());

    coordinator.suite_setup().unwrap();
    assert!(coordinator.suite_setup().is_err());
    assert_eq!(coordinator.phase(), LifecyclePhase::Running);
}
