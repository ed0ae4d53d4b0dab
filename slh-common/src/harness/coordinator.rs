//! Suite lifecycle state machine.
//!
//! ```text
//! NotStarted -> SuiteSetup -> Running (before_test <-> after_test) -> SuiteTeardown -> Done
//!                   |  \
//!                   |   `-> SetupFailed --.
//!                   `-----> Aborted ------'-> SuiteTeardown -> Done
//! ```
//!
//! One coordinator drives one suite and is consumed by teardown.

use super::clock::SuiteClock;
use super::context::{PendingInterrupt, SuiteContext, SuiteSeed};
use super::injector::{ConfigInjector, ConfigOverride};
use super::reaper::{ReapOutcome, ReapTarget, ReaperPolicy, ThreadLeakReaper};
use super::report::{BudgetDiagnostic, SuiteOutcome, SuiteReport, TestOutcome, TestTally};
use super::ssl::{RandomizedSsl, SslPosture, SslProvider};
use super::teardown::{ResetFailure, ResetStage, TeardownReset, run_resets};
use super::{AbortScope, HarnessError, HarnessResult};
use crate::config::{
    ConfigStore, DEFAULT_CONFDIR_KEY, DEFAULT_SUITE_TIMEOUT_SECS, FORCE_SUITE_ABORT_KEY,
    FORCE_TEST_ABORT_KEY, HarnessSettings, SEED_KEY, SUITE_TIMEOUT_KEY, StoreSnapshot,
    URL_SCHEME_KEY, parse_seed_str,
};
use crate::errors::ErrorCode;
use crate::tasks::{TaskGroup, TaskRegistry};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    NotStarted,
    SuiteSetup,
    Running,
    SuiteTeardown,
    Done,
    /// A force flag skipped the suite.
    Aborted,
    SetupFailed,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::SuiteSetup => "suite-setup",
            Self::Running => "running",
            Self::SuiteTeardown => "suite-teardown",
            Self::Done => "done",
            Self::Aborted => "aborted",
            Self::SetupFailed => "setup-failed",
        };
        f.write_str(name)
    }
}

/// Handle given to tests once setup succeeds.
///
/// Cheap to clone and safe to use from any test thread.
#[derive(Debug, Clone)]
pub struct SuiteHandle {
    context: Arc<SuiteContext>,
    reaper: Arc<ThreadLeakReaper>,
}

impl SuiteHandle {
    pub fn context(&self) -> &SuiteContext {
        &self.context
    }

    pub fn seed(&self) -> SuiteSeed {
        self.context.seed
    }

    pub fn fast_mode(&self) -> bool {
        self.context.fast_mode
    }

    pub fn ssl(&self) -> &SslPosture {
        &self.context.ssl
    }

    /// Interrupt tasks named like `filter` now, or mark them for teardown.
    pub fn interrupt_threads_on_teardown(&self, filter: &str, now: bool) -> ReapOutcome {
        self.reaper.reap(&self.context, Some(filter), now)
    }
}

/// Config-store state captured before a test, restored after it.
#[derive(Debug)]
pub struct TestScope {
    name: String,
    snapshot: StoreSnapshot,
}

impl TestScope {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct LifecycleCoordinatorBuilder {
    suite_name: String,
    store: Arc<dyn ConfigStore>,
    settings: HarnessSettings,
    ssl_provider: Box<dyn SslProvider>,
    resets: Vec<Box<dyn TeardownReset>>,
    reap_target: Option<Arc<dyn ReapTarget>>,
    reference_group: Option<String>,
    clock: SuiteClock,
}

impl LifecycleCoordinatorBuilder {
    pub fn settings(mut self, settings: HarnessSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Read settings from `SLH_*` variables; every malformed one is reported.
    pub fn settings_from_env(self) -> HarnessResult<Self> {
        let settings = HarnessSettings::from_env().map_err(HarnessError::Environment)?;
        Ok(self.settings(settings))
    }

    pub fn ssl_provider(mut self, provider: impl SslProvider + 'static) -> Self {
        self.ssl_provider = Box::new(provider);
        self
    }

    /// Register a collaborator reset for teardown.
    pub fn reset_step(mut self, step: Box<dyn TeardownReset>) -> Self {
        self.resets.push(step);
        self
    }

    pub fn reap_target(mut self, target: Arc<dyn ReapTarget>) -> Self {
        self.reap_target = Some(target);
        self
    }

    /// Reap within `group`'s registry, treating `group` as the suite's group.
    pub fn task_group(mut self, group: &TaskGroup) -> Self {
        self.reap_target = Some(Arc::new(group.registry().clone()));
        self.reference_group = Some(group.name().to_string());
        self
    }

    pub fn clock(mut self, clock: SuiteClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> LifecycleCoordinator {
        let target = self
            .reap_target
            .unwrap_or_else(|| Arc::new(TaskRegistry::global().clone()));
        let policy = ReaperPolicy {
            protected_prefixes: self.settings.protected_prefixes.value.clone(),
            reference_group: self.reference_group,
        };
        LifecycleCoordinator {
            suite_name: self.suite_name,
            store: self.store,
            settings: self.settings,
            ssl_provider: self.ssl_provider,
            resets: self.resets,
            reaper: Arc::new(ThreadLeakReaper::new(target, policy)),
            clock: self.clock,
            phase: LifecyclePhase::NotStarted,
            context: None,
            suite_snapshot: None,
            applied: Vec::new(),
            tally: TestTally::default(),
        }
    }
}

/// Drives one suite through its lifecycle hooks.
pub struct LifecycleCoordinator {
    suite_name: String,
    store: Arc<dyn ConfigStore>,
    settings: HarnessSettings,
    ssl_provider: Box<dyn SslProvider>,
    resets: Vec<Box<dyn TeardownReset>>,
    reaper: Arc<ThreadLeakReaper>,
    clock: SuiteClock,
    phase: LifecyclePhase,
    context: Option<Arc<SuiteContext>>,
    suite_snapshot: Option<StoreSnapshot>,
    applied: Vec<ConfigOverride>,
    tally: TestTally,
}

impl fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("suite_name", &self.suite_name)
            .field("phase", &self.phase)
            .field("tally", &self.tally)
            .finish_non_exhaustive()
    }
}

impl LifecycleCoordinator {
    pub fn builder(
        suite_name: impl Into<String>,
        store: Arc<dyn ConfigStore>,
    ) -> LifecycleCoordinatorBuilder {
        LifecycleCoordinatorBuilder {
            suite_name: suite_name.into(),
            store,
            settings: HarnessSettings::default(),
            ssl_provider: Box::new(RandomizedSsl::default()),
            resets: Vec::new(),
            reap_target: None,
            reference_group: None,
            clock: SuiteClock::monotonic(),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn suite_name(&self) -> &str {
        &self.suite_name
    }

    pub fn context(&self) -> Option<&Arc<SuiteContext>> {
        self.context.as_ref()
    }

    pub fn applied_overrides(&self) -> &[ConfigOverride] {
        &self.applied
    }

    pub fn tally(&self) -> TestTally {
        self.tally
    }

    pub fn reaper(&self) -> &Arc<ThreadLeakReaper> {
        &self.reaper
    }

    /// Run suite setup.
    ///
    /// A set suite force flag aborts before anything is applied. Otherwise
    /// overrides, SSL posture and URL scheme are written; if any step
    /// fails the store is rolled back and the suite is marked failed.
    pub fn suite_setup(&mut self) -> HarnessResult<SuiteHandle> {
        self.expect_phase("suite_setup", &[LifecyclePhase::NotStarted])?;
        self.phase = LifecyclePhase::SuiteSetup;

        if self.store.get_bool(FORCE_SUITE_ABORT_KEY, false) {
            self.phase = LifecyclePhase::Aborted;
            let err = HarnessError::AssumptionAbort {
                flag: FORCE_SUITE_ABORT_KEY,
                scope: AbortScope::Suite,
            };
            warn!(suite = %self.suite_name, code = %err.code().code_string(), "{err}");
            return Err(err);
        }

        let seed = self.resolve_seed();
        let fast_mode = self.settings.fast_mode();
        let budget = Duration::from_secs(
            self.store
                .get_u64(SUITE_TIMEOUT_KEY, DEFAULT_SUITE_TIMEOUT_SECS),
        );
        info!(suite = %self.suite_name, %seed, fast_mode, budget_secs = budget.as_secs(), "suite setup");

        let snapshot = self.store.snapshot();
        let ssl = match self.configure(seed, fast_mode) {
            Ok(ssl) => ssl,
            Err(err) => {
                if let Err(restore_err) = self.store.restore(&snapshot) {
                    error!(
                        code = %ErrorCode::TeardownRestoreFailed.code_string(),
                        error = %restore_err,
                        "rollback after failed setup did not complete"
                    );
                }
                self.applied.clear();
                self.phase = LifecyclePhase::SetupFailed;
                error!(suite = %self.suite_name, code = %err.code().code_string(), error = %err, "suite setup failed");
                return Err(err);
            }
        };
        self.probe_default_confdir();
        self.suite_snapshot = Some(snapshot);

        let context = Arc::new(SuiteContext {
            suite_name: self.suite_name.clone(),
            seed,
            fast_mode,
            ssl,
            started: self.clock.start(),
            budget,
            pending: PendingInterrupt::default(),
        });
        self.context = Some(Arc::clone(&context));
        self.phase = LifecyclePhase::Running;

        Ok(SuiteHandle {
            context,
            reaper: Arc::clone(&self.reaper),
        })
    }

    /// Decide whether the next test runs. Never changes coordinator state.
    pub fn before_test(&self, test_name: &str) -> HarnessResult<TestScope> {
        self.expect_phase("before_test", &[LifecyclePhase::Running])?;
        if self.store.get_bool(FORCE_TEST_ABORT_KEY, false) {
            let err = HarnessError::AssumptionAbort {
                flag: FORCE_TEST_ABORT_KEY,
                scope: AbortScope::Test,
            };
            info!(test = test_name, code = %err.code().code_string(), "{err}");
            return Err(err);
        }
        Ok(TestScope {
            name: test_name.to_string(),
            snapshot: self.store.snapshot(),
        })
    }

    /// Undo the test's config changes and record its outcome.
    pub fn after_test(&mut self, scope: TestScope, outcome: TestOutcome) -> HarnessResult<()> {
        self.expect_phase("after_test", &[LifecyclePhase::Running])?;
        if let Err(err) = self.store.restore(&scope.snapshot) {
            warn!(
                test = %scope.name,
                code = %ErrorCode::TeardownRestoreFailed.code_string(),
                error = %err,
                "could not restore config after test"
            );
        }
        debug!(test = %scope.name, ?outcome, "test finished");
        self.tally.record(outcome);
        Ok(())
    }

    /// Count a test that never ran, e.g. after `before_test` refused it.
    pub fn record_skipped(&mut self, test_name: &str) -> HarnessResult<()> {
        self.expect_phase("record_skipped", &[LifecyclePhase::Running])?;
        debug!(test = test_name, "test skipped");
        self.tally.record(TestOutcome::Skipped);
        Ok(())
    }

    /// Tear the suite down and report.
    ///
    /// Resets run first, each isolated from the others, then any pending
    /// reap, then the budget check. The suite's config snapshot is
    /// restored last. Nothing here returns an error once the phase check
    /// passes.
    pub fn suite_teardown(mut self) -> HarnessResult<SuiteReport> {
        let entered_from = self.phase;
        self.expect_phase(
            "suite_teardown",
            &[
                LifecyclePhase::Running,
                LifecyclePhase::Aborted,
                LifecyclePhase::SetupFailed,
            ],
        )?;
        self.phase = LifecyclePhase::SuiteTeardown;

        let mut reset_failures = run_resets(&self.resets);

        let reap = self
            .context
            .as_ref()
            .filter(|ctx| ctx.pending.is_set())
            .map(|ctx| self.reaper.reap_pending(ctx));

        let outcome = match entered_from {
            LifecyclePhase::Aborted => SuiteOutcome::Aborted,
            LifecyclePhase::SetupFailed => SuiteOutcome::SetupFailed,
            _ if self.tally.failed > 0 => SuiteOutcome::Failed,
            _ => SuiteOutcome::Passed,
        };

        let (elapsed, budget) = match &self.context {
            Some(ctx) => (self.clock.elapsed(&ctx.started), ctx.budget),
            None => (Duration::ZERO, Duration::ZERO),
        };
        let fast_mode = self.settings.fast_mode();
        let budget_exceeded = (outcome == SuiteOutcome::Passed
            && fast_mode
            && elapsed.as_secs() > budget.as_secs())
        .then(|| {
            let diag = BudgetDiagnostic::new(&self.suite_name, elapsed.as_secs(), budget.as_secs());
            error!(
                suite = %self.suite_name,
                code = %diag.code,
                elapsed_secs = diag.elapsed_secs,
                budget_secs = diag.budget_secs,
                "{}",
                diag.message
            );
            diag
        });

        if let Some(snapshot) = self.suite_snapshot.take()
            && let Err(err) = self.store.restore(&snapshot)
        {
            let code = ErrorCode::TeardownRestoreFailed;
            error!(code = %code.code_string(), error = %err, "could not restore suite config");
            reset_failures.push(ResetFailure {
                stage: ResetStage::Other,
                step: "config-store-restore".to_string(),
                code: code.code_string(),
                message: err.to_string(),
            });
        }

        let report = SuiteReport {
            suite: self.suite_name.clone(),
            seed: self
                .context
                .as_ref()
                .map(|ctx| ctx.seed.to_string())
                .unwrap_or_default(),
            fast_mode,
            outcome,
            tests: self.tally,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            budget_secs: budget.as_secs(),
            ssl: self.context.as_ref().map(|ctx| ctx.ssl.clone()),
            budget_exceeded,
            reset_failures,
            reap,
        };
        self.phase = LifecyclePhase::Done;
        info!(suite = %report.suite, outcome = ?report.outcome, elapsed_ms = report.elapsed_ms, "suite teardown complete");
        Ok(report)
    }

    fn expect_phase(&self, hook: &'static str, allowed: &[LifecyclePhase]) -> HarnessResult<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(HarnessError::InvalidPhase {
                hook,
                phase: self.phase,
            })
        }
    }

    fn resolve_seed(&self) -> SuiteSeed {
        if let Some(seed) = self.settings.seed.value {
            return SuiteSeed(seed);
        }
        if let Some(raw) = self.store.get(SEED_KEY) {
            match parse_seed_str(&raw) {
                Some(seed) => return SuiteSeed(seed),
                None => warn!(key = SEED_KEY, value = %raw, "ignoring unparsable seed"),
            }
        }
        SuiteSeed::random()
    }

    fn configure(&mut self, seed: SuiteSeed, fast_mode: bool) -> HarnessResult<SslPosture> {
        self.applied = ConfigInjector::apply(self.store.as_ref(), seed, fast_mode)?;
        let ssl = self.ssl_provider.randomize(seed, fast_mode)?;
        self.store
            .set(URL_SCHEME_KEY, ssl.url_scheme().as_str())?;
        Ok(ssl)
    }

    /// Advertise the default config dir unless the store already names one.
    fn probe_default_confdir(&self) {
        if let Some(existing) = self.store.get(DEFAULT_CONFDIR_KEY) {
            info!(key = DEFAULT_CONFDIR_KEY, value = %existing, "config dir already set");
            return;
        }
        let Some(dir) = &self.settings.default_confdir.value else {
            debug!("no default config dir configured");
            return;
        };
        if !dir.is_dir() {
            warn!(
                key = DEFAULT_CONFDIR_KEY,
                path = %dir.display(),
                "default config dir is missing or not a directory; you may need to set the key yourself"
            );
            return;
        }
        match self.store.set(DEFAULT_CONFDIR_KEY, &dir.to_string_lossy()) {
            Ok(()) => info!(key = DEFAULT_CONFDIR_KEY, path = %dir.display(), "set default config dir"),
            Err(err) => warn!(key = DEFAULT_CONFDIR_KEY, error = %err, "could not set default config dir"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;
    use crate::harness::clock::ManualClock;
    use crate::harness::ssl::SslError;
    use crate::harness::teardown::{ResetError, reset_fn};
    use crate::test_guard;

    struct FailingSsl;

    impl SslProvider for FailingSsl {
        fn randomize(&self, _seed: SuiteSeed, _fast_mode: bool) -> Result<SslPosture, SslError> {
            Err(SslError::Provider("keystore missing".to_string()))
        }
    }

    fn coordinator(store: &Arc<MemoryConfigStore>) -> LifecycleCoordinatorBuilder {
        let registry = TaskRegistry::new();
        LifecycleCoordinator::builder("CoordinatorTest", store.clone())
            .settings(HarnessSettings::default().with_seed(42))
            .task_group(&registry.root_group("suite"))
    }

    #[test]
    fn test_setup_moves_to_running_and_applies_overrides() {
        let _guard = test_guard!();
        let store = Arc::new(MemoryConfigStore::new());
        let mut c = coordinator(&store).build();

        let handle = c.suite_setup().unwrap();
        assert_eq!(c.phase(), LifecyclePhase::Running);
        assert_eq!(handle.seed(), SuiteSeed(42));
        assert!(handle.fast_mode());
        assert_eq!(store.get(URL_SCHEME_KEY).as_deref(), Some("http"));
        assert_eq!(store.get("net.socket_timeout_ms").as_deref(), Some("30000"));
        assert!(!c.applied_overrides().is_empty());
    }

    #[test]
    fn test_seed_falls_back_to_store() {
        let _guard = test_guard!();
        let store = Arc::new(MemoryConfigStore::with_entries([(SEED_KEY, "0x10")]));
        let mut c = LifecycleCoordinator::builder("SeedFromStore", store.clone()).build();
        assert_eq!(c.suite_setup().unwrap().seed(), SuiteSeed(16));
    }

    #[test]
    fn test_ssl_failure_rolls_back_overrides() {
        let _guard = test_guard!();
        let store = Arc::new(MemoryConfigStore::with_entries([("existing", "1")]));
        let mut c = coordinator(&store).ssl_provider(FailingSsl).build();

        let err = c.suite_setup().unwrap_err();
        assert_eq!(err.code(), ErrorCode::SetupSslProvider);
        assert_eq!(c.phase(), LifecyclePhase::SetupFailed);
        assert!(store.get("net.socket_timeout_ms").is_none());
        assert_eq!(store.get("existing").as_deref(), Some("1"));

        let report = c.suite_teardown().unwrap();
        assert_eq!(report.outcome, SuiteOutcome::SetupFailed);
    }

    #[test]
    fn test_hooks_reject_wrong_phase() {
        let _guard = test_guard!();
        let store = Arc::new(MemoryConfigStore::new());
        let mut c = coordinator(&store).build();

        let err = c.before_test("too_early").unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPhase { hook: "before_test", .. }));

        c.suite_setup().unwrap();
        assert!(matches!(
            c.suite_setup().unwrap_err(),
            HarnessError::InvalidPhase { .. }
        ));
    }

    #[test]
    fn test_teardown_before_setup_is_rejected() {
        let _guard = test_guard!();
        let store = Arc::new(MemoryConfigStore::new());
        let err = coordinator(&store).build().suite_teardown().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalInvalidPhase);
    }

    #[test]
    fn test_failed_test_marks_suite_failed_and_skips_budget_check() {
        let _guard = test_guard!();
        let store = Arc::new(MemoryConfigStore::new());
        let manual = Arc::new(ManualClock::new());
        let mut c = coordinator(&store)
            .clock(SuiteClock::with_clock(manual.clone()))
            .build();

        c.suite_setup().unwrap();
        let scope = c.before_test("test_broken").unwrap();
        c.after_test(scope, TestOutcome::Failed).unwrap();
        manual.advance(Duration::from_secs(60));

        let report = c.suite_teardown().unwrap();
        assert_eq!(report.outcome, SuiteOutcome::Failed);
        assert!(report.budget_exceeded.is_none());
        assert_eq!(report.tests.failed, 1);
    }

    #[test]
    fn test_nightly_suite_has_no_budget_diagnostic() {
        let _guard = test_guard!();
        let store = Arc::new(MemoryConfigStore::new());
        let manual = Arc::new(ManualClock::new());
        let mut c = coordinator(&store)
            .settings(HarnessSettings::default().with_seed(1).with_nightly(true))
            .ssl_provider(RandomizedSsl::new(0.0, 0.0).unwrap())
            .clock(SuiteClock::with_clock(manual.clone()))
            .build();

        c.suite_setup().unwrap();
        manual.advance(Duration::from_secs(120));
        let report = c.suite_teardown().unwrap();
        assert_eq!(report.outcome, SuiteOutcome::Passed);
        assert!(!report.fast_mode);
        assert!(report.budget_exceeded.is_none());
        assert!(store.get("net.socket_timeout_ms").is_none());
    }

    #[test]
    fn test_confdir_probe() {
        let _guard = test_guard!();
        let dir = tempfile::tempdir().unwrap();

        let store = Arc::new(MemoryConfigStore::new());
        let mut c = coordinator(&store)
            .settings(
                HarnessSettings::default()
                    .with_seed(1)
                    .with_default_confdir(dir.path()),
            )
            .build();
        c.suite_setup().unwrap();
        assert_eq!(
            store.get(DEFAULT_CONFDIR_KEY),
            Some(dir.path().to_string_lossy().into_owned())
        );

        let preset = Arc::new(MemoryConfigStore::with_entries([(
            DEFAULT_CONFDIR_KEY,
            "/srv/conf",
        )]));
        let mut c = coordinator(&preset)
            .settings(
                HarnessSettings::default()
                    .with_seed(1)
                    .with_default_confdir(dir.path()),
            )
            .build();
        c.suite_setup().unwrap();
        assert_eq!(preset.get(DEFAULT_CONFDIR_KEY).as_deref(), Some("/srv/conf"));

        let missing = Arc::new(MemoryConfigStore::new());
        let mut c = coordinator(&missing)
            .settings(
                HarnessSettings::default()
                    .with_seed(1)
                    .with_default_confdir(dir.path().join("absent")),
            )
            .build();
        c.suite_setup().unwrap();
        assert!(missing.get(DEFAULT_CONFDIR_KEY).is_none());
    }

    #[test]
    fn test_reset_failures_reach_report() {
        let _guard = test_guard!();
        let store = Arc::new(MemoryConfigStore::new());
        let mut c = coordinator(&store)
            .reset_step(reset_fn(ResetStage::ClientFactory, "http-builder", || {
                Err(ResetError::new("builder already closed"))
            }))
            .build();
        c.suite_setup().unwrap();

        let report = c.suite_teardown().unwrap();
        assert_eq!(report.outcome, SuiteOutcome::Passed);
        assert_eq!(report.reset_failures.len(), 1);
        assert_eq!(report.diagnostic_codes(), vec!["SLH-E200"]);
        assert!(store.get("net.socket_timeout_ms").is_none());
    }
}
