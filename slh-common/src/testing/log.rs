//! JSONL logs for harness test runs.
//!
//! Every entry names the test and the lifecycle phase it was written in.
//! Once a logger is tagged with a [`SuiteContext`], entries also carry the
//! suite name and its seed, so a failing suite found in CI logs can be
//! rerun locally with `SLH_SEED=<seed>` to get the same config overrides
//! and SSL posture.
//!
//! Call `init_global_test_logging()` once per test binary:
//!
//! ```ignore
//! #[ctor::ctor]
//! fn setup() {
//!     slh_common::testing::init_global_test_logging();
//! }
//! ```

use crate::config::log_directive;
use crate::harness::{SuiteContext, SuiteSeed};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

/// Where in the suite lifecycle an entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    SuiteSetup,
    BeforeTest,
    Execute,
    AfterTest,
    SuiteTeardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SuiteSetup => "suite_setup",
            Self::BeforeTest => "before_test",
            Self::Execute => "execute",
            Self::AfterTest => "after_test",
            Self::SuiteTeardown => "suite_teardown",
        })
    }
}

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Install the process-wide subscriber for a test binary.
///
/// Events go to `target/test-logs/all_tests.jsonl` and to the test writer.
/// `SLH_TEST_LOG_FILE` moves the file; `SLH_TEST_LOG_LEVEL` takes the same
/// values as `SLH_LOG_LEVEL` (a level or a filter directive).
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = create_global_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_thread_names(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .compact();

        let level = std::env::var("SLH_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(log_directive(&level))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_directive("info")));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_global_log_file() -> Option<std::fs::File> {
    let path = match std::env::var("SLH_TEST_LOG_FILE") {
        Ok(custom) => PathBuf::from(custom),
        Err(_) => test_log_dir().join("all_tests.jsonl"),
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::File::create(path).ok()
}

/// `target/test-logs`, found via CARGO_TARGET_DIR or by walking up from cwd.
fn test_log_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir).join("test-logs");
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target.join("test-logs");
        }
        if !cwd.pop() {
            return PathBuf::from("target/test-logs");
        }
    }
}

/// The suite a test ran under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteTag {
    pub suite: String,
    pub seed: SuiteSeed,
}

impl From<&SuiteContext> for SuiteTag {
    fn from(ctx: &SuiteContext) -> Self {
        Self {
            suite: ctx.suite_name.clone(),
            seed: ctx.seed,
        }
    }
}

/// One JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    /// RFC 3339.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    /// Seed as `0x` hex, ready for `SLH_SEED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    pub test_name: String,
    pub phase: TestPhase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub elapsed_ms: u64,
}

/// Per-test JSONL logger.
///
/// Entries are kept in memory and, when the log directory is writable,
/// appended to `target/test-logs/<test>.jsonl`.
pub struct TestLogger {
    test_name: String,
    started: Instant,
    tag: Mutex<Option<SuiteTag>>,
    entries: Mutex<Vec<TestLogEntry>>,
    file: Option<Mutex<std::fs::File>>,
}

impl TestLogger {
    pub fn for_test(test_name: &str) -> Self {
        let logger = Self {
            test_name: test_name.to_string(),
            started: Instant::now(),
            tag: Mutex::new(None),
            entries: Mutex::new(Vec::new()),
            file: open_test_file(test_name).ok().map(Mutex::new),
        };
        logger.log(TestPhase::BeforeTest, "TEST START");
        logger
    }

    /// Logger for a test that already knows its suite.
    pub fn for_suite(test_name: &str, ctx: &SuiteContext) -> Self {
        let logger = Self::for_test(test_name);
        logger.tag_suite(ctx);
        logger
    }

    /// Stamp this and every later entry with the suite name and seed.
    pub fn tag_suite(&self, ctx: &SuiteContext) {
        if let Ok(mut tag) = self.tag.lock() {
            *tag = Some(SuiteTag::from(ctx));
        }
        self.log_data(
            TestPhase::SuiteSetup,
            "SUITE TAGGED",
            serde_json::json!({ "fast_mode": ctx.fast_mode, "encrypted": ctx.ssl.encrypted }),
        );
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        self.emit(phase, message.into(), None);
    }

    pub fn log_data(&self, phase: TestPhase, message: impl Into<String>, data: serde_json::Value) {
        self.emit(phase, message.into(), Some(data));
    }

    fn emit(&self, phase: TestPhase, message: String, data: Option<serde_json::Value>) {
        let tag = self.tag.lock().ok().and_then(|tag| tag.clone());
        let entry = TestLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            suite: tag.as_ref().map(|t| t.suite.clone()),
            seed: tag.as_ref().map(|t| t.seed.to_string()),
            test_name: self.test_name.clone(),
            phase,
            message,
            data,
            elapsed_ms: self.elapsed_ms(),
        };

        if let Some(file) = &self.file
            && let Ok(mut f) = file.lock()
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let _ = writeln!(f, "{json}");
        }
        tracing::info!(
            test = %entry.test_name,
            suite = entry.suite.as_deref().unwrap_or("-"),
            seed = entry.seed.as_deref().unwrap_or("-"),
            phase = %entry.phase,
            elapsed_ms = entry.elapsed_ms,
            "{}",
            entry.message
        );
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    pub fn pass(self) {
        self.log(TestPhase::AfterTest, "TEST PASS");
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.log_data(
            TestPhase::AfterTest,
            "TEST FAIL",
            serde_json::json!({ "reason": reason.into() }),
        );
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn entries(&self) -> Vec<TestLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

fn open_test_file(test_name: &str) -> std::io::Result<std::fs::File> {
    let dir = test_log_dir();
    std::fs::create_dir_all(&dir)?;
    let safe_name = test_name.replace("::", "_").replace(['/', '\\'], "_");
    std::fs::File::create(dir.join(format!("{safe_name}.jsonl")))
}

/// Logs TEST START on creation and pass/fail on drop.
///
/// Enabled by `SLH_TEST_LOGGING=1`, or by `CI` being set unless
/// `SLH_TEST_LOGGING=0`. A disabled guard does nothing.
pub struct TestGuard {
    inner: Option<TestLogger>,
}

impl TestGuard {
    pub fn new(test_name: &str) -> Self {
        let inner = Self::is_enabled().then(|| {
            init_global_test_logging();
            TestLogger::for_test(test_name)
        });
        Self { inner }
    }

    fn is_enabled() -> bool {
        match std::env::var("SLH_TEST_LOGGING").as_deref() {
            Ok("1" | "true") => true,
            Ok("0" | "false") => false,
            _ => std::env::var("CI").is_ok(),
        }
    }

    pub fn tag_suite(&self, ctx: &SuiteContext) {
        if let Some(logger) = &self.inner {
            logger.tag_suite(ctx);
        }
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        if let Some(logger) = &self.inner {
            logger.log(phase, message);
        }
    }

    pub fn log_data(&self, phase: TestPhase, message: impl Into<String>, data: serde_json::Value) {
        if let Some(logger) = &self.inner {
            logger.log_data(phase, message, data);
        }
    }
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        if let Some(logger) = self.inner.take() {
            if std::thread::panicking() {
                logger.fail("test panicked");
            } else {
                logger.pass();
            }
        }
    }
}

/// A [`TestGuard`] named after the enclosing function.
#[macro_export]
macro_rules! test_guard {
    () => {{
        fn _f() {}
        fn _type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = _type_name_of(_f);
        let name = name.strip_suffix("::_f").unwrap_or(name);
        let name = name.rsplit("::").next().unwrap_or(name);
        $crate::testing::TestGuard::new(name)
    }};
}
