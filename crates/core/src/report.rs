//! Structured failure records.
//!
//! Every recovered task failure is packed into an [`ErrorRecord`] and handed
//! to an [`ErrorSink`]. Sinks only observe; they never change what the
//! executing loop does next.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic;
use std::sync::{Mutex, Once, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Execution context that recovered the failure (worker or group name).
    pub origin: String,
    pub error: String,
    /// Description of the task that failed, including its arguments.
    pub context: String,
    pub stack_trace: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Pack a failure, capturing the current stack.
    ///
    /// For a recovered panic, follow with [`ErrorRecord::with_stack_trace`]
    /// and the stack from [`take_panic_trace`]: by the time `pack` runs the
    /// panic has unwound and the current stack only shows the catcher.
    pub fn pack(
        origin: impl Into<String>,
        error: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            error: error.into(),
            context: context.into(),
            stack_trace: Backtrace::force_capture().to_string(),
            at: Utc::now(),
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: String) -> Self {
        self.stack_trace = stack_trace;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

thread_local! {
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Install (once per process) a panic hook that records the stack at the
/// panic site for [`take_panic_trace`]. The previous hook still runs.
pub fn capture_panic_traces() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Stack recorded by the latest panic on this thread, if any. Clears it.
pub fn take_panic_trace() -> Option<String> {
    PANIC_TRACE.with(|slot| slot.borrow_mut().take())
}

/// Render a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, record: ErrorRecord);
}

/// Sink that writes every record to the `tracing` error stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, record: ErrorRecord) {
        tracing::error!(
            origin = %record.origin,
            error = %record.error,
            context = %record.context,
            "task failed"
        );
        tracing::debug!(origin = %record.origin, "stack trace:\n{}", record.stack_trace);
    }
}

/// Sink that keeps records in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ErrorRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for MemorySink {
    fn report(&self, record: ErrorRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
