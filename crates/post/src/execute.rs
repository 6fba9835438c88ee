//! Running a single task with failure isolation.

use std::panic::{self, AssertUnwindSafe};

use courier_core::report::{capture_panic_traces, panic_message, take_panic_trace};
use courier_core::{CallError, Callable, ErrorRecord, ErrorSink};
use tracing::warn;

use crate::registry::Registry;
use crate::task::{Target, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The call failed or panicked; a record was sent to the sink.
    Failed,
    /// The target name is not registered.
    Skipped,
}

/// Resolve and invoke `task`.
///
/// Failures never escape: errors and panics are packed into an
/// [`ErrorRecord`] for `sink`, tagged with `origin`.
pub fn run_task(task: Task, registry: &Registry, sink: &dyn ErrorSink, origin: &str) -> Outcome {
    let callable = match &task.target {
        Target::Direct(callable) => callable.clone(),
        Target::Named(name) => match registry.get(name) {
            Some(callable) => callable,
            None => {
                warn!(origin, function = %name, "unregistered function, task skipped");
                return Outcome::Skipped;
            }
        },
    };

    capture_panic_traces();
    let record = match panic::catch_unwind(AssertUnwindSafe(|| invoke(&callable, &task))) {
        Ok(Ok(())) => return Outcome::Completed,
        Ok(Err(e)) => ErrorRecord::pack(origin, e.to_string(), task.describe()),
        Err(payload) => {
            let record = ErrorRecord::pack(origin, panic_message(payload.as_ref()), task.describe());
            match take_panic_trace() {
                Some(trace) => record.with_stack_trace(trace),
                None => record,
            }
        }
    };
    sink.report(record);
    Outcome::Failed
}

fn invoke(callable: &Callable, task: &Task) -> Result<(), CallError> {
    if task.strict {
        return callable.call_strict(&task.args);
    }
    let results = callable.call(task.args.clone())?;
    if let Some(next) = &task.continuation {
        let mut args = Vec::with_capacity(next.args.len() + results.len());
        args.extend(next.args.iter().cloned());
        args.extend(results);
        next.callable.call(args)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{args, MemorySink, Value};
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<Vec<Value>>>>, Callable) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let callable = Callable::fixed(move |args| s.lock().unwrap().push(args.to_vec()));
        (seen, callable)
    }

    #[test]
    fn strict_call_passes_arguments_untouched() {
        let (seen, callable) = recorder();
        let registry = Registry::new();
        registry.register("record", callable).unwrap();
        let sink = MemorySink::new();

        let task = Task::new("record", args![1, "a"]).strict();
        assert_eq!(run_task(task, &registry, &sink, "w"), Outcome::Completed);
        assert_eq!(*seen.lock().unwrap(), vec![args![1, "a"]]);
        assert!(sink.is_empty());
    }

    #[test]
    fn strict_call_rejects_dynamic_callable() {
        let registry = Registry::new();
        let sink = MemorySink::new();
        let task = Task::new(Callable::dynamic(|x: i64| x), args![1]).strict();
        assert_eq!(run_task(task, &registry, &sink, "w"), Outcome::Failed);
        assert!(sink.records()[0].error.contains("fixed-signature"));
    }

    #[test]
    fn continuation_gets_its_args_then_results() {
        let (seen, done) = recorder();
        let registry = Registry::new();
        let sink = MemorySink::new();

        let task = Task::new(Callable::dynamic(|a: i64, b: i64| (a + b, a * b)), args![3, 4])
            .then(done, args!["sum-and-product"]);
        assert_eq!(run_task(task, &registry, &sink, "w"), Outcome::Completed);
        assert_eq!(*seen.lock().unwrap(), vec![args!["sum-and-product", 7, 12]]);
    }

    #[test]
    fn panic_is_recovered_into_record() {
        let registry = Registry::new();
        registry
            .register("explode", Callable::dynamic(|code: i64| -> i64 { panic!("bad code {code}") }))
            .unwrap();
        let sink = MemorySink::new();

        let outcome = run_task(Task::new("explode", args![9]), &registry, &sink, "worker-3");
        assert_eq!(outcome, Outcome::Failed);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin, "worker-3");
        assert_eq!(records[0].error, "bad code 9");
        assert!(records[0].context.starts_with("explode[9]"));
    }

    #[inline(never)]
    fn explode_site(code: i64) -> i64 {
        panic!("bad code {code}")
    }

    #[test]
    fn panic_record_carries_the_panic_site_stack() {
        let registry = Registry::new();
        registry.register("explode", Callable::dynamic(explode_site)).unwrap();
        let sink = MemorySink::new();

        run_task(Task::new("explode", args![1]), &registry, &sink, "worker-0");
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].stack_trace.contains("explode_site"));
    }

    #[test]
    fn argument_mismatch_is_a_failure() {
        let registry = Registry::new();
        let sink = MemorySink::new();
        let task = Task::new(Callable::dynamic(|s: String| s), args![1]);
        assert_eq!(run_task(task, &registry, &sink, "w"), Outcome::Failed);
        assert!(sink.records()[0].error.starts_with("argument 0"));
    }

    #[test]
    fn unknown_name_is_skipped() {
        let registry = Registry::new();
        let sink = MemorySink::new();
        let outcome = run_task(Task::new("missing", args![]), &registry, &sink, "w");
        assert_eq!(outcome, Outcome::Skipped);
        assert!(sink.is_empty());
    }
}
