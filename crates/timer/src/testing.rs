//! Test doubles shared by the scheduler tests.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use courier_core::{Callable, ManualClock, Value};
use courier_post::{Dispatcher, PostError, Task};

/// Dispatcher that records what it was given instead of running it.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<(String, Task)>>,
}

impl RecordingDispatcher {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// First argument of every dispatched task, in dispatch order.
    pub fn tags(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, task)| task.args.first().cloned().unwrap_or_default())
            .collect()
    }

    pub fn groups(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(group, _)| group.clone())
            .collect()
    }

    /// Run every recorded task inline and forget it.
    pub fn run_all(&self) {
        let sent = std::mem::take(&mut *self.sent.lock().unwrap());
        for (_, task) in sent {
            if let courier_post::Target::Direct(callable) = &task.target {
                callable.call(task.args.clone()).unwrap();
            }
        }
    }
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, group: &str, task: Task) -> Result<(), PostError> {
        self.sent.lock().unwrap().push((group.to_string(), task));
        Ok(())
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

pub fn tagged(tag: i64) -> Task {
    Task::new(Callable::fixed(|_| {}), vec![Value::Int(tag)]).strict()
}
