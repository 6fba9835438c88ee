use courier_post::Task;

use super::pattern::CronPattern;

/// A registered crontab entry.
#[derive(Debug, Clone)]
pub struct CronEntry {
    pub handle: u64,
    /// Pattern as registered.
    pub expr: String,
    /// Free-text description.
    pub memo: String,
    pub pattern: CronPattern,
    pub task: Task,
}

impl CronEntry {
    pub fn info(&self) -> String {
        format!("{} | {}", self.expr, self.memo)
    }
}
