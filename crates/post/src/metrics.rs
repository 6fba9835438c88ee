use serde::Serialize;

/// Point-in-time counters for one worker.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub name: String,
    pub running: bool,
    /// Tasks waiting in the queue.
    pub pending: u64,
    pub capacity: u64,
    /// Tasks that completed without error.
    pub executed: u64,
    /// Tasks that failed or panicked.
    pub failed: u64,
    /// Named tasks whose function was not registered.
    pub skipped: u64,
    /// Submissions refused because the queue was full.
    pub rejected: u64,
}

/// Worker pool metrics exposed for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    /// Every worker slot, live ones first.
    pub workers: Vec<WorkerSnapshot>,
    pub live: usize,
    pub dedicated: Option<WorkerSnapshot>,
    /// Submissions dropped because no worker was live.
    pub dropped: u64,
}

impl PoolMetrics {
    /// Tasks completed across all workers, dedicated included.
    pub fn total_executed(&self) -> u64 {
        self.workers
            .iter()
            .chain(self.dedicated.iter())
            .map(|w| w.executed)
            .sum()
    }

    pub fn total_pending(&self) -> u64 {
        self.workers
            .iter()
            .chain(self.dedicated.iter())
            .map(|w| w.pending)
            .sum()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(name: &str, executed: u64, pending: u64) -> WorkerSnapshot {
        WorkerSnapshot {
            name: name.to_string(),
            running: true,
            pending,
            capacity: 16,
            executed,
            failed: 0,
            skipped: 0,
            rejected: 0,
        }
    }

    #[test]
    fn totals_include_dedicated_worker() {
        let m = PoolMetrics {
            workers: vec![snap("a", 3, 1), snap("b", 4, 0)],
            live: 2,
            dedicated: Some(snap("d", 5, 2)),
            dropped: 0,
        };
        assert_eq!(m.total_executed(), 12);
        assert_eq!(m.total_pending(), 3);
        assert!(m.to_json().contains("\"live\":2"));
    }
}
