use courier_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PostError {
    #[error("queue of worker '{worker}' is full ({occupancy} queued)")]
    QueueFull { worker: String, occupancy: u64 },

    #[error("function '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("pool has no dedicated worker")]
    NoDedicatedWorker,

    #[error("worker '{0}' is stopped")]
    WorkerStopped(String),

    #[error("job groups are closed, cannot open group '{0}'")]
    GroupsClosed(String),

    #[error("job group '{0}' is closed")]
    GroupClosed(String),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
