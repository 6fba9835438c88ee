use courier_post::PostError;
use courier_timer::{CronError, TimerError};
use thiserror::Error;

/// Errors raised while configuring or starting a [`crate::Courier`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error(transparent)]
    Post(#[from] PostError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error("crontab error: {0}")]
    Cron(#[from] CronError),
}
