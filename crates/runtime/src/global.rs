//! Process-wide default [`Courier`].
//!
//! Only binaries and other process-boundary code should reach for this;
//! everything else takes a `Courier` or one of its parts explicitly.

use std::sync::{Arc, OnceLock};

use courier_core::{LogSink, SystemClock};
use tracing::warn;

use crate::config::CourierConfig;
use crate::courier::Courier;
use crate::error::RuntimeError;

static COURIER: OnceLock<Courier> = OnceLock::new();

/// Start the default instance with a log sink and the system clock.
///
/// A second call returns the already running instance and ignores `config`.
pub fn init(config: CourierConfig) -> Result<&'static Courier, RuntimeError> {
    if let Some(courier) = COURIER.get() {
        return Ok(courier);
    }
    let courier = Courier::start(config, Arc::new(LogSink), Arc::new(SystemClock))?;
    if let Err(lost) = COURIER.set(courier) {
        warn!("default courier initialised concurrently; discarding duplicate");
        lost.shutdown();
    }
    COURIER
        .get()
        .ok_or_else(|| RuntimeError::Config("default courier unavailable".into()))
}

pub fn get() -> Option<&'static Courier> {
    COURIER.get()
}

/// Shut the default instance down, if it was started.
pub fn shutdown() {
    if let Some(courier) = COURIER.get() {
        courier.shutdown();
    }
}
