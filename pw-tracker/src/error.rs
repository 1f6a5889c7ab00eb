//! Errors raised by the tracker runtime.

use pw_core::types::PwError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] PwError),
    #[error("bad source {0:?}: expected FORMAT://HOST:PORT or FORMAT+file://PATH")]
    BadSource(String),
    #[error("unknown stream format {0:?}")]
    UnknownFormat(String),
    #[error("tracker is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, TrackerError>;
