//! Errors returned by this package.

use std::io;

use thiserror::Error;

/// Failure to start a traced thread via [`try_go_trace()`][crate::try_go_trace].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpawnError {
    /// The operating system refused to create the thread.
    #[error("failed to spawn traced thread")]
    Thread(#[source] io::Error),
}
