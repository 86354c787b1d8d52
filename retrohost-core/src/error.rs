//! Errors reported by blocking entry points.
//!
//! Environment handlers never produce these: they answer the module with a boolean.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::variables::SetOptionError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load core module {path}: {source}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("core module does not export `{0}`")]
    MissingSymbol(&'static str),

    #[error("core module implements API version {found}, host implements {expected}")]
    ApiVersionMismatch { expected: u32, found: u32 },

    /// The worker thread that would have carried the call could not be created.
    /// The call was not made.
    #[error("failed to spawn core worker thread: {0}")]
    WorkerSpawn(#[source] io::Error),

    #[error("core worker thread panicked")]
    WorkerPanicked,

    #[error("core is not initialized")]
    NotInitialized,

    #[error("no game is loaded")]
    NoGameLoaded,

    #[error("path cannot be passed to the core: {0}")]
    InvalidPath(PathBuf),

    #[error("core refused to load the game")]
    LoadRefused,

    #[error("state serialization failed")]
    Serialization,

    #[error("core did not register a disk control interface")]
    NoDiskControl,

    #[error("invalid media index {index}, core reports {count} media")]
    InvalidMedia { index: u32, count: u32 },

    #[error("cannot set core option: {0}")]
    InvalidOption(#[from] SetOptionError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
