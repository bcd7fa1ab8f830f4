//! The crate-level error type, aggregating every module's own error enum for
//! consumers (notably the CLI) that want a single type to propagate with `?`.

use thiserror::Error;


/// Any error that can occur while provisioning, authenticating or launching.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("download: {0}")]
    Download(#[from] crate::download::Error),
    #[error(transparent)]
    Base(#[from] crate::base::Error),
    #[error(transparent)]
    Moj(#[from] crate::moj::Error),
    #[error("authentication: {0}")]
    Auth(#[from] crate::msa::AuthError),
    #[error("launcher state: {0}")]
    State(#[from] crate::state::Error),
    #[error("configuration: {0}")]
    Config(#[from] crate::config::Error),
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
