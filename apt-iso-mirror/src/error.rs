// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("no source trees were supplied")]
    NoSources,

    #[error("no Release file found under {0}")]
    ReleaseFileNotFound(String),

    #[error("could not find a Version field in {0}")]
    VersionNotFound(String),

    #[error("no signed suite found under version directory {0}")]
    SignedSuiteNotFound(String),

    #[error("destination path {0} is not inside the merged tree")]
    PathOutsideTree(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, MirrorError>;
