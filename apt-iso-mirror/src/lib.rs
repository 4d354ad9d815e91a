// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build apt mirrors from Debian installation image trees.

This crate merges one or more read-only Debian repository trees (the
`dists/` and `pool/` hierarchies found on installation images) into a
single on-disk apt mirror and regenerates the repository's signed
metadata (`Release`, `Release.gpg`, `InRelease`) so the merged tree is a
valid, independently servable apt repository.

# A Tour of Functionality

The [tree] module implements the recursive merge of source trees into
the destination. [tree::TreeMerger] walks each source's `dists/` tree,
copying regular files, delegating compressed package indices to the
[index] module so same-named indices from multiple images are
concatenated instead of overwritten, and deferring symlink creation
until every regular entry in a directory has been materialized. It also
mirrors `pool/` trees verbatim.

The [index] module merges gzip-compressed package index files.
[index::merge_index()] decompresses and concatenates contributions from
successive sources in source order, staging through a scratch file, and
derives the uncompressed `Packages` and xz-compressed `Packages.xz`
siblings of a canonical `Packages.gz`.

The [release] module handles the `Release` document header: rewriting
`Date` and `Valid-Until` stamps, normalizing historic suite aliases
(`oldstable` becomes `stable`), disabling `Acquire-By-Hash`, and
extracting the distribution `Version` field.

The [regenerate] module recomputes the per-file checksum sections
(`MD5Sum`, `SHA1`, `SHA256`, `SHA512`) of a suite's `Release` file from
the merged tree and drives signing. [signer::ReleaseSigner] abstracts
signature production so the engine can be tested without key material;
[signer::PgpSigner] is the production implementation over the `pgp`
crate.

[builder::MirrorBuilder] orchestrates a full build: detect the Debian
version from the first source, merge every source sequentially, then
regenerate and sign the merged suite. It also supports a maintenance
mode that re-signs an already-merged tree.

Long-running operations report progress through [BuildEvent] values
delivered to an optional callback, in the spirit of keeping the library
silent on stdout.
*/

pub mod builder;
pub mod error;
pub mod index;
pub mod io;
pub mod regenerate;
pub mod release;
pub mod signer;
pub mod tree;

/// Represents an event during a mirror build.
pub enum BuildEvent {
    /// Detected the Debian version of the source images.
    VersionDetected(String),

    /// Started merging a source tree into the destination.
    SourceMergeBegin(String),

    /// A `dists/` entry was visited.
    DistsEntry(String),

    /// A `pool/` entry was visited.
    PoolEntry(String),

    /// A compressed package index was merged into the destination.
    IndexMerged(String),

    /// A deferred symlink was created (target, link path).
    SymlinkCreated(String, String),

    /// A deferred symlink was skipped because its path is occupied.
    SymlinkSkipped(String),

    /// An entry of an unsupported filesystem type was encountered.
    UnexpectedEntry(String),

    /// An expected component directory is absent from the merged tree.
    ComponentMissing(String),

    /// Started emitting a checksum section of the `Release` file.
    ChecksumSectionBegin(&'static str),

    /// A file was digested for the `Release` checksum tables.
    ChecksumEntry(String),

    /// The regenerated `Release` file replaced the old one.
    ReleaseFileWritten(String),

    /// `Release.gpg` and `InRelease` were written.
    SignaturesWritten(String),

    /// The signing public key was exported.
    SigningKeyExported(String),
}

impl std::fmt::Display for BuildEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionDetected(version) => {
                write!(f, "found Debian {}", version)
            }
            Self::SourceMergeBegin(path) => {
                write!(f, "merging source {}", path)
            }
            Self::DistsEntry(path) => {
                write!(f, "dists: {}", path)
            }
            Self::PoolEntry(path) => {
                write!(f, "pool: {}", path)
            }
            Self::IndexMerged(path) => {
                write!(f, "merged package index {}", path)
            }
            Self::SymlinkCreated(target, path) => {
                write!(f, "created symlink {} -> {}", path, target)
            }
            Self::SymlinkSkipped(path) => {
                write!(f, "symlink path {} already occupied", path)
            }
            Self::UnexpectedEntry(path) => {
                write!(f, "unexpected entry type: {}", path)
            }
            Self::ComponentMissing(path) => {
                write!(f, "component directory {} is missing", path)
            }
            Self::ChecksumSectionBegin(field) => {
                write!(f, "generating {} section", field)
            }
            Self::ChecksumEntry(path) => {
                write!(f, "checksum: {}", path)
            }
            Self::ReleaseFileWritten(path) => {
                write!(f, "wrote {}", path)
            }
            Self::SignaturesWritten(path) => {
                write!(f, "wrote Release.gpg and InRelease under {}", path)
            }
            Self::SigningKeyExported(path) => {
                write!(f, "exported signing key to {}", path)
            }
        }
    }
}

/// Deliver a [BuildEvent] to an optional progress callback.
pub(crate) fn emit<F>(progress_cb: &Option<F>, event: BuildEvent)
where
    F: Fn(BuildEvent),
{
    if let Some(cb) = progress_cb {
        cb(event);
    }
}
