// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Orchestration of a full mirror build.

[MirrorBuilder] drives one build end to end: detect the Debian version
from the first source image, merge every source's `dists/` and `pool/`
trees into `<target>/debian/<version>/`, then regenerate and sign the
merged suite's metadata.

It also supports a maintenance mode, [MirrorBuilder::resign()], that
re-runs metadata regeneration against an already-merged tree. The suite
to re-sign is located by searching the target for an existing
`Release.gpg` under `<version>/dists/<suite>/`, which handles layouts
like a security mirror's `dists/stable/updates/` where the signed suite
is not directly below `dists/`.
*/

use {
    crate::{
        emit,
        error::{MirrorError, Result},
        regenerate::ReleaseRegenerator,
        release::{release_version, CANONICAL_SUITE},
        signer::ReleaseSigner,
        tree::TreeMerger,
        BuildEvent,
    },
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

fn io_path_err(path: &Path, e: std::io::Error) -> MirrorError {
    MirrorError::IoPath(path.display().to_string(), e)
}

/// Determine the Debian version advertised by a source image.
///
/// Reads `dists/stable/Release`, falling back to `dists/oldstable/Release`
/// for images of a release that has since been superseded.
fn detect_version(source: &Path) -> Result<String> {
    let candidates = [
        source.join("dists/stable/Release"),
        source.join("dists/oldstable/Release"),
    ];

    let release_path = candidates
        .iter()
        .find(|path| path.is_file())
        .ok_or_else(|| MirrorError::ReleaseFileNotFound(candidates[0].display().to_string()))?;

    release_version(release_path)?
        .ok_or_else(|| MirrorError::VersionNotFound(release_path.display().to_string()))
}

/// Locate the signed suite under `<dir>/.../<version>/dists/<suite>/`.
///
/// Searches recursively for a `Release.gpg` whose path has the version
/// directory immediately above `dists` and a suite directory containing
/// `stable` immediately below it. Returns the `dists` root and the
/// suite path relative to it.
fn find_signed_suite(dir: &Path, version: &str) -> Result<Option<(PathBuf, String)>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| io_path_err(dir, e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| io_path_err(dir, e))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_path_err(&path, e))?;

        if file_type.is_dir() {
            if let Some(found) = find_signed_suite(&path, version)? {
                return Ok(Some(found));
            }
        } else if entry.file_name() == "Release.gpg" {
            if let Some(found) = classify_signed_path(&path, version) {
                return Ok(Some(found));
            }
        }
    }

    Ok(None)
}

fn classify_signed_path(path: &Path, version: &str) -> Option<(PathBuf, String)> {
    let components = path
        .iter()
        .map(|component| component.to_string_lossy().to_string())
        .collect::<Vec<_>>();

    // <...>/<version>/dists/<suite...>/Release.gpg
    let dists_index = components
        .iter()
        .position(|component| component == "dists")?;

    if dists_index == 0 || components[dists_index - 1] != version {
        return None;
    }

    let suite_components = &components[dists_index + 1..components.len() - 1];
    match suite_components.first() {
        Some(first) if first.contains("stable") => {}
        _ => return None,
    }

    let dists_root = path
        .iter()
        .take(dists_index + 1)
        .collect::<PathBuf>();

    Some((dists_root, suite_components.join("/")))
}

/// Builds an apt mirror from source image trees.
pub struct MirrorBuilder<'a, S, F>
where
    S: ReleaseSigner,
    F: Fn(BuildEvent),
{
    signer: &'a S,
    progress_cb: &'a Option<F>,
}

impl<'a, S, F> MirrorBuilder<'a, S, F>
where
    S: ReleaseSigner,
    F: Fn(BuildEvent),
{
    pub fn new(signer: &'a S, progress_cb: &'a Option<F>) -> Self {
        Self {
            signer,
            progress_cb,
        }
    }

    /// Build a mirror under `target` from the given source roots.
    ///
    /// Each source must expose `dists/` and `pool/` subtrees and remain
    /// readable for the whole build. Sources are merged sequentially in
    /// the order given; that order defines the concatenation order of
    /// merged package indices.
    ///
    /// Returns the version directory the mirror was written to.
    pub fn build(&self, sources: &[PathBuf], target: &Path) -> Result<PathBuf> {
        let first = sources.first().ok_or(MirrorError::NoSources)?;

        let version = detect_version(first)?;
        emit(self.progress_cb, BuildEvent::VersionDetected(version.clone()));

        let dest_root = target.join("debian").join(&version);
        fs::create_dir_all(&dest_root).map_err(|e| io_path_err(&dest_root, e))?;

        let merger = TreeMerger::new(self.progress_cb);

        for source in sources {
            emit(
                self.progress_cb,
                BuildEvent::SourceMergeBegin(source.display().to_string()),
            );

            merger.merge_dists(&source.join("dists"), &dest_root.join("dists"))?;
            merger.merge_pool(&source.join("pool"), &dest_root.join("pool"))?;
        }

        ReleaseRegenerator::new(self.signer, self.progress_cb)
            .regenerate(&dest_root.join("dists"), CANONICAL_SUITE)?;

        Ok(dest_root)
    }

    /// Re-sign an already-merged mirror under `target`.
    ///
    /// `version` selects which version directory's suite to regenerate.
    /// No merging occurs; the checksum tables and signatures are simply
    /// recomputed from the tree's current state.
    pub fn resign(&self, target: &Path, version: &str) -> Result<()> {
        let (dists_root, suite_rel_path) = find_signed_suite(target, version)?
            .ok_or_else(|| MirrorError::SignedSuiteNotFound(version.to_string()))?;

        ReleaseRegenerator::new(self.signer, self.progress_cb)
            .regenerate(&dists_root, &suite_rel_path)
    }
}
