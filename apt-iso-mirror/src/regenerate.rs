// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Regeneration of a suite's `Release` file and signatures.

After all sources are merged, the suite's `Release` file still carries
the checksum tables from the last source image, describing a tree that
no longer exists. [ReleaseRegenerator] rebuilds those tables from the
merged tree: it normalizes the `Release` header, preserves the preamble
through the `Description:` line, then writes one section per supported
digest listing every file below the suite's component directories with
its hash, size, and suite-relative path.

The rebuilt `Release` is staged in a sibling file and renamed into
place, so a failure mid-checksum leaves the previous file intact. The
same staging applies to `Release.gpg`, `InRelease`, and the exported
`KEY.gpg`: each new artifact is fully written before it replaces its
predecessor, so a signing failure never strips an existing signature.
*/

use {
    crate::{
        emit,
        error::{MirrorError, Result},
        io::{digest_file, ChecksumType},
        release::rewrite_release_header,
        signer::ReleaseSigner,
        BuildEvent,
    },
    std::{
        fs::{self, File},
        io::{BufRead, BufReader, BufWriter, Write},
        path::Path,
    },
};

/// Component directories contributing to the checksum tables.
const COMPONENTS: &[&str] = &["main", "contrib", "non-free"];

/// The final preamble line carried over from the old `Release` file.
const PREAMBLE_END_PREFIX: &str = "Description:";

fn io_path_err(path: &Path, e: std::io::Error) -> MirrorError {
    MirrorError::IoPath(path.display().to_string(), e)
}

/// Write `content` to `path`, staging through a sibling temporary file.
///
/// The rename makes replacement of an existing file all-or-nothing.
fn replace_file(path: &Path, content: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let staging = path.with_file_name(format!("{}.tmp", file_name));

    fs::write(&staging, content).map_err(|e| io_path_err(&staging, e))?;
    fs::rename(&staging, path).map_err(|e| io_path_err(path, e))?;

    Ok(())
}

/// Rebuilds and signs a suite's `Release` metadata.
pub struct ReleaseRegenerator<'a, S, F>
where
    S: ReleaseSigner,
    F: Fn(BuildEvent),
{
    signer: &'a S,
    progress_cb: &'a Option<F>,
}

impl<'a, S, F> ReleaseRegenerator<'a, S, F>
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

    /// Regenerate `Release`, `Release.gpg`, `InRelease`, and `KEY.gpg`
    /// for the suite at `dists_root/suite_rel_path`.
    ///
    /// Preconditions: every file below the suite's component
    /// directories has been fully written. Checksums describe the tree
    /// as it is at call time.
    pub fn regenerate(&self, dists_root: &Path, suite_rel_path: &str) -> Result<()> {
        let suite_dir = dists_root.join(suite_rel_path);
        let release_path = suite_dir.join("Release");

        if !release_path.is_file() {
            return Err(MirrorError::ReleaseFileNotFound(
                release_path.display().to_string(),
            ));
        }

        rewrite_release_header(&release_path)?;

        let staging_path = suite_dir.join("Release.tmp");

        {
            let mut writer = BufWriter::new(
                File::create(&staging_path).map_err(|e| io_path_err(&staging_path, e))?,
            );

            self.write_preamble(&release_path, &mut writer)?;

            for checksum in ChecksumType::release_order() {
                emit(
                    self.progress_cb,
                    BuildEvent::ChecksumSectionBegin(checksum.field_name()),
                );


                writer
                    .write_all(format!("{}:\n", checksum.field_name()).as_bytes())
                    .map_err(|e| io_path_err(&staging_path, e))?;

                for component in COMPONENTS {
                    let component_dir = suite_dir.join(component);

                    if !component_dir.is_dir() {
                        emit(
                            self.progress_cb,
                            BuildEvent::ComponentMissing(component_dir.display().to_string()),
                        );
                        continue;
                    }

                    self.write_checksums(&component_dir, &suite_dir, checksum, &mut writer)?;
                }
            }

            writer.flush().map_err(|e| io_path_err(&staging_path, e))?;
        }

        fs::rename(&staging_path, &release_path).map_err(|e| io_path_err(&release_path, e))?;
        emit(
            self.progress_cb,
            BuildEvent::ReleaseFileWritten(release_path.display().to_string()),
        );

        // Produce all signatures in memory before replacing anything on
        // disk, so a failed signer never leaves the suite without valid
        // signed artifacts.
        let release_content =
            fs::read(&release_path).map_err(|e| io_path_err(&release_path, e))?;

        let detached = self.signer.sign_detached(&release_content)?;
        let cleartext = self.signer.sign_cleartext(&release_content)?;
        let public_key = self.signer.armored_public_key()?;

        replace_file(&suite_dir.join("Release.gpg"), detached.as_bytes())?;
        replace_file(&suite_dir.join("InRelease"), cleartext.as_bytes())?;
        emit(
            self.progress_cb,
            BuildEvent::SignaturesWritten(suite_dir.display().to_string()),
        );

        let key_path = suite_dir.join("KEY.gpg");
        replace_file(&key_path, public_key.as_bytes())?;
        emit(
            self.progress_cb,
            BuildEvent::SigningKeyExported(key_path.display().to_string()),
        );

        Ok(())
    }

    /// Copy the old `Release` preamble, through the `Description:` line.
    fn write_preamble(&self, release_path: &Path, writer: &mut impl Write) -> Result<()> {
        let reader = BufReader::new(
            File::open(release_path).map_err(|e| io_path_err(release_path, e))?,
        );

        for line in reader.lines() {
            let line = line.map_err(|e| io_path_err(release_path, e))?;

            writer
                .write_all(format!("{}\n", line).as_bytes())
                .map_err(|e| io_path_err(release_path, e))?;

            if line.starts_with(PREAMBLE_END_PREFIX) {
                break;
            }
        }

        Ok(())
    }

    /// Recursively write one checksum line per file under `dir`.
    ///
    /// Entries are visited in file name order so the emitted tables are
    /// reproducible across runs.
    fn write_checksums(
        &self,
        dir: &Path,
        suite_dir: &Path,
        checksum: ChecksumType,
        writer: &mut impl Write,
    ) -> Result<()> {
        let mut entries = fs::read_dir(dir)
            .map_err(|e| io_path_err(dir, e))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| io_path_err(dir, e))?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_path_err(&path, e))?;

            if file_type.is_dir() {
                self.write_checksums(&path, suite_dir, checksum, writer)?;
            } else {
                emit(
                    self.progress_cb,
                    BuildEvent::ChecksumEntry(path.display().to_string()),
                );

                let digest = digest_file(&path, checksum)?;
                let size = fs::metadata(&path)
                    .map_err(|e| io_path_err(&path, e))?
                    .len();
                let rel_path = path
                    .strip_prefix(suite_dir)
                    .map_err(|_| MirrorError::PathOutsideTree(path.display().to_string()))?
                    .to_string_lossy()
                    .to_string();

                writer
                    .write_all(format!(" {:>9} {:>9} {:>9}\n", digest, size, rel_path).as_bytes())
                    .map_err(|e| io_path_err(&path, e))?;
            }
        }

        Ok(())
    }
}
