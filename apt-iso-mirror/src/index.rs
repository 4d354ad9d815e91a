// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Merging of compressed package index files.

Multiple installation images contribute package indices at the same
relative path (e.g. `main/binary-amd64/Packages.gz`). Those files must
be concatenated, not overwritten: the merged index decompresses to the
byte-concatenation of every source's decompressed content, in the order
the sources are processed.

The merge is staged through a scratch file in the destination directory
so a partially written index is never observed. When the canonical file
is `Packages.gz`, the scratch (holding the full uncompressed
concatenation) is promoted to the `Packages` sibling and an xz-encoded
`Packages.xz` sibling is derived from it; a stale `Packages.xz` left by
a previous run is deleted first.
*/

use {
    crate::{
        emit,
        error::{MirrorError, Result},
        io::{compress_into, decompress_into, Compression},
        BuildEvent,
    },
    std::{
        fs::File,
        io::Write,
        path::Path,
    },
};

/// Name of the uncompressed package index at a component's root.
pub const PACKAGES_INDEX: &str = "Packages";

/// Scratch file name used while staging a merge.
const SCRATCH_NAME: &str = ".index.scratch";

fn io_path_err(path: &Path, e: std::io::Error) -> MirrorError {
    MirrorError::IoPath(path.display().to_string(), e)
}

/// Merge one source's compressed index file into the destination directory.
///
/// If no file of the same name exists yet under `dest_dir`, the source
/// content is decompressed and recompressed as the new canonical file.
/// Otherwise the existing destination content is decompressed first and
/// the source content appended, so earlier sources always precede later
/// ones in the final stream.
pub fn merge_index<F>(source: &Path, dest_dir: &Path, progress_cb: &Option<F>) -> Result<()>
where
    F: Fn(BuildEvent),
{
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            io_path_err(
                source,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "index path has no file name",
                ),
            )
        })?;

    let dest_path = dest_dir.join(&file_name);
    let scratch_path = dest_dir.join(SCRATCH_NAME);

    let mut scratch = File::create(&scratch_path).map_err(|e| io_path_err(&scratch_path, e))?;

    // Existing destination content first, then the new source's content.
    if dest_path.exists() {
        let mut existing = File::open(&dest_path).map_err(|e| io_path_err(&dest_path, e))?;
        decompress_into(&mut existing, &mut scratch, Compression::Gzip)
            .map_err(|e| io_path_err(&dest_path, e))?;
    }

    let mut incoming = File::open(source).map_err(|e| io_path_err(source, e))?;
    decompress_into(&mut incoming, &mut scratch, Compression::Gzip)
        .map_err(|e| io_path_err(source, e))?;

    scratch.flush().map_err(|e| io_path_err(&scratch_path, e))?;
    drop(scratch);

    recompress(&scratch_path, &dest_path, Compression::Gzip)?;

    if file_name == format!("{}{}", PACKAGES_INDEX, Compression::Gzip.extension()) {
        let plain_path = dest_dir.join(PACKAGES_INDEX);
        let xz_path = dest_dir.join(format!("{}{}", PACKAGES_INDEX, Compression::Xz.extension()));

        if xz_path.exists() {
            std::fs::remove_file(&xz_path).map_err(|e| io_path_err(&xz_path, e))?;
        }

        std::fs::rename(&scratch_path, &plain_path).map_err(|e| io_path_err(&plain_path, e))?;

        let mut plain = File::open(&plain_path).map_err(|e| io_path_err(&plain_path, e))?;
        let xz_file = File::create(&xz_path).map_err(|e| io_path_err(&xz_path, e))?;
        compress_into(&mut plain, xz_file, Compression::Xz).map_err(|e| io_path_err(&xz_path, e))?;
    } else {
        std::fs::remove_file(&scratch_path).map_err(|e| io_path_err(&scratch_path, e))?;
    }

    emit(
        progress_cb,
        BuildEvent::IndexMerged(dest_path.display().to_string()),
    );

    Ok(())
}

fn recompress(plain: &Path, dest: &Path, compression: Compression) -> Result<()> {
    let mut reader = File::open(plain).map_err(|e| io_path_err(plain, e))?;
    let writer = File::create(dest).map_err(|e| io_path_err(dest, e))?;

    compress_into(&mut reader, writer, compression).map_err(|e| io_path_err(dest, e))?;

    Ok(())
}
