// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Recursive merge of source trees into the destination mirror.

[TreeMerger] composite-copies one source tree at a time into the shared
destination. Within `dists/` it delegates compressed indices to
[crate::index::merge_index()] so same-path indices concatenate across
sources, normalizes historic suite directory names, rewrites `Release`
headers as they are copied, and defers symlink creation until every
regular entry of a directory exists. `pool/` trees are mirrored
verbatim.

Sources are merged sequentially, one full recursive pass per source, in
the order they are supplied. That order defines the concatenation order
of merged indices and is part of the engine's contract.

Directory listings are visited in lexicographic file name order so
merges (and the checksum tables later computed over them) are
reproducible across runs and filesystems.
*/

use {
    crate::{
        emit,
        error::{MirrorError, Result},
        index::merge_index,
        release::{normalize_suite_name, rewrite_release_header},
        BuildEvent,
    },
    std::{
        ffi::OsStr,
        fs,
        os::unix::fs::{symlink, PermissionsExt},
        path::{Path, PathBuf},
    },
};

/// Mode applied to regular files copied into the `dists/` tree.
const DISTS_FILE_MODE: u32 = 0o644;

fn io_path_err(path: &Path, e: std::io::Error) -> MirrorError {
    MirrorError::IoPath(path.display().to_string(), e)
}

/// Read a directory's entries sorted by file name.
fn sorted_entries(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| io_path_err(dir, e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| io_path_err(dir, e))?;

    entries.sort_by_key(|entry| entry.file_name());

    Ok(entries)
}

/// Merges source trees into a destination tree.
pub struct TreeMerger<'a, F>
where
    F: Fn(BuildEvent),
{
    progress_cb: &'a Option<F>,
}

impl<'a, F> TreeMerger<'a, F>
where
    F: Fn(BuildEvent),
{
    /// Construct a merger reporting progress to the given callback.
    pub fn new(progress_cb: &'a Option<F>) -> Self {
        Self { progress_cb }
    }

    /// Merge a source `dists/` tree into the destination `dists/` tree.
    pub fn merge_dists(&self, source: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest).map_err(|e| io_path_err(dest, e))?;

        self.merge_dists_dir(source, dest)
    }

    fn merge_dists_dir(&self, source_dir: &Path, dest_dir: &Path) -> Result<()> {
        // Symlinks are materialized only after every other entry in this
        // directory, because some alias names that a regular entry in the
        // same listing populates.
        let mut deferred: Vec<(PathBuf, String)> = vec![];

        for entry in sorted_entries(source_dir)? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            emit(
                self.progress_cb,
                BuildEvent::DistsEntry(path.display().to_string()),
            );

            let file_type = entry.file_type().map_err(|e| io_path_err(&path, e))?;

            if file_type.is_symlink() {
                let target = fs::read_link(&path).map_err(|e| io_path_err(&path, e))?;
                deferred.push((target, normalize_suite_name(&name).to_string()));
            } else if file_type.is_dir() {
                let dest = dest_dir.join(normalize_suite_name(&name));
                fs::create_dir_all(&dest).map_err(|e| io_path_err(&dest, e))?;
                self.merge_dists_dir(&path, &dest)?;
            } else if file_type.is_file() {
                if path.extension() == Some(OsStr::new("gz")) {
                    merge_index(&path, dest_dir, self.progress_cb)?;
                } else {
                    let dest = dest_dir.join(&name);
                    fs::copy(&path, &dest).map_err(|e| io_path_err(&dest, e))?;
                    fs::set_permissions(&dest, fs::Permissions::from_mode(DISTS_FILE_MODE))
                        .map_err(|e| io_path_err(&dest, e))?;

                    if name == "Release" {
                        rewrite_release_header(&dest)?;
                    }
                }
            } else {
                emit(
                    self.progress_cb,
                    BuildEvent::UnexpectedEntry(path.display().to_string()),
                );
            }
        }

        for (target, name) in deferred {
            let link = dest_dir.join(&name);

            match fs::symlink_metadata(&link) {
                Ok(_) => {
                    // First writer wins; later sources never clobber.
                    emit(
                        self.progress_cb,
                        BuildEvent::SymlinkSkipped(link.display().to_string()),
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    symlink(&target, &link).map_err(|e| io_path_err(&link, e))?;
                    emit(
                        self.progress_cb,
                        BuildEvent::SymlinkCreated(
                            target.display().to_string(),
                            link.display().to_string(),
                        ),
                    );
                }
                Err(e) => return Err(io_path_err(&link, e)),
            }
        }

        Ok(())
    }

    /// Mirror a source `pool/` tree into the destination `pool/` tree.
    ///
    /// Pool files are copied with their metadata preserved; no index
    /// merging or name normalization applies below `pool/`.
    pub fn merge_pool(&self, source: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest).map_err(|e| io_path_err(dest, e))?;

        for entry in sorted_entries(source)? {
            let path = entry.path();
            let name = entry.file_name();

            emit(
                self.progress_cb,
                BuildEvent::PoolEntry(path.display().to_string()),
            );

            let file_type = entry.file_type().map_err(|e| io_path_err(&path, e))?;

            if file_type.is_dir() {
                let dest = dest.join(&name);
                fs::create_dir_all(&dest).map_err(|e| io_path_err(&dest, e))?;
                self.merge_pool(&path, &dest)?;
            } else {
                // Regular files and symlinks resolving to files are
                // copied by content; anything else is reported.
                match fs::metadata(&path) {
                    Ok(metadata) if metadata.is_file() => {
                        let dest = dest.join(&name);
                        fs::copy(&path, &dest).map_err(|e| io_path_err(&dest, e))?;
                    }
                    _ => {
                        emit(
                            self.progress_cb,
                            BuildEvent::UnexpectedEntry(path.display().to_string()),
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::io::{decompress_into, Compression},
        std::{fs::File, io::Cursor},
    };

    const NO_CB: Option<fn(BuildEvent)> = None;

    fn write_gz(path: &Path, content: &[u8]) {
        let file = File::create(path).unwrap();
        crate::io::compress_into(&mut Cursor::new(content), file, Compression::Gzip).unwrap();
    }

    fn read_gz(path: &Path) -> Vec<u8> {
        let mut file = File::open(path).unwrap();
        let mut plain = vec![];
        decompress_into(&mut file, &mut plain, Compression::Gzip).unwrap();
        plain
    }

    #[test]
    fn single_source_is_a_recursive_copy() -> Result<()> {
        let td = tempfile::tempdir()?;
        let source = td.path().join("source/dists");
        let dest = td.path().join("dest/dists");

        fs::create_dir_all(source.join("stable/main/binary-amd64"))?;
        fs::write(source.join("stable/main/binary-amd64/Release"), b"Component: main\n")?;
        write_gz(&source.join("stable/main/binary-amd64/Packages.gz"), b"Package: a\n");

        TreeMerger::new(&NO_CB).merge_dists(&source, &dest)?;

        assert_eq!(
            fs::read(dest.join("stable/main/binary-amd64/Release"))?,
            b"Component: main\n"
        );
        assert_eq!(
            read_gz(&dest.join("stable/main/binary-amd64/Packages.gz")),
            b"Package: a\n"
        );
        assert_eq!(
            fs::read(dest.join("stable/main/binary-amd64/Packages"))?,
            b"Package: a\n"
        );

        // Copied dists files get a normalized world-readable mode.
        let mode = fs::metadata(dest.join("stable/main/binary-amd64/Release"))?
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o644);

        Ok(())
    }

    #[test]
    fn old_suite_directory_is_normalized() -> Result<()> {
        let td = tempfile::tempdir()?;
        let source = td.path().join("source/dists");
        let dest = td.path().join("dest/dists");

        fs::create_dir_all(source.join("oldstable"))?;
        fs::write(
            source.join("oldstable/Release"),
            "Suite: oldstable\nAcquire-By-Hash: yes\nDescription: x\n",
        )?;

        TreeMerger::new(&NO_CB).merge_dists(&source, &dest)?;

        assert!(!dest.join("oldstable").exists());
        let content = fs::read_to_string(dest.join("stable/Release"))?;
        assert!(content.contains("Suite: stable\n"));
        assert!(content.contains("Acquire-By-Hash: no\n"));
        assert!(content.contains("Description: x\n"));

        Ok(())
    }

    #[test]
    fn symlinks_deferred_and_rewritten() -> Result<()> {
        let td = tempfile::tempdir()?;
        let source = td.path().join("source/dists");
        let dest = td.path().join("dest/dists");

        fs::create_dir_all(source.join("buster"))?;
        fs::write(source.join("buster/Release"), b"Description: x\n")?;
        // "oldstable" aliases the codename directory; the link must land
        // under the normalized name.
        symlink("buster", source.join("oldstable"))?;

        TreeMerger::new(&NO_CB).merge_dists(&source, &dest)?;

        let link = dest.join("stable");
        assert!(fs::symlink_metadata(&link)?.file_type().is_symlink());
        assert_eq!(fs::read_link(&link)?, PathBuf::from("buster"));
        assert!(link.join("Release").exists());

        Ok(())
    }

    #[test]
    fn first_symlink_writer_wins() -> Result<()> {
        let td = tempfile::tempdir()?;
        let source_a = td.path().join("a/dists");
        let source_b = td.path().join("b/dists");
        let dest = td.path().join("dest/dists");

        fs::create_dir_all(source_a.join("buster"))?;
        fs::create_dir_all(source_b.join("bullseye"))?;
        symlink("buster", source_a.join("stable"))?;
        symlink("bullseye", source_b.join("stable"))?;

        let merger = TreeMerger::new(&NO_CB);
        merger.merge_dists(&source_a, &dest)?;
        merger.merge_dists(&source_b, &dest)?;

        assert_eq!(fs::read_link(dest.join("stable"))?, PathBuf::from("buster"));

        Ok(())
    }

    #[test]
    fn symlink_never_shadows_merged_directory() -> Result<()> {
        let td = tempfile::tempdir()?;
        let source_a = td.path().join("a/dists");
        let source_b = td.path().join("b/dists");
        let dest = td.path().join("dest/dists");

        fs::create_dir_all(source_a.join("stable"))?;
        fs::write(source_a.join("stable/Release"), b"Description: x\n")?;
        fs::create_dir_all(source_b.join("bullseye"))?;
        symlink("bullseye", source_b.join("stable"))?;

        let merger = TreeMerger::new(&NO_CB);
        merger.merge_dists(&source_a, &dest)?;
        merger.merge_dists(&source_b, &dest)?;

        // The directory from the first source is still a directory.
        assert!(fs::symlink_metadata(dest.join("stable"))?.file_type().is_dir());
        assert!(dest.join("stable/Release").exists());

        Ok(())
    }

    #[test]
    fn same_path_indices_concatenate_across_sources() -> Result<()> {
        let td = tempfile::tempdir()?;
        let source_a = td.path().join("a/dists");
        let source_b = td.path().join("b/dists");
        let dest = td.path().join("dest/dists");

        for source in [&source_a, &source_b] {
            fs::create_dir_all(source.join("stable/main/binary-amd64"))?;
        }
        write_gz(&source_a.join("stable/main/binary-amd64/Packages.gz"), b"A\n");
        write_gz(&source_b.join("stable/main/binary-amd64/Packages.gz"), b"B\n");

        let merger = TreeMerger::new(&NO_CB);
        merger.merge_dists(&source_a, &dest)?;
        merger.merge_dists(&source_b, &dest)?;

        assert_eq!(
            fs::read(dest.join("stable/main/binary-amd64/Packages"))?,
            b"A\nB\n"
        );
        assert_eq!(
            read_gz(&dest.join("stable/main/binary-amd64/Packages.gz")),
            b"A\nB\n"
        );

        Ok(())
    }

    #[test]
    fn unexpected_entry_does_not_abort_walk() -> Result<()> {
        let td = tempfile::tempdir()?;
        let source = td.path().join("source/dists");
        let dest = td.path().join("dest/dists");

        fs::create_dir_all(&source)?;
        fs::write(source.join("zz-after"), b"copied\n")?;
        let _listener = std::os::unix::net::UnixListener::bind(source.join("a-socket"))?;

        let events = std::sync::Mutex::new(vec![]);
        let cb = Some(|event: BuildEvent| {
            if let BuildEvent::UnexpectedEntry(path) = event {
                events.lock().unwrap().push(path);
            }
        });

        TreeMerger::new(&cb).merge_dists(&source, &dest)?;

        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(dest.join("zz-after").exists());
        assert!(!dest.join("a-socket").exists());

        Ok(())
    }

    #[test]
    fn pool_is_mirrored_verbatim() -> Result<()> {
        let td = tempfile::tempdir()?;
        let source = td.path().join("source/pool");
        let dest = td.path().join("dest/pool");

        fs::create_dir_all(source.join("main/a/app"))?;
        fs::write(source.join("main/a/app/app_1.0_amd64.deb"), b"deb bytes")?;

        TreeMerger::new(&NO_CB).merge_pool(&source, &dest)?;

        assert_eq!(
            fs::read(dest.join("main/a/app/app_1.0_amd64.deb"))?,
            b"deb bytes"
        );

        Ok(())
    }
}
