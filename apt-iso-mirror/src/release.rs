// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` document header handling.

A `Release` file is the line-oriented manifest at a suite's root. During
a merge its header needs light rewriting: fresh `Date` / `Valid-Until`
stamps, historic suite aliases normalized to the canonical suite name,
and the `Acquire-By-Hash` feature disabled because the merged mirror
does not publish `by-hash` paths. Everything else passes through
verbatim, in order.
*/

use {
    crate::error::{MirrorError, Result},
    chrono::{Duration, Utc},
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        fs::File,
        io::{BufRead, BufReader, BufWriter, Write},
        path::Path,
    },
};

/// Format for `Date` and `Valid-Until` stamps written to `Release` files.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S UTC";

/// How long a regenerated `Release` file remains valid, in seconds.
pub const VALIDITY_WINDOW_SECS: i64 = 20_000_000;

/// Suite alias that prior point releases publish under.
pub const OLD_SUITE_ALIAS: &str = "oldstable";

/// Canonical suite name every merged tree converges on.
pub const CANONICAL_SUITE: &str = "stable";

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Version:\s(\d\d?\.\d\d?)").expect("static regex should parse"));

/// Map a directory or link name to the canonical suite name.
pub fn normalize_suite_name(name: &str) -> &str {
    if name == OLD_SUITE_ALIAS {
        CANONICAL_SUITE
    } else {
        name
    }
}

/// Rewrite the header lines of a `Release` file in place.
///
/// `Date` is set to the current time and `Valid-Until`, when present, to
/// the current time plus [VALIDITY_WINDOW_SECS]. A `Suite` line naming
/// [OLD_SUITE_ALIAS] is rewritten to [CANONICAL_SUITE] and
/// `Acquire-By-Hash: yes` is flipped to `no`. Every other line is
/// preserved verbatim, including ordering.
///
/// The rewrite is staged through a sibling temp file and renamed over
/// the original so a partially rewritten file is never observable.
pub fn rewrite_release_header(path: &Path) -> Result<()> {
    let now = Utc::now();
    let date_line = format!("Date: {}", now.format(DATE_FORMAT));
    let valid_until_line = format!(
        "Valid-Until: {}",
        (now + Duration::seconds(VALIDITY_WINDOW_SECS)).format(DATE_FORMAT)
    );

    let reader = BufReader::new(
        File::open(path).map_err(|e| MirrorError::IoPath(path.display().to_string(), e))?,
    );

    let tmp_path = path.with_extension("tmp");
    let mut writer = BufWriter::new(
        File::create(&tmp_path)
            .map_err(|e| MirrorError::IoPath(tmp_path.display().to_string(), e))?,
    );

    for line in reader.lines() {
        let line = line.map_err(|e| MirrorError::IoPath(path.display().to_string(), e))?;

        let replacement = if line.starts_with("Date: ") {
            date_line.clone()
        } else if line.starts_with("Valid-Until: ") {
            valid_until_line.clone()
        } else if line.trim_end() == format!("Suite: {}", OLD_SUITE_ALIAS) {
            format!("Suite: {}", CANONICAL_SUITE)
        } else if line.trim_end() == "Acquire-By-Hash: yes" {
            "Acquire-By-Hash: no".to_string()
        } else {
            line
        };

        writeln!(writer, "{}", replacement)
            .map_err(|e| MirrorError::IoPath(tmp_path.display().to_string(), e))?;
    }

    writer
        .flush()
        .map_err(|e| MirrorError::IoPath(tmp_path.display().to_string(), e))?;
    drop(writer);

    std::fs::rename(&tmp_path, path)
        .map_err(|e| MirrorError::IoPath(path.display().to_string(), e))?;

    Ok(())
}

/// Extract the `Version` field value from a `Release` file, if present.
pub fn release_version(path: &Path) -> Result<Option<String>> {
    let reader = BufReader::new(
        File::open(path).map_err(|e| MirrorError::IoPath(path.display().to_string(), e))?,
    );

    for line in reader.lines() {
        let line = line.map_err(|e| MirrorError::IoPath(path.display().to_string(), e))?;

        if let Some(captures) = VERSION_RE.captures(line.trim_end()) {
            return Ok(Some(captures[1].to_string()));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    #[test]
    fn header_rewrite_normalizes_and_preserves() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("Release");

        std::fs::write(
            &path,
            indoc! {"
                Origin: Debian
                Label: Debian
                Suite: oldstable
                Version: 10.9
                Codename: buster
                Date: Sat, 27 Mar 2021 10:09:53 UTC
                Valid-Until: Sat, 03 Apr 2021 10:09:53 UTC
                Acquire-By-Hash: yes
                Architectures: amd64
                Components: main contrib non-free
                Description: Debian 10.9 Released 27 March 2021
            "},
        )?;

        rewrite_release_header(&path)?;

        let content = std::fs::read_to_string(&path)?;
        let lines = content.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "Origin: Debian");
        assert_eq!(lines[1], "Label: Debian");
        assert_eq!(lines[2], "Suite: stable");
        assert_eq!(lines[3], "Version: 10.9");
        assert_eq!(lines[4], "Codename: buster");
        assert!(lines[5].starts_with("Date: "));
        assert_ne!(lines[5], "Date: Sat, 27 Mar 2021 10:09:53 UTC");
        assert!(lines[6].starts_with("Valid-Until: "));
        assert_eq!(lines[7], "Acquire-By-Hash: no");
        assert_eq!(lines[8], "Architectures: amd64");
        assert_eq!(lines[9], "Components: main contrib non-free");
        assert_eq!(lines[10], "Description: Debian 10.9 Released 27 March 2021");
        assert_eq!(lines.len(), 11);

        Ok(())
    }

    #[test]
    fn header_rewrite_without_valid_until() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("Release");

        std::fs::write(&path, "Suite: stable\nDate: old\nDescription: x\n")?;

        rewrite_release_header(&path)?;

        let content = std::fs::read_to_string(&path)?;
        assert!(!content.contains("Valid-Until"));
        assert!(content.starts_with("Suite: stable\nDate: "));

        Ok(())
    }

    #[test]
    fn version_extraction() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("Release");

        std::fs::write(&path, "Origin: Debian\nVersion: 11.1\n")?;
        assert_eq!(release_version(&path)?, Some("11.1".to_string()));

        std::fs::write(&path, "Origin: Debian\nCodename: sid\n")?;
        assert_eq!(release_version(&path)?, None);

        // A two digit major/minor still matches; anything else does not.
        std::fs::write(&path, "Version: 10.10\n")?;
        assert_eq!(release_version(&path)?, Some("10.10".to_string()));

        std::fs::write(&path, "Version: bullseye\n")?;
        assert_eq!(release_version(&path)?, None);

        Ok(())
    }

    #[test]
    fn suite_normalization() {
        assert_eq!(normalize_suite_name("oldstable"), "stable");
        assert_eq!(normalize_suite_name("stable"), "stable");
        assert_eq!(normalize_suite_name("stable-updates"), "stable-updates");
    }
}
