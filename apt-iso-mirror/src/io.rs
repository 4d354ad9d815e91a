// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers: compression codecs and content digesting. */

use {
    crate::error::{MirrorError, Result},
    pgp::crypto::Hasher,
    pgp_cleartext::CleartextHasher,
    std::{
        fs::File,
        io::{Read, Write},
        path::Path,
    },
};

/// Compression format used by repository index files.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// Gzip compression (.gz extension).
    Gzip,

    /// XZ compression (.xz extension).
    Xz,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Xz => ".xz",
        }
    }
}

/// Stream-decompress `source` and write the plain content to `dest`.
///
/// Returns the number of decompressed bytes written.
pub fn decompress_into(
    source: &mut impl Read,
    dest: &mut impl Write,
    compression: Compression,
) -> std::io::Result<u64> {
    match compression {
        Compression::None => std::io::copy(source, dest),
        Compression::Gzip => {
            // Multi-member streams occur in the wild; decode them all.
            let mut decoder = libflate::gzip::MultiDecoder::new(source)?;
            std::io::copy(&mut decoder, dest)
        }
        Compression::Xz => {
            let mut decoder = xz2::read::XzDecoder::new(source);
            std::io::copy(&mut decoder, dest)
        }
    }
}

/// Stream-compress `source` and write the encoded content to `dest`.
pub fn compress_into(
    source: &mut impl Read,
    dest: impl Write,
    compression: Compression,
) -> std::io::Result<u64> {
    match compression {
        Compression::None => {
            let mut dest = dest;
            std::io::copy(source, &mut dest)
        }
        Compression::Gzip => {
            let mut encoder = libflate::gzip::Encoder::new(dest)?;
            let written = std::io::copy(source, &mut encoder)?;
            encoder.finish().into_result()?;
            Ok(written)
        }
        Compression::Xz => {
            let mut encoder = xz2::write::XzEncoder::new(dest, 6);
            let written = std::io::copy(source, &mut encoder)?;
            encoder.finish()?;
            Ok(written)
        }
    }
}

/// Checksum type / digest mechanism used in a `Release` file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5.
    Md5,

    /// SHA-1.
    Sha1,

    /// SHA-256.
    Sha256,

    /// SHA-512.
    Sha512,
}

impl ChecksumType {
    /// Emit variants in the order their sections appear in `Release` files.
    pub fn release_order() -> impl Iterator<Item = ChecksumType> {
        [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512].into_iter()
    }

    /// Name of the section in `Release` files holding this variant type.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Obtain a new hasher for this checksum flavor.
    pub fn new_hasher(&self) -> Box<dyn Hasher + Send> {
        Box::new(match self {
            Self::Md5 => CleartextHasher::md5(),
            Self::Sha1 => CleartextHasher::sha1(),
            Self::Sha256 => CleartextHasher::sha256(),
            Self::Sha512 => CleartextHasher::sha512(),
        })
    }
}

/// Compute the hex digest of a file's content.
pub fn digest_file(path: &Path, checksum: ChecksumType) -> Result<String> {
    let mut fh = File::open(path).map_err(|e| MirrorError::IoPath(path.display().to_string(), e))?;

    let mut hasher = checksum.new_hasher();
    let mut buf = [0u8; 16384];

    loop {
        let size = fh
            .read(&mut buf[..])
            .map_err(|e| MirrorError::IoPath(path.display().to_string(), e))?;

        if size == 0 {
            break;
        }

        hasher.update(&buf[0..size]);
    }

    Ok(hex::encode(hasher.finish()))
}
