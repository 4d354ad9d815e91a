// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! PGP signing of release metadata.

Metadata regeneration needs three signing primitives: a detached armored
signature (`Release.gpg`), a cleartext signature (`InRelease`), and an
armored export of the public key (`KEY.gpg`). [ReleaseSigner] abstracts
these so callers choose the key material and tests can substitute a fake
that produces deterministic output.

[PgpSigner] is the production implementation, backed by a PGP secret key
held in memory. [create_signing_key()] generates a self-signed key pair
suitable for signing a private mirror.
*/

use {
    crate::error::{MirrorError, Result},
    chrono::SubsecRound,
    pgp::{
        crypto::{HashAlgorithm, SymmetricKeyAlgorithm},
        packet::{Packet, SignatureConfig, SignatureType, Subpacket},
        types::{CompressionAlgorithm, KeyVersion, SecretKeyTrait},
        Deserializable, KeyType, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey,
    },
    smallvec::{smallvec, SmallVec},
    std::{
        io::Cursor,
        path::Path,
    },
};

/// Produces the signatures attached to regenerated release metadata.
pub trait ReleaseSigner {
    /// Produce a detached ASCII armored signature over `data`.
    fn sign_detached(&self, data: &[u8]) -> Result<String>;

    /// Produce a PGP cleartext framework document wrapping `data`.
    fn sign_cleartext(&self, data: &[u8]) -> Result<String>;

    /// Obtain the ASCII armored public key matching the signing key.
    fn armored_public_key(&self) -> Result<String>;
}

/// A [ReleaseSigner] backed by a PGP secret key.
pub struct PgpSigner {
    key: SignedSecretKey,
    passphrase: String,
}

impl PgpSigner {
    /// Construct a signer from an already-parsed secret key.
    ///
    /// `passphrase` unlocks the secret key. Use an empty string for keys
    /// without a passphrase.
    pub fn new(key: SignedSecretKey, passphrase: impl ToString) -> Self {
        Self {
            key,
            passphrase: passphrase.to_string(),
        }
    }

    /// Construct a signer from an ASCII armored secret key file.
    pub fn from_armored_file(path: &Path, passphrase: impl ToString) -> Result<Self> {
        let armored = std::fs::read_to_string(path)
            .map_err(|e| MirrorError::IoPath(path.display().to_string(), e))?;

        let (key, _) = SignedSecretKey::from_armor_single(Cursor::new(armored.into_bytes()))?;

        Ok(Self::new(key, passphrase))
    }
}

/// Produce a detached ASCII armored binary signature over `data`.
fn detached_sign<PW>(
    key: &impl SecretKeyTrait,
    key_pw: PW,
    hash_algorithm: HashAlgorithm,
    data: &[u8],
) -> pgp::errors::Result<String>
where
    PW: FnOnce() -> String,
{
    let hashed_subpackets = vec![
        Subpacket::IssuerFingerprint(KeyVersion::V4, SmallVec::from_slice(&key.fingerprint())),
        Subpacket::SignatureCreationTime(chrono::Utc::now().trunc_subsecs(0)),
    ];
    let unhashed_subpackets = vec![Subpacket::Issuer(key.key_id())];

    let config = SignatureConfig::new_v4(
        Default::default(),
        SignatureType::Binary,
        key.algorithm(),
        hash_algorithm,
        hashed_subpackets,
        unhashed_subpackets,
    );

    let signature = config.sign(key, key_pw, Cursor::new(data))?;

    let mut writer = Cursor::new(Vec::<u8>::new());
    pgp::armor::write(
        &Packet::Signature(signature),
        pgp::armor::BlockType::Signature,
        &mut writer,
        None,
    )?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| pgp::errors::Error::Utf8Error(e.utf8_error()))
}

impl ReleaseSigner for PgpSigner {
    fn sign_detached(&self, data: &[u8]) -> Result<String> {
        let passphrase = self.passphrase.clone();

        Ok(detached_sign(
            &self.key,
            || passphrase,
            HashAlgorithm::SHA2_256,
            data,
        )?)
    }

    fn sign_cleartext(&self, data: &[u8]) -> Result<String> {
        let passphrase = self.passphrase.clone();

        Ok(pgp_cleartext::cleartext_sign(
            &self.key,
            || passphrase,
            HashAlgorithm::SHA2_256,
            Cursor::new(data),
        )?)
    }

    fn armored_public_key(&self) -> Result<String> {
        let passphrase = self.passphrase.clone();
        let public_key = self.key.public_key().sign(&self.key, || passphrase)?;

        Ok(public_key.to_armored_string(None)?)
    }
}

/// Create a self-signed PGP key pair for signing a mirror.
///
/// `primary_user_id` has a format like `Name <email>`.
///
/// The generated key is RSA 2048 with signing capability only. A
/// self-signed key is sufficient for a mirror whose clients install the
/// exported `KEY.gpg` directly; keys participating in a wider web of
/// trust should be provisioned externally.
pub fn create_signing_key<PW>(
    primary_user_id: impl ToString,
    key_passphrase: PW,
) -> Result<(SignedSecretKey, SignedPublicKey)>
where
    PW: (FnOnce() -> String) + Clone,
{
    let mut builder = SecretKeyParamsBuilder::default();
    builder
        .key_type(KeyType::Rsa(2048))
        .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
        .preferred_hash_algorithms(smallvec![
            HashAlgorithm::SHA2_256,
            HashAlgorithm::SHA2_384,
            HashAlgorithm::SHA2_512
        ])
        .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
        .can_create_certificates(false)
        .can_sign(true)
        .primary_user_id(primary_user_id.to_string());

    let params = builder.build().map_err(|e| pgp::errors::Error::Message(e.to_string()))?;

    let secret_key = params.generate()?;
    let secret_key_signed = secret_key.sign(key_passphrase.clone())?;

    let public_key = secret_key_signed.public_key();
    let public_key_signed = public_key.sign(&secret_key_signed, key_passphrase)?;

    Ok((secret_key_signed, public_key_signed))
}

#[cfg(test)]
mod test {
    use {
        super::*,
        pgp::StandaloneSignature,
        pgp_cleartext::CleartextSignatureReader,
        std::io::Read,
    };

    fn test_signer() -> (PgpSigner, SignedPublicKey) {
        let (secret, public) =
            create_signing_key("Test Mirror <mirror@example.com>", String::new).unwrap();

        (PgpSigner::new(secret, ""), public)
    }

    #[test]
    fn detached_signature_verifies() -> Result<()> {
        let (signer, public) = test_signer();

        let data = b"Origin: Debian\nSuite: stable\n";
        let armored = signer.sign_detached(data)?;
        assert!(armored.starts_with("-----BEGIN PGP SIGNATURE-----"));

        let (signature, _) =
            StandaloneSignature::from_armor_single(Cursor::new(armored.into_bytes()))?;
        signature.verify(&public, data)?;

        Ok(())
    }

    #[test]
    fn cleartext_signature_verifies() -> Result<()> {
        let (signer, public) = test_signer();

        let data = b"Origin: Debian\nSuite: stable\n";
        let cleartext = signer.sign_cleartext(data)?;
        assert!(cleartext.starts_with("-----BEGIN PGP SIGNED MESSAGE-----"));

        let mut reader = CleartextSignatureReader::new(Cursor::new(cleartext.into_bytes()));
        let mut plain = vec![];
        reader.read_to_end(&mut plain)?;

        let signatures = reader.finalize();
        assert_eq!(signatures.verify(&public)?, 1);
        assert_eq!(
            String::from_utf8_lossy(&plain).trim_end(),
            String::from_utf8_lossy(data).trim_end()
        );

        Ok(())
    }

    #[test]
    fn public_key_export_is_armored() -> Result<()> {
        let (signer, _) = test_signer();

        let exported = signer.armored_public_key()?;
        assert!(exported.starts_with("-----BEGIN PGP PUBLIC KEY BLOCK-----"));

        SignedPublicKey::from_armor_single(Cursor::new(exported.into_bytes()))?;

        Ok(())
    }

    #[test]
    fn armored_key_round_trips_through_file() -> Result<()> {
        let (secret, _) = create_signing_key("Test <t@example.com>", String::new).unwrap();

        let td = tempfile::tempdir()?;
        let key_path = td.path().join("secret.asc");
        std::fs::write(&key_path, secret.to_armored_string(None)?)?;

        let signer = PgpSigner::from_armored_file(&key_path, "")?;
        assert!(signer
            .sign_detached(b"payload")?
            .starts_with("-----BEGIN PGP SIGNATURE-----"));

        Ok(())
    }
}
