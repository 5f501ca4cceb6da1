// Licensed under the Apache-2.0 license

//! Stand-in for the PKCS#7 library. A fake signed-data blob is
//! `magic | flags u32 | digest_alg u32 | cert_len u32 | cert | digest`.

use bootgate_drivers::{Pkcs7Verifier, Pkcs7VerifyOptions};
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_types::{DigestAlgorithm, ImageDigest, ImageDigests};

pub const FAKE_SIGNED_DATA_MAGIC: [u8; 8] = *b"FAKEPKCS";
const FLAG_MODULE_SIGNING_EKU: u32 = 1;
const DIGEST_ALG_SHA1: u32 = 1;
const DIGEST_ALG_SHA256: u32 = 2;

fn algorithm_tag(algorithm: DigestAlgorithm) -> u32 {
    match algorithm {
        DigestAlgorithm::Sha1 => DIGEST_ALG_SHA1,
        DigestAlgorithm::Sha256 => DIGEST_ALG_SHA256,
    }
}

/// Build a fake signed-data blob
pub fn fake_signed_data(cert: &[u8], digest: &ImageDigest, module_signing_eku: bool) -> Vec<u8> {
    let flags = if module_signing_eku {
        FLAG_MODULE_SIGNING_EKU
    } else {
        0
    };
    let mut blob = FAKE_SIGNED_DATA_MAGIC.to_vec();
    blob.extend_from_slice(&flags.to_le_bytes());
    blob.extend_from_slice(&algorithm_tag(digest.algorithm()).to_le_bytes());
    blob.extend_from_slice(&(cert.len() as u32).to_le_bytes());
    blob.extend_from_slice(cert);
    blob.extend_from_slice(digest.as_bytes());
    blob
}

struct FakeSignedData<'a> {
    flags: u32,
    digest_alg: DigestAlgorithm,
    cert: &'a [u8],
    digest: &'a [u8],
}

impl FakeSignedData<'_> {
    fn covers(&self, digests: &ImageDigests) -> bool {
        match self.digest_alg {
            DigestAlgorithm::Sha1 => self.digest == digests.sha1,
            DigestAlgorithm::Sha256 => self.digest == digests.sha256,
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> BootGateResult<u32> {
    let err = BootGateError::SIGNATURE_SIGNED_DATA_MALFORMED;
    let field = bytes.get(offset..offset + 4).ok_or(err)?;
    Ok(u32::from_le_bytes(field.try_into().map_err(|_| err)?))
}

fn parse(blob: &[u8]) -> BootGateResult<FakeSignedData<'_>> {
    let err = BootGateError::SIGNATURE_SIGNED_DATA_MALFORMED;
    let rest = blob.strip_prefix(&FAKE_SIGNED_DATA_MAGIC[..]).ok_or(err)?;
    let flags = read_u32(rest, 0)?;
    let digest_alg = match read_u32(rest, 4)? {
        DIGEST_ALG_SHA1 => DigestAlgorithm::Sha1,
        DIGEST_ALG_SHA256 => DigestAlgorithm::Sha256,
        _ => return Err(err),
    };
    let cert_len = read_u32(rest, 8)? as usize;
    let rest = rest.get(12..).ok_or(err)?;
    let cert = rest.get(..cert_len).ok_or(err)?;
    let digest = rest.get(cert_len..).ok_or(err)?;
    if digest.len() != digest_alg.digest_size() {
        return Err(err);
    }
    Ok(FakeSignedData {
        flags,
        digest_alg,
        cert,
        digest,
    })
}

/// Fake crypto library
#[derive(Default)]
pub struct FakeAuthenticode {
    /// Fail every call as if the library were unreachable
    pub unavailable: bool,

    /// Number of `verify_authenticode` calls
    pub verify_calls: usize,

    /// Options seen on the last call
    pub last_options: Option<Pkcs7VerifyOptions>,
}

impl FakeAuthenticode {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }
}

impl Pkcs7Verifier for FakeAuthenticode {
    fn verify_authenticode(
        &mut self,
        signed_data: &[u8],
        trusted_cert: &[u8],
        digests: &ImageDigests,
        options: &Pkcs7VerifyOptions,
    ) -> BootGateResult<bool> {
        self.verify_calls += 1;
        self.last_options = Some(*options);
        if self.unavailable {
            return Err(BootGateError::CRYPTO_VERIFY_FAILURE);
        }
        let sd = parse(signed_data)?;
        Ok(sd.cert == trusted_cert && sd.covers(digests))
    }

    fn signer_has_module_signing_eku(&mut self, signed_data: &[u8]) -> BootGateResult<bool> {
        if self.unavailable {
            return Err(BootGateError::CRYPTO_VERIFY_FAILURE);
        }
        Ok(parse(signed_data)?.flags & FLAG_MODULE_SIGNING_EKU != 0)
    }
}
