/*++

Licensed under the Apache-2.0 license.

File Name:

    sha.rs

Abstract:

    File contains API for SHA-1 and SHA-256 digest operations.

--*/

use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_types::{ImageDigests, Sha1Digest, Sha256Digest};
use sha2::Digest;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum DigestState {
    /// Initial state
    Init,

    /// Pending state
    Pending,

    /// Final state
    Final,
}

/// Multi step digest operation over a software hash core
pub struct DigestOp<D: Digest + Default> {
    hasher: D,
    state: DigestState,
    data_size: usize,
}

impl<D: Digest + Default> DigestOp<D> {
    fn new() -> Self {
        Self {
            hasher: D::default(),
            state: DigestState::Init,
            data_size: 0,
        }
    }

    /// Update the digest with data
    ///
    /// # Arguments
    ///
    /// * `data` - Data to used to update the digest
    pub fn update(&mut self, data: &[u8]) -> BootGateResult<()> {
        if self.state == DigestState::Final {
            return Err(BootGateError::CRYPTO_DIGEST_FAILURE);
        }

        self.data_size = self
            .data_size
            .checked_add(data.len())
            .ok_or(BootGateError::CRYPTO_DIGEST_FAILURE)?;
        self.hasher.update(data);
        self.state = DigestState::Pending;
        Ok(())
    }

    /// Number of bytes fed into the operation so far
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    fn finalize_into(&mut self, out: &mut [u8]) -> BootGateResult<()> {
        if self.state == DigestState::Final {
            return Err(BootGateError::CRYPTO_DIGEST_FAILURE);
        }
        self.state = DigestState::Final;

        let hash = core::mem::take(&mut self.hasher).finalize();
        if hash.len() != out.len() {
            return Err(BootGateError::CRYPTO_DIGEST_FAILURE);
        }
        out.copy_from_slice(&hash);
        Ok(())
    }
}

pub type Sha1DigestOp = DigestOp<sha1::Sha1>;
pub type Sha256DigestOp = DigestOp<sha2::Sha256>;

impl Sha1DigestOp {
    /// Finalize the digest operations
    pub fn finalize(&mut self) -> BootGateResult<Sha1Digest> {
        let mut digest = Sha1Digest::default();
        self.finalize_into(&mut digest)?;
        Ok(digest)
    }
}

impl Sha256DigestOp {
    /// Finalize the digest operations
    pub fn finalize(&mut self) -> BootGateResult<Sha256Digest> {
        let mut digest = Sha256Digest::default();
        self.finalize_into(&mut digest)?;
        Ok(digest)
    }
}

#[derive(Default)]
pub struct Sha1 {}

impl Sha1 {
    /// Initialize multi step digest operation
    pub fn digest_init(&mut self) -> BootGateResult<Sha1DigestOp> {
        Ok(Sha1DigestOp::new())
    }

    /// Calculate the digest of the buffer
    ///
    /// # Arguments
    ///
    /// * `buf` - Buffer to calculate the digest over
    pub fn digest(&mut self, buf: &[u8]) -> BootGateResult<Sha1Digest> {
        let mut op = self.digest_init()?;
        op.update(buf)?;
        op.finalize()
    }
}

#[derive(Default)]
pub struct Sha256 {}

impl Sha256 {
    /// Initialize multi step digest operation
    pub fn digest_init(&mut self) -> BootGateResult<Sha256DigestOp> {
        Ok(Sha256DigestOp::new())
    }

    /// Calculate the digest of the buffer
    ///
    /// # Arguments
    ///
    /// * `buf` - Buffer to calculate the digest over
    pub fn digest(&mut self, buf: &[u8]) -> BootGateResult<Sha256Digest> {
        let mut op = self.digest_init()?;
        op.update(buf)?;
        op.finalize()
    }
}

/// SHA-1 and SHA-256 fed from the same regions
pub struct AuthenticodeDigestOp {
    sha1: Sha1DigestOp,
    sha256: Sha256DigestOp,
}

impl AuthenticodeDigestOp {
    pub fn new(sha1: &mut Sha1, sha256: &mut Sha256) -> BootGateResult<Self> {
        Ok(Self {
            sha1: sha1.digest_init()?,
            sha256: sha256.digest_init()?,
        })
    }

    pub fn update(&mut self, data: &[u8]) -> BootGateResult<()> {
        self.sha1.update(data)?;
        self.sha256.update(data)
    }

    pub fn finalize(mut self) -> BootGateResult<ImageDigests> {
        Ok(ImageDigests {
            sha1: self.sha1.finalize()?,
            sha256: self.sha256.finalize()?,
        })
    }
}
