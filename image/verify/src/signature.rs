/*++

Licensed under the Apache-2.0 license.

File Name:

    signature.rs

Abstract:

    Walks the certificate table and checks each embedded Authenticode
    signature against the deny-side and allow-side certificates.

--*/

use alloc::vec::Vec;

use bootgate_drivers::cprintln;
use bootgate_error::{BootGateError, BootGateResult, ErrorClass};
use bootgate_image_types::*;
use zerocopy::FromBytes;

use crate::{AnchorId, ImageContext, ImageVerificationEnv, PolicyFlags, TrustAnchor, TrustAnchors};

/// One entry of the certificate table
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WinCertificate<'a> {
    pub revision: u16,
    pub certificate_type: u16,

    /// Entry payload, header excluded
    pub data: &'a [u8],
}

impl WinCertificate<'_> {
    pub fn is_pkcs_signed_data(&self) -> bool {
        self.certificate_type == WIN_CERT_TYPE_PKCS_SIGNED_DATA
    }
}

/// Iterator over the entries of a certificate table. Yields an error and
/// stops at the first malformed entry.
pub struct CertificateTable<'a> {
    table: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> CertificateTable<'a> {
    pub fn new(table: &'a [u8]) -> Self {
        Self {
            table,
            offset: 0,
            done: false,
        }
    }

    /// Table of a parsed image; empty if the image has none
    pub fn from_context(ctx: &ImageContext<'a>) -> Self {
        let table = ctx
            .cert_dir()
            .and_then(|range| ctx.image().get(range))
            .unwrap_or_default();
        Self::new(table)
    }

    fn next_entry(&mut self) -> BootGateResult<WinCertificate<'a>> {
        let rest = self
            .table
            .get(self.offset..)
            .ok_or(BootGateError::IMAGE_CERT_ENTRY_HEADER_TRUNCATED)?;
        let (header, _) = WinCertificateHeader::read_from_prefix(rest)
            .map_err(|_| BootGateError::IMAGE_CERT_ENTRY_HEADER_TRUNCATED)?;
        let length = header.length as usize;
        if length < WIN_CERTIFICATE_HEADER_BYTE_SIZE || length > rest.len() {
            return Err(BootGateError::IMAGE_CERT_ENTRY_LENGTH_INVALID);
        }
        let data = rest
            .get(WIN_CERTIFICATE_HEADER_BYTE_SIZE..length)
            .ok_or(BootGateError::IMAGE_CERT_ENTRY_LENGTH_INVALID)?;

        // Entries start on 8 byte boundaries
        let next = self.offset + length;
        self.offset = next
            .checked_next_multiple_of(WIN_CERT_ALIGNMENT)
            .unwrap_or(usize::MAX);

        Ok(WinCertificate {
            revision: header.revision,
            certificate_type: header.certificate_type,
            data,
        })
    }
}

impl<'a> Iterator for CertificateTable<'a> {
    type Item = BootGateResult<WinCertificate<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.table.len() {
            return None;
        }
        let entry = self.next_entry();
        self.done = entry.is_err();
        Some(entry)
    }
}

/// Signature that validated against an anchor
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SignatureMatch {
    /// Position among the image's PKCS signatures
    pub index: usize,
    pub anchor: AnchorId,

    /// SHA-256 of the anchor certificate that validated the signature
    pub cert_digest: Sha256Digest,
}

/// Outcome for one embedded signature
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SignatureResult {
    Verified(SignatureMatch),
    Failed(BootGateError),
}

/// Per-signature outcomes, in table order
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SignatureReport {
    pub results: Vec<SignatureResult>,
}

impl SignatureReport {
    pub fn first_match(&self) -> Option<SignatureMatch> {
        self.results.iter().find_map(|r| match r {
            SignatureResult::Verified(m) => Some(*m),
            SignatureResult::Failed(_) => None,
        })
    }

    /// The first match, or the most telling failure
    pub fn into_match(self) -> BootGateResult<SignatureMatch> {
        if let Some(m) = self.first_match() {
            return Ok(m);
        }
        let err = self
            .results
            .iter()
            .filter_map(|r| match r {
                SignatureResult::Failed(err) => Some(*err),
                SignatureResult::Verified(_) => None,
            })
            .find(|err| *err != BootGateError::SIGNATURE_NO_MATCHING_ANCHOR)
            .unwrap_or(BootGateError::SIGNATURE_NO_MATCHING_ANCHOR);
        Err(err)
    }
}

/// PKCS signed-data payloads of the image's certificate table
fn pkcs_signatures<'a>(ctx: &ImageContext<'a>) -> BootGateResult<Vec<&'a [u8]>> {
    let mut signatures = Vec::new();
    for entry in CertificateTable::from_context(ctx) {
        let entry = entry?;
        if entry.is_pkcs_signed_data() {
            signatures.push(entry.data);
        } else {
            cprintln!(
                "[verify] Skipping certificate entry type {}",
                entry.certificate_type
            );
        }
    }
    Ok(signatures)
}

/// Collaborator failures abort the pass; anything else only fails the
/// signature at hand.
fn per_signature(err: BootGateError) -> BootGateResult<BootGateError> {
    if err.class() == ErrorClass::ResourceUnavailable {
        Err(err)
    } else {
        Ok(err)
    }
}

/// Try every certificate of `anchor` against one signature
fn anchor_validates<Env: ImageVerificationEnv>(
    env: &mut Env,
    signed_data: &[u8],
    anchor: &TrustAnchor,
    digests: &ImageDigests,
) -> BootGateResult<Result<Option<Sha256Digest>, BootGateError>> {
    for cert in anchor.certificates() {
        match env.authenticode_verify(signed_data, cert, digests) {
            Ok(true) => return Ok(Ok(Some(env.sha256_digest(cert)?))),
            Ok(false) => {}
            Err(err) => return per_signature(err).map(Err),
        }
    }
    Ok(Ok(None))
}

/// Check every embedded signature against the deny-side certificates.
///
/// Returns the deny anchor holding a certificate that validates any of the
/// signatures. Images without signatures have nothing to deny.
pub fn check_denied_signatures<Env: ImageVerificationEnv>(
    env: &mut Env,
    ctx: &ImageContext,
    digests: &ImageDigests,
    anchors: &TrustAnchors,
) -> BootGateResult<Option<AnchorId>> {
    for signed_data in pkcs_signatures(ctx)? {
        for anchor in anchors.deny_anchors() {
            // Undecodable blobs are reported by the signature stage
            if let Ok(Some(_)) = anchor_validates(env, signed_data, anchor, digests)? {
                return Ok(Some(anchor.id));
            }
        }
    }
    Ok(None)
}

fn verify_one<Env: ImageVerificationEnv>(
    env: &mut Env,
    index: usize,
    signed_data: &[u8],
    digests: &ImageDigests,
    anchors: &TrustAnchors,
    flags: PolicyFlags,
) -> BootGateResult<SignatureResult> {
    match env.signer_has_module_signing_eku(signed_data) {
        Ok(false) => {}
        Ok(true) => {
            return Ok(SignatureResult::Failed(
                BootGateError::SIGNATURE_MODULE_SIGNING_EKU,
            ))
        }
        Err(err) => return per_signature(err).map(SignatureResult::Failed),
    }

    for anchor in anchors.signer_anchors(flags) {
        match anchor_validates(env, signed_data, anchor, digests)? {
            Ok(Some(cert_digest)) => {
                return Ok(SignatureResult::Verified(SignatureMatch {
                    index,
                    anchor: anchor.id,
                    cert_digest,
                }))
            }
            Ok(None) => {}
            Err(err) => return Ok(SignatureResult::Failed(err)),
        }
    }
    Ok(SignatureResult::Failed(
        BootGateError::SIGNATURE_NO_MATCHING_ANCHOR,
    ))
}

/// Verify every embedded signature against the allow-side anchors.
///
/// # Arguments
///
/// * `env`     - Verification environment
/// * `ctx`     - Parsed image
/// * `digests` - Authenticode digests of the image
/// * `anchors` - Trust anchors of the current pass
/// * `flags`   - Policy flags of the current pass
///
/// # Returns
///
/// * `SignatureReport` - One result per PKCS signature
pub fn verify_signatures<Env: ImageVerificationEnv>(
    env: &mut Env,
    ctx: &ImageContext,
    digests: &ImageDigests,
    anchors: &TrustAnchors,
    flags: PolicyFlags,
) -> BootGateResult<SignatureReport> {
    if ctx.cert_dir().is_none() {
        return Err(BootGateError::SIGNATURE_NOT_PRESENT);
    }
    let signatures = pkcs_signatures(ctx)?;
    if signatures.is_empty() {
        return Err(BootGateError::SIGNATURE_NO_PKCS_ENTRY);
    }

    let mut report = SignatureReport::default();
    for (index, signed_data) in signatures.into_iter().enumerate() {
        let result = verify_one(env, index, signed_data, digests, anchors, flags)?;
        match result {
            SignatureResult::Verified(m) => cprintln!(
                "[verify] Signature {} validated by {}",
                index,
                m.anchor.name()
            ),
            SignatureResult::Failed(err) => cprintln!(
                "[verify] Signature {} failed: {}",
                index,
                u32::from(err)
            ),
        }
        report.results.push(result);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::TestEnv;
    use crate::AnchorCategory;
    use bootgate_drivers::persistent::TrustEntry;
    use bootgate_image_gen::{fake_keys, PeImageBuilder, Signer};
    use zerocopy::IntoBytes;

    fn run(env: &mut TestEnv, image: &[u8]) -> BootGateResult<SignatureReport> {
        let ctx = ImageContext::parse(image).unwrap();
        let digests = crate::compute_digests(env, &ctx).unwrap();
        let anchors = env.snapshot.anchors.clone();
        verify_signatures(env, &ctx, &digests, &anchors, PolicyFlags::empty())
    }

    fn entry(cert_type: u16, payload: &[u8]) -> Vec<u8> {
        let header = WinCertificateHeader {
            length: (8 + payload.len()) as u32,
            revision: WIN_CERT_REVISION_2_0,
            certificate_type: cert_type,
        };
        let mut out = header.as_bytes().to_vec();
        out.extend_from_slice(payload);
        out.resize(out.len().next_multiple_of(8), 0);
        out
    }

    #[test]
    fn test_table_walk() {
        let mut table = entry(WIN_CERT_TYPE_PKCS_SIGNED_DATA, &[1, 2, 3]);
        table.extend(entry(0x0001, &[4; 8]));
        let entries: Vec<_> = CertificateTable::new(&table)
            .collect::<BootGateResult<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].data, &[1, 2, 3]);
        assert!(entries[0].is_pkcs_signed_data());
        assert_eq!(entries[1].certificate_type, 1);
        assert_eq!(entries[1].data, &[4; 8]);
    }

    #[test]
    fn test_table_walk_malformed() {
        let mut table = entry(WIN_CERT_TYPE_PKCS_SIGNED_DATA, &[1, 2, 3]);
        table[0..4].copy_from_slice(&4u32.to_le_bytes());
        let mut walk = CertificateTable::new(&table);
        assert_eq!(
            walk.next(),
            Some(Err(BootGateError::IMAGE_CERT_ENTRY_LENGTH_INVALID))
        );
        assert_eq!(walk.next(), None);

        let mut table = entry(WIN_CERT_TYPE_PKCS_SIGNED_DATA, &[1, 2, 3]);
        table[0..4].copy_from_slice(&64u32.to_le_bytes());
        assert_eq!(
            CertificateTable::new(&table).next(),
            Some(Err(BootGateError::IMAGE_CERT_ENTRY_LENGTH_INVALID))
        );

        let table = [0u8; 4];
        assert_eq!(
            CertificateTable::new(&table).next(),
            Some(Err(BootGateError::IMAGE_CERT_ENTRY_HEADER_TRUNCATED))
        );
    }

    #[test]
    fn test_vendor_root_match() {
        let mut env = TestEnv::with_roots();
        let image = PeImageBuilder::with_text()
            .signed_by(&fake_keys::vendor_root_cert())
            .build();
        let m = run(&mut env, &image).unwrap().into_match().unwrap();
        assert_eq!(m.anchor, AnchorId::VendorRoot);
        assert_eq!(m.index, 0);
        assert_eq!(
            m.cert_digest,
            env.sha256.digest(&fake_keys::vendor_root_cert()).unwrap()
        );
    }

    #[test]
    fn test_anchor_order() {
        let mut env = TestEnv::with_roots();
        env.add_anchor(
            AnchorId::MachineOwnerList,
            AnchorCategory::AllowList,
            vec![TrustEntry::X509(fake_keys::vendor_root_cert())],
        );
        let image = PeImageBuilder::with_text()
            .signed_by(&fake_keys::vendor_root_cert())
            .build();
        let m = run(&mut env, &image).unwrap().into_match().unwrap();
        assert_eq!(m.anchor, AnchorId::MachineOwnerList);
    }

    #[test]
    fn test_second_signature_validates() {
        let mut env = TestEnv::with_roots();
        let image = PeImageBuilder::with_text()
            .signed_by(&fake_keys::untrusted_cert())
            .signed_by(&fake_keys::fallback_root_cert())
            .build();
        let report = run(&mut env, &image).unwrap();
        assert_eq!(
            report.results[0],
            SignatureResult::Failed(BootGateError::SIGNATURE_NO_MATCHING_ANCHOR)
        );
        let m = report.into_match().unwrap();
        assert_eq!(m.index, 1);
        assert_eq!(m.anchor, AnchorId::FallbackRoot);
    }

    #[test]
    fn test_dual_signed_sha1_signature_validates() {
        let mut env = TestEnv::with_roots();
        let image = PeImageBuilder::with_text()
            .signer(Signer {
                digest_override: Some(ImageDigest::Sha256([0xee; 32])),
                ..Signer::new(&fake_keys::vendor_root_cert())
            })
            .signer(Signer::sha1(&fake_keys::vendor_root_cert()))
            .build();
        let report = run(&mut env, &image).unwrap();
        assert_eq!(
            report.results[0],
            SignatureResult::Failed(BootGateError::SIGNATURE_NO_MATCHING_ANCHOR)
        );
        let m = report.into_match().unwrap();
        assert_eq!(m.index, 1);
        assert_eq!(m.anchor, AnchorId::VendorRoot);

        // A SHA-1 signature over another image is no better
        let image = PeImageBuilder::with_text()
            .signer(Signer {
                digest_override: Some(ImageDigest::Sha1([0xee; 20])),
                ..Signer::sha1(&fake_keys::vendor_root_cert())
            })
            .build();
        assert_eq!(
            run(&mut env, &image).unwrap().into_match().err(),
            Some(BootGateError::SIGNATURE_NO_MATCHING_ANCHOR)
        );
    }

    #[test]
    fn test_failures() {
        let mut env = TestEnv::with_roots();

        let image = PeImageBuilder::with_text().build();
        assert_eq!(
            run(&mut env, &image).err(),
            Some(BootGateError::SIGNATURE_NOT_PRESENT)
        );

        let image = PeImageBuilder::with_text()
            .raw_certificate(0x0001, &[0; 16])
            .build();
        assert_eq!(
            run(&mut env, &image).err(),
            Some(BootGateError::SIGNATURE_NO_PKCS_ENTRY)
        );

        let image = PeImageBuilder::with_text()
            .signed_by(&fake_keys::untrusted_cert())
            .build();
        assert_eq!(
            run(&mut env, &image).unwrap().into_match().err(),
            Some(BootGateError::SIGNATURE_NO_MATCHING_ANCHOR)
        );

        // Signed over some other image
        let image = PeImageBuilder::with_text()
            .signer(Signer {
                digest_override: Some(ImageDigest::Sha256([0xee; 32])),
                ..Signer::new(&fake_keys::vendor_root_cert())
            })
            .build();
        assert_eq!(
            run(&mut env, &image).unwrap().into_match().err(),
            Some(BootGateError::SIGNATURE_NO_MATCHING_ANCHOR)
        );

        // Malformed blob is a failure, not a skip
        let image = PeImageBuilder::with_text()
            .raw_certificate(WIN_CERT_TYPE_PKCS_SIGNED_DATA, b"garbage!")
            .build();
        assert_eq!(
            run(&mut env, &image).unwrap().into_match().err(),
            Some(BootGateError::SIGNATURE_SIGNED_DATA_MALFORMED)
        );

        let image = PeImageBuilder::with_text()
            .signer(Signer {
                module_signing_eku: true,
                ..Signer::new(&fake_keys::vendor_root_cert())
            })
            .build();
        assert_eq!(
            run(&mut env, &image).unwrap().into_match().err(),
            Some(BootGateError::SIGNATURE_MODULE_SIGNING_EKU)
        );
    }

    #[test]
    fn test_crypto_unavailable_aborts() {
        let mut env = TestEnv::with_roots();
        env.crypto.unavailable = true;
        let image = PeImageBuilder::with_text()
            .signed_by(&fake_keys::vendor_root_cert())
            .build();
        assert_eq!(
            run(&mut env, &image).err(),
            Some(BootGateError::CRYPTO_VERIFY_FAILURE)
        );
    }

    #[test]
    fn test_denied_certificate() {
        let mut env = TestEnv::with_roots();
        env.add_anchor(
            AnchorId::PlatformDbx,
            AnchorCategory::DenyList,
            vec![TrustEntry::X509(fake_keys::untrusted_cert())],
        );
        let image = PeImageBuilder::with_text()
            .signed_by(&fake_keys::vendor_root_cert())
            .signed_by(&fake_keys::untrusted_cert())
            .build();
        let ctx = ImageContext::parse(&image).unwrap();
        let digests = crate::compute_digests(&mut env, &ctx).unwrap();
        let anchors = env.snapshot.anchors.clone();
        assert_eq!(
            check_denied_signatures(&mut env, &ctx, &digests, &anchors),
            Ok(Some(AnchorId::PlatformDbx))
        );

        let image = PeImageBuilder::with_text().build();
        let ctx = ImageContext::parse(&image).unwrap();
        assert_eq!(
            check_denied_signatures(&mut env, &ctx, &digests, &anchors),
            Ok(None)
        );
    }
}
