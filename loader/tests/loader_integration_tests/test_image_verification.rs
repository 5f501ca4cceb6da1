// Licensed under the Apache-2.0 license

use bootgate_drivers::pcr_log::{EV_EFI_VARIABLE_AUTHORITY, EV_IPL};
use bootgate_drivers::persistent::TrustEntry;
use bootgate_drivers::VariableName;
use bootgate_error::BootGateError;
use bootgate_image_gen::{fake_keys, PeImageBuilder, Signer};
use bootgate_image_verify::{
    AnchorId, PolicyFlags, VerificationMethod, VerificationOutcome, VerificationReason,
    VerificationState,
};
use bootgate_loader::admin;

use crate::helpers::*;

#[test]
fn test_signed_64k_image_accepted() {
    let mut gate = test_gate();
    let image = vendor_signed_image(SBAT_GRUB_2);
    assert_eq!(image.len(), IMAGE_SIZE);

    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.outcome, VerificationOutcome::Accept);
    assert_eq!(verdict.reason, VerificationReason::SignatureValid);
    assert_eq!(verdict.anchor, Some(AnchorId::VendorRoot));
    assert_eq!(verdict.method, VerificationMethod::ByCertificate);

    let entries = gate.measurements.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].pcr, 4);
    assert_eq!(entries[0].event_type, EV_IPL);
    assert_eq!(entries[1].pcr, 7);
    assert_eq!(entries[1].event_type, EV_EFI_VARIABLE_AUTHORITY);
    assert_eq!(entries[1].description(), b"vendor_cert");
}

#[test]
fn test_revoked_generation_overrides_valid_signature() {
    let mut gate = test_gate();
    let image = vendor_signed_image(SBAT_GRUB_0);

    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.outcome, VerificationOutcome::Reject);
    assert_eq!(verdict.reason, VerificationReason::RevokedGeneration);
    assert_eq!(verdict.error, Some(BootGateError::SBAT_GENERATION_REVOKED));
    assert_eq!(
        verdict.failed_state(),
        Some(VerificationState::RevocationCheck)
    );
    assert_eq!(gate.crypto.verify_calls, 1);
}

#[test]
fn test_deny_listed_hash_overrides_valid_signature() {
    let mut gate = test_gate();
    let image = PeImageBuilder::with_text()
        .sbat(SBAT_GRUB_2)
        .signed_by(&fake_keys::vendor_root_cert())
        .total_size(IMAGE_SIZE)
        .build_image();
    let digests = image.authenticode_digests();

    for entry in [
        TrustEntry::Sha1(digests.sha1),
        TrustEntry::Sha256(digests.sha256),
    ] {
        let mut gate = test_gate();
        admin::append_trust_list_entry(store(&mut gate), VariableName::MokListX, entry).unwrap();
        let verdict = gate.verify(&image.bytes, image.bytes.len());
        assert_eq!(verdict.reason, VerificationReason::HashDenyListed);
        assert_eq!(verdict.error, Some(BootGateError::POLICY_HASH_DENY_LISTED));
        assert_eq!(gate.crypto.verify_calls, 0);
    }

    // Allow-listing the same hash does not help
    admin::append_trust_list_entry(
        store(&mut gate),
        VariableName::PlatformDb,
        TrustEntry::Sha256(digests.sha256),
    )
    .unwrap();
    admin::append_trust_list_entry(
        store(&mut gate),
        VariableName::PlatformDbx,
        TrustEntry::Sha256(digests.sha256),
    )
    .unwrap();
    let verdict = gate.verify(&image.bytes, image.bytes.len());
    assert_eq!(verdict.reason, VerificationReason::HashDenyListed);
}

#[test]
fn test_deny_listed_signer() {
    let mut gate = test_gate();
    admin::append_trust_list_entry(
        store(&mut gate),
        VariableName::PlatformDbx,
        TrustEntry::X509(fake_keys::vendor_root_cert()),
    )
    .unwrap();
    let image = vendor_signed_image(SBAT_GRUB_2);
    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.reason, VerificationReason::HashDenyListed);
    assert_eq!(verdict.error, Some(BootGateError::POLICY_CERT_DENY_LISTED));
}

#[test]
fn test_allow_listed_hash_without_signature() {
    let mut gate = test_gate();
    let image = PeImageBuilder::with_text()
        .sbat(SBAT_GRUB_2)
        .total_size(IMAGE_SIZE)
        .build_image();
    let verdict = gate.verify(&image.bytes, image.bytes.len());
    assert_eq!(verdict.error, Some(BootGateError::SIGNATURE_NOT_PRESENT));

    admin::append_trust_list_entry(
        store(&mut gate),
        VariableName::MokList,
        TrustEntry::Sha1(image.authenticode_digests().sha1),
    )
    .unwrap();
    let verdict = gate.verify(&image.bytes, image.bytes.len());
    assert_eq!(verdict.reason, VerificationReason::HashAllowListed);
    assert_eq!(verdict.anchor, Some(AnchorId::MachineOwnerList));
    assert_eq!(verdict.method, VerificationMethod::ByHash);
}

#[test]
fn test_anchor_sources() {
    let cases = [
        (fake_keys::fallback_root_cert(), None, AnchorId::FallbackRoot),
        (
            fake_keys::platform_db_cert(),
            Some(VariableName::PlatformDb),
            AnchorId::PlatformDb,
        ),
        (
            fake_keys::machine_owner_cert(),
            Some(VariableName::MokList),
            AnchorId::MachineOwnerList,
        ),
    ];
    for (cert, variable, anchor) in cases {
        let mut gate = test_gate();
        if let Some(variable) = variable {
            admin::append_trust_list_entry(
                store(&mut gate),
                variable,
                TrustEntry::X509(cert.clone()),
            )
            .unwrap();
        }
        let image = image_signed_by(&cert, SBAT_GRUB_2);
        let verdict = gate.verify(&image, image.len());
        assert_eq!(verdict.reason, VerificationReason::SignatureValid);
        assert_eq!(verdict.anchor, Some(anchor));
    }
}

#[test]
fn test_ignore_platform_db() {
    let mut gate = test_gate();
    admin::append_trust_list_entry(
        store(&mut gate),
        VariableName::PlatformDb,
        TrustEntry::X509(fake_keys::platform_db_cert()),
    )
    .unwrap();
    let image = image_signed_by(&fake_keys::platform_db_cert(), SBAT_GRUB_2);
    assert!(gate.verify(&image, image.len()).is_accepted());

    admin::set_policy_flags(store(&mut gate), PolicyFlags::IGNORE_PLATFORM_DB).unwrap();
    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.reason, VerificationReason::SignatureInvalid);
    assert_eq!(
        verdict.error,
        Some(BootGateError::SIGNATURE_NO_MATCHING_ANCHOR)
    );
}

#[test]
fn test_untrusted_signer() {
    let mut gate = test_gate();
    let image = image_signed_by(&fake_keys::untrusted_cert(), SBAT_GRUB_2);
    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.reason, VerificationReason::SignatureInvalid);
    assert_eq!(verdict.anchor, None);
    assert_eq!(verdict.method, VerificationMethod::Nothing);
}

#[test]
fn test_missing_sbat_is_revoked() {
    let mut gate = test_gate();
    let image = PeImageBuilder::with_text()
        .signed_by(&fake_keys::vendor_root_cert())
        .build();
    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.reason, VerificationReason::RevokedGeneration);
    assert_eq!(verdict.error, Some(BootGateError::SBAT_SECTION_MISSING));
}

#[test]
fn test_verify_is_deterministic() {
    let mut gate = test_gate();
    for image in [
        vendor_signed_image(SBAT_GRUB_2),
        vendor_signed_image(SBAT_GRUB_0),
        image_signed_by(&fake_keys::untrusted_cert(), SBAT_GRUB_2),
    ] {
        let first = gate.verify(&image, image.len());
        let second = gate.verify(&image, image.len());
        assert_eq!(first, second);
    }
}

#[test]
fn test_malformed_images_are_never_checked() {
    let image = PeImageBuilder::with_text()
        .sbat(SBAT_GRUB_2)
        .signed_by(&fake_keys::vendor_root_cert())
        .total_size(IMAGE_SIZE)
        .build_image();
    let secdir = image.layout.security_dir_entry_offset;

    let mut oversized_cert_dir = image.bytes.clone();
    oversized_cert_dir[secdir + 4..secdir + 8].copy_from_slice(&0x0010_0000u32.to_le_bytes());

    let mut section_count_overflow = image.bytes.clone();
    let count_offset = image.layout.file_header_offset + 2;
    section_count_overflow[count_offset..count_offset + 2]
        .copy_from_slice(&0xffffu16.to_le_bytes());

    let truncated = &image.bytes[..image.layout.file_header_offset + 4];

    let cases: [(&[u8], BootGateError); 4] = [
        (&[], BootGateError::IMAGE_PARSE_BUFFER_EMPTY),
        (truncated, BootGateError::IMAGE_PARSE_FILE_HEADER_TRUNCATED),
        (
            &oversized_cert_dir,
            BootGateError::IMAGE_PARSE_CERT_DIR_OUT_OF_BOUNDS,
        ),
        (
            &section_count_overflow,
            BootGateError::IMAGE_PARSE_SECTION_TABLE_OVERFLOW,
        ),
    ];
    for (bytes, err) in cases {
        let mut gate = test_gate();
        let verdict = gate.verify(bytes, bytes.len());
        assert_eq!(verdict.reason, VerificationReason::MalformedImage);
        assert_eq!(verdict.error, Some(err));
        assert_eq!(verdict.digests, None);
        assert_eq!(verdict.failed_state(), Some(VerificationState::Parsing));
        assert_eq!(gate.crypto.verify_calls, 0);
        assert!(gate.measurements.is_empty());
    }
}

#[test]
fn test_bytes_appended_after_signature_are_rejected() {
    let mut gate = test_gate();
    let mut image = vendor_signed_image(SBAT_GRUB_2);
    assert!(gate.verify(&image, image.len()).is_accepted());
    let calls = gate.crypto.verify_calls;

    image.extend_from_slice(&[0x90; 50]);
    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.reason, VerificationReason::MalformedImage);
    assert_eq!(
        verdict.error,
        Some(BootGateError::IMAGE_PARSE_CERT_DIR_NOT_AT_END)
    );
    assert_eq!(verdict.digests, None);
    assert_eq!(gate.crypto.verify_calls, calls);
}

#[test]
fn test_dual_signed_image_accepted_by_sha1_signature() {
    let mut gate = test_gate();
    let image = PeImageBuilder::with_text()
        .sbat(SBAT_GRUB_2)
        .signed_by(&fake_keys::untrusted_cert())
        .signer(Signer::sha1(&fake_keys::vendor_root_cert()))
        .total_size(IMAGE_SIZE)
        .build();

    let verdict = gate.verify(&image, image.len());
    assert!(verdict.is_accepted());
    assert_eq!(verdict.reason, VerificationReason::SignatureValid);
    assert_eq!(verdict.anchor, Some(AnchorId::VendorRoot));
    assert_eq!(verdict.method, VerificationMethod::ByCertificate);
}
