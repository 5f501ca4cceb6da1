// Licensed under the Apache-2.0 license

use bootgate_drivers::persistent::{TrustEntry, TrustList};
use bootgate_drivers::{VariableAttributes, VariableName};
use bootgate_error::BootGateError;
use bootgate_image_gen::{fake_keys, PeImageBuilder};
use bootgate_image_verify::{PolicyFlags, RevocationPolicy, VerificationReason};
use bootgate_loader::admin;

use crate::helpers::*;

#[test]
fn test_raised_minimum_applies_to_next_pass() {
    let mut gate = test_gate();
    let image = vendor_signed_image(SBAT_GRUB_2);
    assert!(gate.verify(&image, image.len()).is_accepted());

    let update = RevocationPolicy::from_text("grub,3\n").unwrap();
    admin::raise_revocation_minimums(store(&mut gate), &update).unwrap();

    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.reason, VerificationReason::RevokedGeneration);
    assert_eq!(verdict.error, Some(BootGateError::SBAT_GENERATION_REVOKED));
}

#[test]
fn test_minimums_never_drop_below_baseline() {
    let mut gate = test_gate();
    let image = vendor_signed_image(SBAT_GRUB_0);

    // The compiled baseline already requires grub 1
    let update = RevocationPolicy::from_text("grub,0\n").unwrap();
    let after = admin::raise_revocation_minimums(store(&mut gate), &update).unwrap();
    assert_eq!(after.effective_minimum("grub"), Some(0));

    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.reason, VerificationReason::RevokedGeneration);

    let update = RevocationPolicy::from_text("grub,5\n").unwrap();
    admin::raise_revocation_minimums(store(&mut gate), &update).unwrap();
    let update = RevocationPolicy::from_text("grub,2\n").unwrap();
    let after = admin::raise_revocation_minimums(store(&mut gate), &update).unwrap();
    assert_eq!(after.effective_minimum("grub"), Some(5));
    assert_eq!(gate.variables.write_count(), 3);

    let image = vendor_signed_image(SBAT_GRUB_2);
    assert_eq!(
        gate.verify(&image, image.len()).reason,
        VerificationReason::RevokedGeneration
    );
}

#[test]
fn test_require_nx_flag() {
    let mut gate = test_gate();
    let image = PeImageBuilder::with_text()
        .sbat(SBAT_GRUB_2)
        .signed_by(&fake_keys::vendor_root_cert())
        .dll_characteristics(0)
        .build();
    assert!(gate.verify(&image, image.len()).is_accepted());

    admin::set_policy_flags(store(&mut gate), PolicyFlags::REQUIRE_NX).unwrap();
    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.reason, VerificationReason::MalformedImage);
    assert_eq!(
        verdict.error,
        Some(BootGateError::IMAGE_POLICY_NX_COMPAT_REQUIRED)
    );
    assert_eq!(verdict.flags, PolicyFlags::REQUIRE_NX);
}

#[test]
fn test_deny_list_update_revokes_signer() {
    let mut gate = test_gate();
    let image = image_signed_by(&fake_keys::machine_owner_cert(), SBAT_GRUB_2);
    admin::append_trust_list_entry(
        store(&mut gate),
        VariableName::MokList,
        TrustEntry::X509(fake_keys::machine_owner_cert()),
    )
    .unwrap();
    assert!(gate.verify(&image, image.len()).is_accepted());

    admin::append_trust_list_entry(
        store(&mut gate),
        VariableName::MokListX,
        TrustEntry::X509(fake_keys::machine_owner_cert()),
    )
    .unwrap();
    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.error, Some(BootGateError::POLICY_CERT_DENY_LISTED));
}

#[test]
fn test_failed_update_leaves_policy_intact() {
    let mut gate = test_gate();
    gate.variables.inject_failure(VariableName::SbatLevel);
    let update = RevocationPolicy::from_text("grub,9\n").unwrap();
    assert_eq!(
        admin::raise_revocation_minimums(store(&mut gate), &update),
        Err(BootGateError::VARIABLE_READ_FAILURE)
    );

    gate.variables.clear_failures();
    let image = vendor_signed_image(SBAT_GRUB_2);
    assert!(gate.verify(&image, image.len()).is_accepted());
}

#[test]
fn test_unpersisted_owner_list_is_unavailable() {
    let mut gate = test_gate();
    let image = image_signed_by(&fake_keys::machine_owner_cert(), SBAT_GRUB_2);
    let list = TrustList::new(vec![TrustEntry::X509(fake_keys::machine_owner_cert())]);
    gate.variables.insert_raw(
        VariableName::MokList,
        VariableAttributes::BOOTSERVICE_ACCESS | VariableAttributes::RUNTIME_ACCESS,
        &list.encode().unwrap(),
    );

    let verdict = gate.verify(&image, image.len());
    assert_eq!(verdict.reason, VerificationReason::ResourceUnavailable);
    assert_eq!(
        verdict.error,
        Some(BootGateError::VARIABLE_ATTRIBUTES_INVALID)
    );

    admin::replace_trust_list(store(&mut gate), VariableName::MokList, &list).unwrap();
    assert!(gate.verify(&image, image.len()).is_accepted());
}
