// Licensed under the Apache-2.0 license

use bootgate_drivers::VariableName;
use bootgate_error::BootGateError;
use bootgate_image_gen::{fake_keys, PeImageBuilder, DATA_CHARACTERISTICS};
use bootgate_image_verify::{AnchorId, VerificationMethod, VerificationReason};
use bootgate_loader::{
    boot_next_stage, install_load_chain_hook, remove_load_chain_hook, BootServiceTable,
    ImageHandle, ImageServices, ImageSource,
};

use crate::helpers::*;

fn host_with(path: &str, image: Vec<u8>) -> RecordingHost {
    let mut host = RecordingHost::default();
    host.files.insert(path, image);
    host
}

#[test]
fn test_boot_next_stage() {
    let image = vendor_signed_image(SBAT_GRUB_2);
    let mut table = BootServiceTable::new(host_with("grubx64.efi", image.clone()));
    let mut gate = test_gate();

    let verdict = boot_next_stage(&mut table, &mut gate, "grubx64.efi").unwrap();
    assert_eq!(verdict.anchor, Some(AnchorId::VendorRoot));

    // Verified once, loaded from the verified bytes, started once
    assert_eq!(gate.crypto.verify_calls, 1);
    assert_eq!(table.native().loaded.len(), 1);
    assert_eq!(table.native().loaded[0].1, image);
    assert_eq!(table.native().started.len(), 1);
    assert!(!table.is_hooked());
    assert_eq!(table.restore_count(), 1);
}

#[test]
fn test_next_stage_loads_go_through_hook() {
    let stage = vendor_signed_image(SBAT_GRUB_2);
    let kernel = image_signed_by(&fake_keys::fallback_root_cert(), SBAT_KERNEL);
    let unsigned = PeImageBuilder::with_text().sbat(SBAT_KERNEL).build();

    let mut host = host_with("grubx64.efi", stage);
    host.files.insert("vmlinuz", kernel.clone());
    host.files.insert("rootkit.efi", unsigned);
    host.next_stage_loads = vec![String::from("rootkit.efi"), String::from("vmlinuz")];
    let results = host.next_stage_results.clone();
    let mut table = BootServiceTable::new(host);
    let mut gate = test_gate();

    boot_next_stage(&mut table, &mut gate, "grubx64.efi").unwrap();

    assert_eq!(
        *results.borrow(),
        [
            Err(BootGateError::LOADER_SECURITY_VIOLATION),
            Ok(ImageHandle(2))
        ]
    );
    assert_eq!(table.native().loaded.len(), 2);
    assert_eq!(table.native().loaded[1].1, kernel);
    assert_eq!(table.native().started, [ImageHandle(1), ImageHandle(2)]);
    assert!(gate.crypto.verify_calls >= 2);
    assert!(!table.is_hooked());
    assert_eq!(table.restore_count(), 1);
}

#[test]
fn test_boot_next_stage_revoked() {
    let mut table = BootServiceTable::new(host_with(
        "grubx64.efi",
        vendor_signed_image(SBAT_GRUB_0),
    ));
    let mut gate = test_gate();

    assert_eq!(
        boot_next_stage(&mut table, &mut gate, "grubx64.efi"),
        Err(BootGateError::SBAT_GENERATION_REVOKED)
    );
    assert!(table.native().loaded.is_empty());
    assert!(table.native().started.is_empty());
    assert_eq!(table.restore_count(), 0);
}

#[test]
fn test_nested_loads_are_verified() {
    let stage = vendor_signed_image(SBAT_GRUB_2);
    let kernel = image_signed_by(&fake_keys::fallback_root_cert(), SBAT_KERNEL);
    let unsigned = PeImageBuilder::with_text().sbat(SBAT_KERNEL).build();

    let mut table = BootServiceTable::new(host_with("vmlinuz", kernel.clone()));
    let mut gate = test_gate();
    {
        let mut guard = install_load_chain_hook(&mut table, &mut gate).unwrap();
        let parent = guard
            .load_image(None, ImageSource::Buffer(&stage))
            .unwrap();

        let child = guard
            .load_image(Some(parent), ImageSource::Path("vmlinuz"))
            .unwrap();
        assert_eq!(
            guard.verdict(child).unwrap().anchor,
            Some(AnchorId::FallbackRoot)
        );
        guard.start_image(child).unwrap();
        assert_eq!(
            guard.start_image(child),
            Err(BootGateError::LOADER_IMAGE_ALREADY_STARTED)
        );

        // A separate buffer gets no credit from its parent
        assert_eq!(
            guard.load_image(Some(parent), ImageSource::Buffer(&unsigned)),
            Err(BootGateError::LOADER_SECURITY_VIOLATION)
        );
        remove_load_chain_hook(guard).unwrap();
    }

    assert_eq!(table.native().loaded.len(), 2);
    assert_eq!(table.native().loaded[1].1, kernel);
    assert_eq!(table.native().started.len(), 1);
    assert_eq!(table.restore_count(), 1);
}

#[test]
fn test_parent_section_inherits_verification() {
    let child = PeImageBuilder::with_text().sbat(SBAT_KERNEL).build();
    let revoked_child = PeImageBuilder::with_text().sbat(SBAT_GRUB_0).build();
    let parent = PeImageBuilder::with_text()
        .section(".kernel", &child, DATA_CHARACTERISTICS)
        .section(".rescue", &revoked_child, DATA_CHARACTERISTICS)
        .sbat(SBAT_GRUB_2)
        .signed_by(&fake_keys::vendor_root_cert())
        .build_image();
    let kernel_start = parent.layout.sections[1].start;
    let rescue_start = parent.layout.sections[2].start;

    let mut table = BootServiceTable::new(RecordingHost::default());
    let mut gate = test_gate();
    {
        let mut guard = install_load_chain_hook(&mut table, &mut gate).unwrap();
        let handle = guard
            .load_image(None, ImageSource::Buffer(&parent.bytes))
            .unwrap();

        let kernel = guard
            .load_image(
                Some(handle),
                ImageSource::ParentSection {
                    offset: kernel_start,
                    len: child.len(),
                },
            )
            .unwrap();
        let verdict = guard.verdict(kernel).unwrap();
        assert_eq!(verdict.reason, VerificationReason::ParentVerified);
        assert_eq!(verdict.method, VerificationMethod::ByCertificate);

        // Inherited trust does not skip revocation
        assert_eq!(
            guard.load_image(
                Some(handle),
                ImageSource::ParentSection {
                    offset: rescue_start,
                    len: revoked_child.len(),
                },
            ),
            Err(BootGateError::LOADER_SECURITY_VIOLATION)
        );
    }
    assert_eq!(table.native().loaded.len(), 2);
    assert_eq!(table.native().loaded[1].1, child);
}

#[test]
fn test_store_failure_refuses_load() {
    let image = vendor_signed_image(SBAT_GRUB_2);
    let mut table = BootServiceTable::new(RecordingHost::default());
    let mut gate = test_gate();
    gate.variables.inject_failure(VariableName::PlatformDbx);
    {
        let mut guard = install_load_chain_hook(&mut table, &mut gate).unwrap();
        assert_eq!(
            guard.load_image(None, ImageSource::Buffer(&image)),
            Err(BootGateError::LOADER_SECURITY_VIOLATION)
        );
    }
    assert!(table.native().loaded.is_empty());
    assert!(!table.is_hooked());
    assert_eq!(table.restore_count(), 1);
    assert_eq!(
        gate.verify(&image, image.len()).reason,
        VerificationReason::ResourceUnavailable
    );
}
