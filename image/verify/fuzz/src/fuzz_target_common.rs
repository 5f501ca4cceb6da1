// Licensed under the Apache-2.0 license

use bootgate_image_verify::*;

/// Walk every structure the parser exposes. Nothing here may panic, whatever
/// the input bytes are.
pub fn harness_pe_image(data: &[u8]) {
    let Ok(ctx) = ImageContext::parse(data) else {
        return;
    };

    if let Ok(regions) = authenticode_regions(&ctx) {
        let hashed: usize = regions.iter().map(|r| r.len()).sum();
        assert!(hashed <= ctx.len());
    }

    for cert in CertificateTable::from_context(&ctx) {
        if cert.is_err() {
            break;
        }
    }

    let _ = ctx.check_nx_policy();

    if let Ok(Some(records)) = read_sbat_records(&ctx) {
        let mut policy = RevocationPolicy::new();
        policy.raise("sbat", 1);
        let _ = check_revocation(Some(&records[..]), &policy);
    }
}

/// Feed raw bytes to both text formats: the image metadata records and the
/// revocation policy lines.
pub fn harness_sbat(data: &[u8]) {
    let policy = RevocationPolicy::from_text_bytes(data).unwrap_or_default();
    if let Ok(records) = parse_sbat_records(data) {
        let _ = check_revocation(Some(&records[..]), &policy);
    }
    let round_trip = policy.to_revocation_list();
    for (name, generation) in policy.iter() {
        assert_eq!(round_trip.generation_of(name), Some(generation));
    }
}
