// Licensed under the Apache-2.0 license

//! DER shaped stand-ins for the certificates used in tests. Only the outer
//! SEQUENCE header is meaningful; the fake crypto library compares bytes.

fn fake_cert(subject: &str) -> Vec<u8> {
    // Pad the body so the two byte length form is the natural encoding
    let mut body = format!("CN={subject}").into_bytes();
    body.resize(300, b'.');
    let mut cert = vec![0x30, 0x82];
    cert.extend_from_slice(&(body.len() as u16).to_be_bytes());
    cert.extend_from_slice(&body);
    cert
}

/// Distribution vendor root compiled into the boot gate
pub fn vendor_root_cert() -> Vec<u8> {
    fake_cert("Fake Vendor Secure Boot CA")
}

/// Embedded fallback root compiled into the boot gate
pub fn fallback_root_cert() -> Vec<u8> {
    fake_cert("Fake Build Certificate")
}

/// Certificate enrolled in the platform allow list
pub fn platform_db_cert() -> Vec<u8> {
    fake_cert("Fake Platform UEFI CA")
}

/// Certificate enrolled by the machine owner
pub fn machine_owner_cert() -> Vec<u8> {
    fake_cert("Fake Machine Owner Key")
}

/// Certificate nobody trusts
pub fn untrusted_cert() -> Vec<u8> {
    fake_cert("Fake Untrusted Signer")
}
