/*++

Licensed under the Apache-2.0 license.

File Name:

    admin.rs

Abstract:

    Privileged updates of the persisted trust lists, revocation override and
    policy flags. Each update replaces the whole variable.

--*/

use bootgate_drivers::persistent::{RevocationList, TrustEntry, TrustList};
use bootgate_drivers::{cprintln, VariableAttributes, VariableName, VariableStore};
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_verify::{PolicyFlags, RevocationPolicy};

fn check_trust_list_name(name: VariableName) -> BootGateResult<()> {
    match name {
        VariableName::PlatformDb
        | VariableName::PlatformDbx
        | VariableName::MokList
        | VariableName::MokListX => Ok(()),
        _ => Err(BootGateError::ADMIN_VARIABLE_INVALID),
    }
}

fn read_trust_list(store: &dyn VariableStore, name: VariableName) -> BootGateResult<TrustList> {
    match store.get_persisted_variable(name)? {
        Some(blob) => TrustList::decode(&blob),
        None => Ok(TrustList::default()),
    }
}

/// Append one entry to a trust list variable. An entry already present is
/// not added twice.
///
/// # Arguments
///
/// * `store` - Persisted variable service
/// * `name` - `db`, `dbx`, `MokList` or `MokListX`
/// * `entry` - Digest or certificate to add
pub fn append_trust_list_entry(
    store: &mut dyn VariableStore,
    name: VariableName,
    entry: TrustEntry,
) -> BootGateResult<()> {
    check_trust_list_name(name)?;
    let mut list = read_trust_list(store, name)?;
    if list.entries.contains(&entry) {
        return Ok(());
    }
    list.entries.push(entry);
    replace_trust_list(store, name, &list)
}

/// Replace a trust list variable
pub fn replace_trust_list(
    store: &mut dyn VariableStore,
    name: VariableName,
    list: &TrustList,
) -> BootGateResult<()> {
    check_trust_list_name(name)?;
    let blob = list
        .encode()
        .map_err(|_| BootGateError::ADMIN_ENTRY_INVALID)?;
    store.set_variable(name, VariableAttributes::AUTHENTICATED, &blob)?;
    cprintln!(
        "[admin] {} now holds {} entries",
        name.as_str(),
        list.entries.len()
    );
    Ok(())
}

/// Raise the persisted revocation minimums. Minimums are never lowered; a
/// request that changes nothing leaves the variable untouched.
///
/// # Returns
///
/// * `RevocationPolicy` - The persisted override after the update
pub fn raise_revocation_minimums(
    store: &mut dyn VariableStore,
    update: &RevocationPolicy,
) -> BootGateResult<RevocationPolicy> {
    let mut current = RevocationPolicy::new();
    if let Some(blob) = store.get_persisted_variable(VariableName::SbatLevel)? {
        current.merge_override(&RevocationList::decode(&blob)?);
    }

    let mut changed = false;
    for (name, generation) in update.iter() {
        changed |= current.raise(name, generation);
    }
    if changed {
        let blob = current
            .to_revocation_list()
            .encode()
            .map_err(|_| BootGateError::ADMIN_ENTRY_INVALID)?;
        store.set_variable(
            VariableName::SbatLevel,
            VariableAttributes::AUTHENTICATED,
            &blob,
        )?;
        cprintln!("[admin] Revocation minimums raised");
    }
    Ok(current)
}

/// Persist the policy flags
pub fn set_policy_flags(store: &mut dyn VariableStore, flags: PolicyFlags) -> BootGateResult<()> {
    store.set_variable(
        VariableName::PolicyFlags,
        VariableAttributes::AUTHENTICATED,
        &flags.bits().to_le_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootgate_drivers::MemoryVariableStore;

    #[test]
    fn test_append_creates_and_extends() {
        let mut store = MemoryVariableStore::new();
        append_trust_list_entry(&mut store, VariableName::PlatformDbx, TrustEntry::Sha256([1; 32]))
            .unwrap();
        append_trust_list_entry(&mut store, VariableName::PlatformDbx, TrustEntry::Sha1([2; 20]))
            .unwrap();
        append_trust_list_entry(&mut store, VariableName::PlatformDbx, TrustEntry::Sha256([1; 32]))
            .unwrap();

        let list = read_trust_list(&store, VariableName::PlatformDbx).unwrap();
        assert_eq!(
            list.entries,
            vec![TrustEntry::Sha256([1; 32]), TrustEntry::Sha1([2; 20])]
        );
        assert_eq!(
            store.attributes(VariableName::PlatformDbx),
            Some(VariableAttributes::AUTHENTICATED)
        );
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn test_only_trust_lists_accept_entries() {
        let mut store = MemoryVariableStore::new();
        assert_eq!(
            append_trust_list_entry(&mut store, VariableName::SbatLevel, TrustEntry::Sha1([0; 20])),
            Err(BootGateError::ADMIN_VARIABLE_INVALID)
        );
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_non_der_certificate_refused() {
        let mut store = MemoryVariableStore::new();
        assert_eq!(
            append_trust_list_entry(
                &mut store,
                VariableName::MokList,
                TrustEntry::X509(b"not der".to_vec())
            ),
            Err(BootGateError::ADMIN_ENTRY_INVALID)
        );
    }

    #[test]
    fn test_replace() {
        let mut store = MemoryVariableStore::new();
        append_trust_list_entry(&mut store, VariableName::PlatformDb, TrustEntry::Sha1([2; 20]))
            .unwrap();
        let list = TrustList::new(vec![TrustEntry::Sha256([3; 32])]);
        replace_trust_list(&mut store, VariableName::PlatformDb, &list).unwrap();
        assert_eq!(read_trust_list(&store, VariableName::PlatformDb).unwrap(), list);
    }

    #[test]
    fn test_raise_is_monotonic() {
        let mut store = MemoryVariableStore::new();
        let first = RevocationPolicy::from_text("sbat,1\ngrub,3\n").unwrap();
        raise_revocation_minimums(&mut store, &first).unwrap();
        assert_eq!(store.write_count(), 1);

        let lower = RevocationPolicy::from_text("grub,2\n").unwrap();
        let after = raise_revocation_minimums(&mut store, &lower).unwrap();
        assert_eq!(after.effective_minimum("grub"), Some(3));
        assert_eq!(store.write_count(), 1);

        let higher = RevocationPolicy::from_text("grub,4\nshim,2\n").unwrap();
        let after = raise_revocation_minimums(&mut store, &higher).unwrap();
        assert_eq!(after.effective_minimum("grub"), Some(4));
        assert_eq!(after.effective_minimum("shim"), Some(2));
        assert_eq!(after.effective_minimum("sbat"), Some(1));

        let blob = store
            .get_persisted_variable(VariableName::SbatLevel)
            .unwrap()
            .unwrap();
        let persisted = RevocationList::decode(&blob).unwrap();
        assert_eq!(persisted.generation_of("grub"), Some(4));
    }

    #[test]
    fn test_set_policy_flags() {
        let mut store = MemoryVariableStore::new();
        set_policy_flags(&mut store, PolicyFlags::REQUIRE_NX).unwrap();
        assert_eq!(
            store.get_persisted_variable(VariableName::PolicyFlags).unwrap(),
            Some(PolicyFlags::REQUIRE_NX.bits().to_le_bytes().to_vec())
        );
    }

    #[test]
    fn test_update_refused_over_unpersisted_variable() {
        let mut store = MemoryVariableStore::new();
        store.insert_raw(
            VariableName::MokListX,
            VariableAttributes::BOOTSERVICE_ACCESS,
            &TrustList::default().encode().unwrap(),
        );
        assert_eq!(
            append_trust_list_entry(&mut store, VariableName::MokListX, TrustEntry::Sha1([1; 20])),
            Err(BootGateError::VARIABLE_ATTRIBUTES_INVALID)
        );

        store.insert_raw(VariableName::SbatLevel, VariableAttributes::empty(), &[]);
        let update = RevocationPolicy::from_text("grub,2\n").unwrap();
        assert_eq!(
            raise_revocation_minimums(&mut store, &update),
            Err(BootGateError::VARIABLE_ATTRIBUTES_INVALID)
        );
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_write_failure_propagates() {
        let mut store = MemoryVariableStore::new();
        store.inject_failure(VariableName::PolicyFlags);
        assert_eq!(
            set_policy_flags(&mut store, PolicyFlags::empty()),
            Err(BootGateError::VARIABLE_WRITE_FAILURE)
        );
    }
}
