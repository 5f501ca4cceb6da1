/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Boot gate entry points: top-level image verification with measurement,
    the load-chain hook, administrative updates and the next-stage boot flow.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod admin;
mod flow;
mod gate;
mod hook;
mod pcr;

pub use flow::boot_next_stage;
pub use gate::{BootGate, ImageGate};
pub use hook::{
    install_load_chain_hook, remove_load_chain_hook, BootServiceTable, HostImageServices,
    ImageEntry, ImageHandle, ImageServices, ImageSource, LoadChainGuard,
};
pub use pcr::measure_verdict;
