/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains the synthetic PE/COFF image generator and the fake
    signing material used by tests.

--*/

mod fake_authenticode;
pub mod fake_keys;
mod generator;

pub use fake_authenticode::{fake_signed_data, FakeAuthenticode, FAKE_SIGNED_DATA_MAGIC};
pub use generator::{
    PeImage, PeImageBuilder, PeLayout, Signer, DATA_CHARACTERISTICS, TEXT_CHARACTERISTICS,
};
