// Licensed under the Apache-2.0 license

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use bootgate_error::{BootGateError, BootGateResult};

/// Byte-buffer retrieval for a named image (file or network origin)
pub trait ImageReader {
    fn read_image(&mut self, path: &str) -> BootGateResult<Vec<u8>>;
}

/// Image reader serving buffers from memory
#[derive(Default)]
pub struct MemoryImageReader {
    images: BTreeMap<String, Vec<u8>>,
}

impl MemoryImageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, image: Vec<u8>) {
        self.images.insert(String::from(path), image);
    }
}

impl ImageReader for MemoryImageReader {
    fn read_image(&mut self, path: &str) -> BootGateResult<Vec<u8>> {
        self.images
            .get(path)
            .cloned()
            .ok_or(BootGateError::IMAGE_READ_NOT_FOUND)
    }
}
