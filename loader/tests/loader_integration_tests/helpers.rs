// Licensed under the Apache-2.0 license

use bootgate_common::VendorConfig;
use bootgate_drivers::{
    ImageReader, MeasurementLog, MemoryImageReader, MemoryVariableStore, VariableStore,
};
use bootgate_error::BootGateResult;
use bootgate_image_gen::{fake_keys, FakeAuthenticode, PeImageBuilder};
use bootgate_loader::{
    BootGate, HostImageServices, ImageEntry, ImageHandle, ImageServices, ImageSource,
};
use std::cell::RefCell;
use std::rc::Rc;

pub type TestGate = BootGate<FakeAuthenticode, MemoryVariableStore, MeasurementLog>;

pub const IMAGE_SIZE: usize = 64 * 1024;

pub const SBAT_GRUB_2: &str = "sbat,1,SBAT Version,sbat,1,https://github.com/rhboot/shim/blob/main/SBAT.md\n\
                               grub,2,Free Software Foundation,grub,2.06,https://www.gnu.org/software/grub/\n";

pub const SBAT_GRUB_0: &str = "sbat,1,SBAT Version,sbat,1,https://github.com/rhboot/shim/blob/main/SBAT.md\n\
                               grub,0,Free Software Foundation,grub,2.02,https://www.gnu.org/software/grub/\n";

pub const SBAT_KERNEL: &str = "sbat,1,SBAT Version,sbat,1,https://github.com/rhboot/shim/blob/main/SBAT.md\n\
                               linux,1,The Linux Developers,linux,6.6,https://linux.org\n";

pub fn vendor_config() -> VendorConfig {
    VendorConfig {
        vendor_root_cert: Some(fake_keys::vendor_root_cert()),
        fallback_root_cert: Some(fake_keys::fallback_root_cert()),
        sbat_baseline: String::from("sbat,1,2021030218\ngrub,1\n"),
        ..Default::default()
    }
}

pub fn test_gate() -> TestGate {
    BootGate::new(
        FakeAuthenticode::default(),
        MemoryVariableStore::new(),
        vendor_config(),
        MeasurementLog::new(),
    )
}

/// 64KB image signed by `cert`
pub fn image_signed_by(cert: &[u8], sbat: &str) -> Vec<u8> {
    PeImageBuilder::with_text()
        .sbat(sbat)
        .signed_by(cert)
        .total_size(IMAGE_SIZE)
        .build()
}

/// 64KB image signed by the vendor root
pub fn vendor_signed_image(sbat: &str) -> Vec<u8> {
    image_signed_by(&fake_keys::vendor_root_cert(), sbat)
}

pub fn store(gate: &mut TestGate) -> &mut dyn VariableStore {
    &mut gate.variables
}

/// Host loader keeping the bytes it was given. The next image it starts
/// loads and starts every path in `next_stage_loads` through the entry
/// points it was handed.
#[derive(Default)]
pub struct RecordingHost {
    pub files: MemoryImageReader,
    pub loaded: Vec<(ImageHandle, Vec<u8>)>,
    pub started: Vec<ImageHandle>,
    pub next_stage_loads: Vec<String>,
    pub next_stage_results: Rc<RefCell<Vec<BootGateResult<ImageHandle>>>>,
}

impl ImageReader for RecordingHost {
    fn read_image(&mut self, path: &str) -> BootGateResult<Vec<u8>> {
        self.files.read_image(path)
    }
}

impl HostImageServices for RecordingHost {
    fn load_image(
        &mut self,
        _parent: Option<ImageHandle>,
        source: ImageSource,
    ) -> BootGateResult<ImageHandle> {
        let bytes = match source {
            ImageSource::Buffer(b) => b.to_vec(),
            ImageSource::Path(p) => self.files.read_image(p)?,
            ImageSource::ParentSection { .. } => Vec::new(),
        };
        let handle = ImageHandle(self.loaded.len() as u32 + 1);
        self.loaded.push((handle, bytes));
        Ok(handle)
    }

    fn image_entry(&mut self, handle: ImageHandle) -> BootGateResult<ImageEntry> {
        self.started.push(handle);
        let paths = std::mem::take(&mut self.next_stage_loads);
        let results = self.next_stage_results.clone();
        Ok(Box::new(
            move |handle: ImageHandle, services: &mut dyn ImageServices| {
                for path in paths {
                    let result = services.load_image(Some(handle), ImageSource::Path(&path));
                    if let Ok(child) = result {
                        services.start_image(child)?;
                    }
                    results.borrow_mut().push(result);
                }
                Ok(())
            },
        ))
    }

    fn unload_image(&mut self, _handle: ImageHandle) -> BootGateResult<()> {
        Ok(())
    }
}
