/*++

Licensed under the Apache-2.0 license.

File Name:

    hook.rs

Abstract:

    File contains the load-chain hook. While a `LoadChainGuard` is alive
    every image loaded through it is verified before the host loads it, and
    only images the guard accepted can be started. Dropping the guard puts
    the host's native entry points back.

--*/

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ops::Deref;

use bootgate_drivers::printer::HexBytes;
use bootgate_drivers::{cprintln, ImageReader};
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_verify::{VerificationContext, VerificationVerdict};

use crate::gate::ImageGate;

/// Handle of an image known to the host loader
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct ImageHandle(pub u32);

/// Where the bytes of a load request come from
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ImageSource<'a> {
    /// Caller supplied buffer
    Buffer(&'a [u8]),

    /// File resolved through the host's image reader
    Path(&'a str),

    /// Region of the parent image's own buffer
    ParentSection { offset: usize, len: usize },
}

/// Code of a loaded image. It is handed the entry points that were active
/// when it was started and makes its own loads through them.
pub type ImageEntry = Box<dyn FnOnce(ImageHandle, &mut dyn ImageServices) -> BootGateResult<()>>;

/// Native image-load entry points of the host
pub trait HostImageServices: ImageReader {
    fn load_image(
        &mut self,
        parent: Option<ImageHandle>,
        source: ImageSource,
    ) -> BootGateResult<ImageHandle>;

    /// Prepare a loaded image for execution
    fn image_entry(&mut self, handle: ImageHandle) -> BootGateResult<ImageEntry>;

    fn unload_image(&mut self, handle: ImageHandle) -> BootGateResult<()>;
}

/// Image-load services as seen by a caller or a running image
pub trait ImageServices: ImageReader {
    fn load_image(
        &mut self,
        parent: Option<ImageHandle>,
        source: ImageSource,
    ) -> BootGateResult<ImageHandle>;

    /// Transfer control to a loaded image. Returns once the image exits.
    fn start_image(&mut self, handle: ImageHandle) -> BootGateResult<()>;

    fn unload_image(&mut self, handle: ImageHandle) -> BootGateResult<()>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum EntryPoints {
    Native,
    Hooked,
}

/// Active image-load entry points of the host
pub struct BootServiceTable<S: HostImageServices> {
    native: S,
    entry_points: EntryPoints,
    restore_count: usize,
}

impl<S: HostImageServices> BootServiceTable<S> {
    pub fn new(native: S) -> Self {
        Self {
            native,
            entry_points: EntryPoints::Native,
            restore_count: 0,
        }
    }

    pub fn is_hooked(&self) -> bool {
        self.entry_points == EntryPoints::Hooked
    }

    /// Number of times the native entry points were put back
    pub fn restore_count(&self) -> usize {
        self.restore_count
    }

    pub fn native(&self) -> &S {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut S {
        &mut self.native
    }

    fn hook(&mut self) -> BootGateResult<()> {
        if self.is_hooked() {
            return Err(BootGateError::LOADER_HOOK_ALREADY_INSTALLED);
        }
        self.entry_points = EntryPoints::Hooked;
        Ok(())
    }

    fn restore(&mut self) -> BootGateResult<()> {
        if !self.is_hooked() {
            return Err(BootGateError::LOADER_HOOK_NOT_INSTALLED);
        }
        self.entry_points = EntryPoints::Native;
        self.restore_count += 1;
        Ok(())
    }

    /// Hooked entry points are only served by a live `LoadChainGuard`
    fn native_entry_points(&self) -> BootGateResult<()> {
        if self.is_hooked() {
            cprintln!("[hook] Entry points hooked without a live hook");
            return Err(BootGateError::LOADER_SECURITY_VIOLATION);
        }
        Ok(())
    }
}

impl<S: HostImageServices> ImageReader for BootServiceTable<S> {
    fn read_image(&mut self, path: &str) -> BootGateResult<Vec<u8>> {
        self.native.read_image(path)
    }
}

impl<S: HostImageServices> ImageServices for BootServiceTable<S> {
    fn load_image(
        &mut self,
        parent: Option<ImageHandle>,
        source: ImageSource,
    ) -> BootGateResult<ImageHandle> {
        self.native_entry_points()?;
        self.native.load_image(parent, source)
    }

    fn start_image(&mut self, handle: ImageHandle) -> BootGateResult<()> {
        self.native_entry_points()?;
        let entry = self.native.image_entry(handle)?;
        let services: &mut dyn ImageServices = self;
        entry(handle, services)
    }

    fn unload_image(&mut self, handle: ImageHandle) -> BootGateResult<()> {
        self.native_entry_points()?;
        self.native.unload_image(handle)
    }
}

/// Image loaded through the hook
struct LoadedImage {
    bytes: Vec<u8>,
    verdict: VerificationVerdict,
    started: bool,
}

/// Hooked entry points, installed for as long as the guard lives. Images
/// started through the guard are handed the guard itself, so everything
/// they load is verified too.
pub struct LoadChainGuard<'t, S: HostImageServices, G: ImageGate> {
    table: &'t mut BootServiceTable<S>,
    gate: &'t mut G,
    loaded: BTreeMap<ImageHandle, LoadedImage>,
    restored: bool,
}

/// Hook the image-load entry points of `table`.
///
/// # Arguments
///
/// * `table` - Host service table
/// * `gate` - Verifier every load is routed through
///
/// # Returns
///
/// * `LoadChainGuard` - Restores the native entry points when dropped
pub fn install_load_chain_hook<'t, S: HostImageServices, G: ImageGate>(
    table: &'t mut BootServiceTable<S>,
    gate: &'t mut G,
) -> BootGateResult<LoadChainGuard<'t, S, G>> {
    table.hook()?;
    cprintln!("[hook] Load-chain hook installed");
    Ok(LoadChainGuard {
        table,
        gate,
        loaded: BTreeMap::new(),
        restored: false,
    })
}

/// Restore the native entry points now instead of at the end of scope
pub fn remove_load_chain_hook<S: HostImageServices, G: ImageGate>(
    mut guard: LoadChainGuard<'_, S, G>,
) -> BootGateResult<()> {
    guard.restore()
}

impl<S: HostImageServices, G: ImageGate> LoadChainGuard<'_, S, G> {
    fn restore(&mut self) -> BootGateResult<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        cprintln!("[hook] Load-chain hook removed");
        self.table.restore()
    }

    /// Verdict of an image this hook loaded
    pub fn verdict(&self, handle: ImageHandle) -> Option<&VerificationVerdict> {
        self.loaded.get(&handle).map(|image| &image.verdict)
    }

    /// Load an image the boot flow verified just before installing the
    /// hook, so that images it loads can refer back to it
    pub(crate) fn load_verified(
        &mut self,
        bytes: Vec<u8>,
        verdict: VerificationVerdict,
    ) -> BootGateResult<ImageHandle> {
        if !verdict.is_accepted() {
            return Err(BootGateError::LOADER_SECURITY_VIOLATION);
        }
        let handle = self
            .table
            .native
            .load_image(None, ImageSource::Buffer(&bytes))?;
        self.loaded.insert(
            handle,
            LoadedImage {
                bytes,
                verdict,
                started: false,
            },
        );
        Ok(handle)
    }

    /// Fetch the bytes to verify and the context they are verified under
    fn resolve(
        &mut self,
        parent: Option<ImageHandle>,
        source: ImageSource,
    ) -> BootGateResult<(Vec<u8>, VerificationContext)> {
        let parent_image = parent.and_then(|handle| self.loaded.get(&handle));
        match source {
            ImageSource::ParentSection { offset, len } => {
                let parent_image =
                    parent_image.ok_or(BootGateError::LOADER_PARENT_SECTION_INVALID)?;
                let end = offset
                    .checked_add(len)
                    .ok_or(BootGateError::LOADER_PARENT_SECTION_INVALID)?;
                let bytes = parent_image
                    .bytes
                    .get(offset..end)
                    .ok_or(BootGateError::LOADER_PARENT_SECTION_INVALID)?;
                Ok((
                    bytes.to_vec(),
                    VerificationContext::nested(&parent_image.verdict, true),
                ))
            }
            ImageSource::Buffer(bytes) => {
                let ctx = match parent_image {
                    Some(p) => VerificationContext::nested(&p.verdict, false),
                    None => VerificationContext::TOP_LEVEL,
                };
                Ok((bytes.to_vec(), ctx))
            }
            ImageSource::Path(path) => {
                let ctx = match parent_image {
                    Some(p) => VerificationContext::nested(&p.verdict, false),
                    None => VerificationContext::TOP_LEVEL,
                };
                Ok((self.table.native.read_image(path)?, ctx))
            }
        }
    }
}

impl<S: HostImageServices, G: ImageGate> ImageReader for LoadChainGuard<'_, S, G> {
    fn read_image(&mut self, path: &str) -> BootGateResult<Vec<u8>> {
        self.table.native.read_image(path)
    }
}

impl<S: HostImageServices, G: ImageGate> ImageServices for LoadChainGuard<'_, S, G> {
    /// Verify, then hand the verified bytes to the native loader. A rejected
    /// image never reaches the host.
    fn load_image(
        &mut self,
        parent: Option<ImageHandle>,
        source: ImageSource,
    ) -> BootGateResult<ImageHandle> {
        let (bytes, ctx) = self.resolve(parent, source)?;
        let verdict = self.gate.verify_image(&bytes, &ctx);
        if !verdict.is_accepted() {
            cprintln!(
                "[hook] Refusing to load image: {}",
                verdict.reason.description()
            );
            return Err(BootGateError::LOADER_SECURITY_VIOLATION);
        }

        let handle = self
            .table
            .native
            .load_image(parent, ImageSource::Buffer(&bytes))?;
        self.loaded.insert(
            handle,
            LoadedImage {
                bytes,
                verdict,
                started: false,
            },
        );
        Ok(handle)
    }

    /// Run the image with the hooked entry points. An image this hook loaded
    /// counts as started once the host has prepared it; a failed preparation
    /// can be retried.
    fn start_image(&mut self, handle: ImageHandle) -> BootGateResult<()> {
        if self.loaded.get(&handle).is_some_and(|image| image.started) {
            return Err(BootGateError::LOADER_IMAGE_ALREADY_STARTED);
        }
        let entry = self.table.native.image_entry(handle)?;
        if let Some(image) = self.loaded.get_mut(&handle) {
            image.started = true;
            cprintln!(
                "[hook] Starting image {}",
                HexBytes(&handle.0.to_be_bytes())
            );
        }
        let services: &mut dyn ImageServices = self;
        entry(handle, services)
    }

    fn unload_image(&mut self, handle: ImageHandle) -> BootGateResult<()> {
        self.loaded.remove(&handle);
        self.table.native.unload_image(handle)
    }
}

impl<S: HostImageServices, G: ImageGate> Deref for LoadChainGuard<'_, S, G> {
    type Target = BootServiceTable<S>;

    fn deref(&self) -> &Self::Target {
        &*self.table
    }
}

impl<S: HostImageServices, G: ImageGate> Drop for LoadChainGuard<'_, S, G> {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}
