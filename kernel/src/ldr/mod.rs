//! Loader interface (ldr)
//!
//! Executable parsing, relocation and symbol resolution are the loader's
//! business. What reaches the process manager is a [`ProgramImage`]: an
//! already-mapped image with its entry point, the regions it occupies and
//! the argument vector to hand the new process.
//!
//! ```text
//!   loader                        process manager
//!   ┌──────────────┐  ProgramImage  ┌───────────────┐
//!   │ parse + map  │ ─────────────► │ spawn_process │ ──► pid
//!   └──────────────┘                └───────────────┘
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use x86_64::VirtAddr;

use crate::mm::AddressSpaceId;

/// A mapped region of the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    pub base: VirtAddr,
    pub size: usize,
}

impl ImageRegion {
    pub const fn new(base: VirtAddr, size: usize) -> Self {
        Self { base, size }
    }

    pub const fn empty() -> Self {
        Self {
            base: VirtAddr::zero(),
            size: 0,
        }
    }

    pub fn contains(&self, address: VirtAddr) -> bool {
        address >= self.base && address.as_u64() < self.base.as_u64() + self.size as u64
    }
}

/// Ready-to-run program image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    /// First instruction executed
    pub entry: VirtAddr,
    pub code: ImageRegion,
    pub data: ImageRegion,
    /// Arguments copied into the new process
    pub argv: Vec<String>,
    /// Address space the loader mapped the image into, if it built one
    pub address_space: Option<AddressSpaceId>,
}

impl ProgramImage {
    /// Image with only an entry point; regions empty, no prepared address space
    pub fn from_entry(entry: VirtAddr) -> Self {
        Self {
            entry,
            code: ImageRegion::empty(),
            data: ImageRegion::empty(),
            argv: Vec::new(),
            address_space: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_regions(mut self, code: ImageRegion, data: ImageRegion) -> Self {
        self.code = code;
        self.data = data;
        self
    }

    pub fn in_address_space(mut self, space: AddressSpaceId) -> Self {
        self.address_space = Some(space);
        self
    }

    /// Entry point lies inside the code region (or no region was described)
    pub fn entry_in_code(&self) -> bool {
        self.code.size == 0 || self.code.contains(self.entry)
    }
}
