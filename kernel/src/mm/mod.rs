//! Memory Manager interface (mm)
//!
//! Paging and address-space construction belong to the memory subsystem.
//! The process manager only asks it for a few things:
//!
//! - **Address spaces**: one per `Normal` process, shared by its threads
//! - **Allocations**: a stack region for every new PCB
//!
//! Both are handed out as opaque handles and returned when the last PCB
//! referencing them is reaped.
//!
//! # Address Space Layout (x86_64)
//!
//! ```text
//! 0x0000_0000_0000_0000 - 0x0000_7FFF_FFFF_FFFF: User space (128TB)
//! 0xFFFF_8000_0000_0000 - 0xFFFF_FFFF_FFFF_FFFF: Kernel space (128TB)
//! ```

use core::fmt;

use x86_64::VirtAddr;

/// Highest address (exclusive) a user buffer may reach on bare metal
pub const MM_USER_PROBE_ADDRESS: usize = 0x7FFF_FFFF_0000;

/// Opaque handle to an address space owned by the memory subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressSpaceId(pub u32);

impl AddressSpaceId {
    /// The kernel's own address space
    pub const KERNEL: AddressSpaceId = AddressSpaceId(0);
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as#{}", self.0)
    }
}

/// Services the process manager consumes from the memory subsystem
pub trait MemoryManager: Send + Sync {
    /// Allocate `size` bytes; `None` when memory is exhausted
    fn allocate(&self, size: usize) -> Option<VirtAddr>;

    /// Return an allocation made by [`MemoryManager::allocate`]
    fn release(&self, address: VirtAddr);

    /// Build a fresh, empty address space
    fn create_address_space(&self) -> Option<AddressSpaceId>;

    /// Tear down an address space once nothing references it
    fn destroy_address_space(&self, space: AddressSpaceId);
}
