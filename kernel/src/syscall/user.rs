//! User Buffer Probing
//!
//! Every pointer a syscall receives is validated before the kernel touches
//! it:
//! - not null
//! - properly aligned for the type read or written
//! - below the user probe address, without wrapping
//!
//! Hosted builds have no user/kernel split, so only null, alignment and
//! wrap checks apply there.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{KResult, KernelError};

/// Highest address (exclusive) a user buffer may reach
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub const USER_LIMIT: usize = crate::mm::MM_USER_PROBE_ADDRESS;
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub const USER_LIMIT: usize = usize::MAX;

/// Longest string accepted from user memory
pub const MAX_USER_STRING: usize = 4096;

/// Validate `[address, address + length)` as user memory
pub fn probe(address: usize, length: usize, alignment: usize) -> KResult<()> {
    debug_assert!(alignment.is_power_of_two(), "invalid alignment {}", alignment);

    if length == 0 {
        return Ok(());
    }
    if address == 0 {
        return Err(KernelError::NullParameter);
    }
    if address & (alignment - 1) != 0 {
        return Err(KernelError::BadAddress);
    }
    let end = address.checked_add(length).ok_or(KernelError::BadAddress)?;
    if end > USER_LIMIT {
        return Err(KernelError::BadAddress);
    }
    Ok(())
}

#[inline]
pub fn probe_typed<T>(address: usize) -> KResult<()> {
    probe(address, core::mem::size_of::<T>(), core::mem::align_of::<T>())
}

/// Copy a `T` out of user memory
///
/// # Safety
/// `address` must be mapped in the caller's address space; the probe only
/// checks the range.
pub unsafe fn copy_from_user<T: Copy>(address: usize) -> KResult<T> {
    probe_typed::<T>(address)?;
    Ok(core::ptr::read(address as *const T))
}

/// Copy `count` consecutive `T`s out of user memory
///
/// # Safety
/// See [`copy_from_user`].
pub unsafe fn copy_slice_from_user<T: Copy>(address: usize, count: usize) -> KResult<Vec<T>> {
    let length = count
        .checked_mul(core::mem::size_of::<T>())
        .ok_or(KernelError::BadAddress)?;
    if count == 0 {
        return Ok(Vec::new());
    }
    probe(address, length, core::mem::align_of::<T>())?;
    Ok(core::slice::from_raw_parts(address as *const T, count).to_vec())
}

/// Copy `value` into user memory
///
/// # Safety
/// `address` must be mapped and writable in the caller's address space.
pub unsafe fn copy_to_user<T: Copy>(address: usize, value: &T) -> KResult<()> {
    probe_typed::<T>(address)?;
    core::ptr::write(address as *mut T, *value);
    Ok(())
}

/// Copy `values` into a user array
///
/// # Safety
/// See [`copy_to_user`].
pub unsafe fn copy_slice_to_user<T: Copy>(address: usize, values: &[T]) -> KResult<()> {
    if values.is_empty() {
        return Ok(());
    }
    probe(address, core::mem::size_of_val(values), core::mem::align_of::<T>())?;
    core::ptr::copy_nonoverlapping(values.as_ptr(), address as *mut T, values.len());
    Ok(())
}

/// Read a UTF-8 string of `length` bytes
///
/// # Safety
/// See [`copy_from_user`].
pub unsafe fn read_user_str(address: usize, length: usize) -> KResult<String> {
    if length > MAX_USER_STRING {
        return Err(KernelError::InvalidArgument);
    }
    let bytes = copy_slice_from_user::<u8>(address, length)?;
    String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument)
}
