//! Architecture-specific code
//!
//! Only built for bare-metal x86_64; hosted builds drive the multitasker
//! through a simulated processor.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;
