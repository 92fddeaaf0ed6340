//! Serial port output
//!
//! Writes to COM1 (0x3F8), which QEMU exposes as its serial console. The
//! kernel logger is the only writer.

use core::fmt::{self, Write};

use spin::Mutex;
use x86_64::instructions::port::Port;

/// COM1 port address
const COM1: u16 = 0x3F8;

/// Line status register: transmit holding register empty
const LSR_THR_EMPTY: u8 = 0x20;

/// Serial port writer
pub struct SerialWriter {
    data: Port<u8>,
    line_status: Port<u8>,
}

impl SerialWriter {
    const fn new(base: u16) -> Self {
        Self {
            data: Port::new(base),
            line_status: Port::new(base + 5),
        }
    }

    fn write_byte(&mut self, byte: u8) {
        // SAFETY: COM1 is initialized by the bootloader
        unsafe {
            while self.line_status.read() & LSR_THR_EMPTY == 0 {}
            self.data.write(byte);
        }
    }
}

impl Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// Global serial writer
static WRITER: Mutex<SerialWriter> = Mutex::new(SerialWriter::new(COM1));

/// Write formatted output to COM1
pub fn write_fmt(args: fmt::Arguments) {
    // Interrupt handlers log too; keep them out while the port is held.
    x86_64::instructions::interrupts::without_interrupts(|| {
        let _ = WRITER.lock().write_fmt(args);
    });
}
