//! Samsung S3C UART (boot console)
//!
//! Minimal model of the console XNU writes to during early boot. Transmit
//! always completes immediately and nothing is ever received.

use std::io::Write;

use spin::Mutex;
use t8030_guest_memory::{access_mask, MmioDevice};

/// Line control
pub const ULCON: u64 = 0x00;
/// Control
pub const UCON: u64 = 0x04;
/// FIFO control
pub const UFCON: u64 = 0x08;
/// Modem control
pub const UMCON: u64 = 0x0C;
/// Tx/Rx status
pub const UTRSTAT: u64 = 0x10;
/// Error status
pub const UERSTAT: u64 = 0x14;
/// FIFO status
pub const UFSTAT: u64 = 0x18;
/// Modem status
pub const UMSTAT: u64 = 0x1C;
/// Transmit holding
pub const UTXH: u64 = 0x20;
/// Receive buffer
pub const URXH: u64 = 0x24;
/// Baud rate divisor
pub const UBRDIV: u64 = 0x28;

/// Default size of the UART window when `reg` carries no size cell
pub const S3C_UART_SIZE: u64 = 0x4000;

/// UTRSTAT: transmit buffer empty
const UTRSTAT_TX_EMPTY: u64 = 1 << 1;
/// UTRSTAT: transmitter empty
const UTRSTAT_TX_DONE: u64 = 1 << 2;

#[derive(Debug, Default)]
struct Registers {
    ulcon: u64,
    ucon: u64,
    ufcon: u64,
    umcon: u64,
    ubrdiv: u64,
}

/// Console UART forwarding transmitted bytes to a host sink
pub struct S3cUart {
    regs: Mutex<Registers>,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl S3cUart {
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            regs: Mutex::new(Registers::default()),
            sink: Mutex::new(sink),
        }
    }

    fn transmit(&self, byte: u8) {
        let mut sink = self.sink.lock();
        let mut result = sink.write_all(&[byte]);
        if result.is_ok() && byte == b'\n' {
            result = sink.flush();
        }
        if let Err(e) = result {
            log::warn!("UART sink write failed: {}", e);
        }
    }
}

impl MmioDevice for S3cUart {
    fn read(&self, offset: u64, size: u32) -> u64 {
        let regs = self.regs.lock();
        let value = match offset {
            ULCON => regs.ulcon,
            UCON => regs.ucon,
            UFCON => regs.ufcon,
            UMCON => regs.umcon,
            UTRSTAT => UTRSTAT_TX_EMPTY | UTRSTAT_TX_DONE,
            UERSTAT | UFSTAT | UMSTAT | URXH => 0,
            UBRDIV => regs.ubrdiv,
            _ => {
                log::trace!("UART read of unknown offset {:#x}", offset);
                0
            }
        };
        value & access_mask(size)
    }

    fn write(&self, offset: u64, value: u64, size: u32) {
        let value = value & access_mask(size);
        if offset == UTXH {
            self.transmit(value as u8);
            return;
        }

        let mut regs = self.regs.lock();
        match offset {
            ULCON => regs.ulcon = value,
            UCON => regs.ucon = value,
            UFCON => regs.ufcon = value,
            UMCON => regs.umcon = value,
            UBRDIV => regs.ubrdiv = value,
            _ => log::trace!("UART write {:#x} to unhandled offset {:#x}", value, offset),
        }
    }
}
