//! Driver for the Winbond W25Q16 serial NOR flash.
//!
//! The chip is driven over an [`embedded_hal::spi::SpiBus`] with a separate
//! chip-select [`embedded_hal::digital::OutputPin`], so that chip-select can
//! stay asserted across calls while a read or write stream is open. Configure
//! the bus for [`MODE`] (clock idles high, data sampled on the rising edge),
//! 8-bit words, most significant bit first.
//!
//! [`FlashSpi`] is the blocking driver and [`AsyncFlashSpi`] its
//! `embedded-hal-async` counterpart. Both speak the same nine-command subset:
//! write enable/disable, page program, read status register 1, read data,
//! chip erase, power down, release power down and read manufacturer ID.
#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to the other modules.
#[macro_use]
mod fmt;

pub mod address;
pub mod async_comms;
pub mod comms;
pub mod config;
pub mod error;
pub mod traits;

#[cfg(test)]
mod mock;

pub use address::{Address, CAPACITY, PAGE_COUNT, PAGE_SIZE};
pub use async_comms::AsyncFlashSpi;
pub use comms::{FlashSpi, State, Status};
pub use config::Config;
pub use error::Error;
pub use traits::{AsyncHardwareFlashDevice, HardwareFlashDevice};

use embedded_hal::spi::{Mode, MODE_3};

/// SPI mode the W25Q16 expects: CPOL = 1, CPHA = 1.
pub const MODE: Mode = MODE_3;

/// JEDEC manufacturer ID reported by Winbond parts.
pub const MANUFACTURER_ID: u8 = 0xEF;
