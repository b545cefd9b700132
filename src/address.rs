//! Page/offset addressing of the flash array.

/// Bytes per page; also the most a single page program can write.
pub const PAGE_SIZE: usize = 256;
/// Pages in a W25Q16.
pub const PAGE_COUNT: usize = 8192;
/// Size of the whole array in bytes (16 Mbit).
pub const CAPACITY: usize = PAGE_SIZE * PAGE_COUNT;

/// A byte location expressed as a page and an offset inside that page.
///
/// Nothing here is range checked: a page past [`PAGE_COUNT`] is sent as-is
/// and the chip ignores the address bits it does not decode, so the access
/// wraps around the array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    pub page: u16,
    pub offset: u8,
}

impl Address {
    pub const fn new(page: u16, offset: u8) -> Self {
        Self { page, offset }
    }

    /// Splits a linear byte address. Bits above 23 are dropped since only
    /// three address bytes go over the wire.
    pub const fn from_linear(addr: u32) -> Self {
        Self {
            page: (addr >> 8) as u16,
            offset: addr as u8,
        }
    }

    pub const fn linear(&self) -> u32 {
        (self.page as u32) << 8 | self.offset as u32
    }

    /// The three address bytes of a command, most significant first.
    pub const fn to_bytes(&self) -> [u8; 3] {
        [(self.page >> 8) as u8, self.page as u8, self.offset]
    }

    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            page: (bytes[0] as u16) << 8 | bytes[1] as u16,
            offset: bytes[2],
        }
    }

    /// Bytes left in this page starting at `offset`.
    pub const fn remaining_in_page(&self) -> usize {
        PAGE_SIZE - self.offset as usize
    }
}

impl From<u32> for Address {
    fn from(addr: u32) -> Self {
        Self::from_linear(addr)
    }
}

impl From<Address> for u32 {
    fn from(addr: Address) -> Self {
        addr.linear()
    }
}
