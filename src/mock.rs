//! A simulated W25Q16 for the driver tests.
//!
//! The bus and chip-select mocks share one [`Chip`], which records every
//! select, deselect and byte clocked out, and answers like the real part:
//! status reads, data reads, the manufacturer ID, programming gated by the
//! write enable latch, chip erase and power-down.

use core::convert::Infallible;
use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, ErrorKind};

use crate::address::{CAPACITY, PAGE_SIZE};

const WRITE_ENABLE: u8 = 0x06;
const WRITE_DISABLE: u8 = 0x04;
const PAGE_PROGRAM: u8 = 0x02;
const READ_STATUS_1: u8 = 0x05;
const READ_DATA: u8 = 0x03;
const CHIP_ERASE: u8 = 0xC7;
const POWER_DOWN: u8 = 0xB9;
const RELEASE_POWER_DOWN: u8 = 0xAB;
const MANUFACTURER_DEVICE_ID: u8 = 0x90;

/// W25Q16 device ID, sent after the manufacturer ID.
const DEVICE_ID: u8 = 0x14;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Select,
    Deselect,
    /// A byte clocked out by the driver.
    Byte(u8),
}

#[derive(Debug, PartialEq, Eq)]
pub struct BusFault;

impl spi::Error for BusFault {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

pub struct Chip {
    pub events: Vec<Event>,
    pub memory: Vec<u8>,
    pub manufacturer_id: u8,
    /// Busy status reads reported after each program or erase.
    pub busy_reads: u32,
    /// Report busy forever.
    pub stuck_busy: bool,
    pub wel: bool,
    pub powered_down: bool,
    /// Fail the next bus operation with [`BusFault`].
    pub fail_next: bool,
    /// Nanoseconds slept through the async delay mock.
    pub slept_ns: u64,
    selected: bool,
    frame: Vec<u8>,
    pending_busy: u32,
}

pub type Shared = Rc<RefCell<Chip>>;

/// A fresh, fully erased chip plus a bus and chip-select wired to it.
pub fn sim() -> (Shared, MockBus, MockCs) {
    let chip = Rc::new(RefCell::new(Chip {
        events: Vec::new(),
        memory: vec![0xFF; CAPACITY],
        manufacturer_id: crate::MANUFACTURER_ID,
        busy_reads: 0,
        stuck_busy: false,
        wel: false,
        powered_down: false,
        fail_next: false,
        slept_ns: 0,
        selected: false,
        frame: Vec::new(),
        pending_busy: 0,
    }));
    (chip.clone(), MockBus(chip.clone()), MockCs(chip))
}

impl Chip {
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Bytes clocked out in each completed select/deselect cycle.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut current: Option<Vec<u8>> = None;
        for event in &self.events {
            match event {
                Event::Select => current = Some(Vec::new()),
                Event::Byte(byte) => {
                    if let Some(frame) = current.as_mut() {
                        frame.push(*byte);
                    }
                }
                Event::Deselect => {
                    if let Some(frame) = current.take() {
                        frames.push(frame);
                    }
                }
            }
        }
        frames
    }

    /// Frames other than status register polls.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.frames()
            .into_iter()
            .filter(|frame| frame.first() != Some(&READ_STATUS_1))
            .collect()
    }

    fn select(&mut self) {
        self.events.push(Event::Select);
        self.selected = true;
        self.frame.clear();
    }

    fn deselect(&mut self) {
        self.events.push(Event::Deselect);
        if self.selected {
            self.finish_frame();
        }
        self.selected = false;
    }

    fn take_fault(&mut self) -> Result<(), BusFault> {
        if self.fail_next {
            self.fail_next = false;
            return Err(BusFault);
        }
        Ok(())
    }

    fn frame_address(&self) -> usize {
        (self.frame[1] as usize) << 16 | (self.frame[2] as usize) << 8 | self.frame[3] as usize
    }

    fn status(&mut self) -> u8 {
        let wel = if self.wel { 0x02 } else { 0x00 };
        if self.stuck_busy {
            return wel | 0x01;
        }
        if self.pending_busy > 0 {
            self.pending_busy -= 1;
            return wel | 0x01;
        }
        wel
    }

    /// Clocks `mosi` out and returns the byte the chip drives back.
    fn exchange(&mut self, mosi: u8) -> u8 {
        self.events.push(Event::Byte(mosi));
        if !self.selected {
            return 0xFF;
        }
        self.frame.push(mosi);
        let n = self.frame.len();
        if self.powered_down && self.frame[0] != RELEASE_POWER_DOWN {
            return 0x00;
        }
        match self.frame[0] {
            READ_STATUS_1 if n > 1 => self.status(),
            READ_DATA if n > 4 => self.memory[(self.frame_address() + n - 5) % CAPACITY],
            MANUFACTURER_DEVICE_ID if n > 4 => {
                if (n - 5) % 2 == 0 {
                    self.manufacturer_id
                } else {
                    DEVICE_ID
                }
            }
            PAGE_PROGRAM if n > 4 && self.wel => {
                let base = self.frame_address();
                let page_start = base & !(PAGE_SIZE - 1);
                let offset = (base + n - 5) % PAGE_SIZE;
                self.memory[(page_start + offset) % CAPACITY] &= mosi;
                0xFF
            }
            _ => 0xFF,
        }
    }

    fn finish_frame(&mut self) {
        let Some(&opcode) = self.frame.first() else {
            return;
        };
        if self.powered_down {
            if opcode == RELEASE_POWER_DOWN {
                self.powered_down = false;
            }
            return;
        }
        match opcode {
            WRITE_ENABLE => self.wel = true,
            WRITE_DISABLE => self.wel = false,
            PAGE_PROGRAM if self.wel && self.frame.len() > 4 => {
                self.wel = false;
                self.pending_busy = self.busy_reads;
            }
            CHIP_ERASE if self.wel => {
                self.memory.fill(0xFF);
                self.wel = false;
                self.pending_busy = self.busy_reads;
            }
            POWER_DOWN => self.powered_down = true,
            _ => {}
        }
    }
}

pub struct MockBus(Shared);

impl MockBus {
    fn read_words(&mut self, words: &mut [u8]) -> Result<(), BusFault> {
        let mut chip = self.0.borrow_mut();
        chip.take_fault()?;
        for word in words {
            *word = chip.exchange(0x00);
        }
        Ok(())
    }

    fn write_words(&mut self, words: &[u8]) -> Result<(), BusFault> {
        let mut chip = self.0.borrow_mut();
        chip.take_fault()?;
        for &word in words {
            chip.exchange(word);
        }
        Ok(())
    }

    fn transfer_words(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), BusFault> {
        let mut chip = self.0.borrow_mut();
        chip.take_fault()?;
        for i in 0..read.len().max(write.len()) {
            let miso = chip.exchange(write.get(i).copied().unwrap_or(0x00));
            if let Some(word) = read.get_mut(i) {
                *word = miso;
            }
        }
        Ok(())
    }

    fn transfer_words_in_place(&mut self, words: &mut [u8]) -> Result<(), BusFault> {
        let mut chip = self.0.borrow_mut();
        chip.take_fault()?;
        for word in words {
            *word = chip.exchange(*word);
        }
        Ok(())
    }
}

impl spi::ErrorType for MockBus {
    type Error = BusFault;
}

impl spi::SpiBus for MockBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.read_words(words)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.write_words(words)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.transfer_words(read, write)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.transfer_words_in_place(words)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_hal_async::spi::SpiBus for MockBus {
    async fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.read_words(words)
    }

    async fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.write_words(words)
    }

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.transfer_words(read, write)
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.transfer_words_in_place(words)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub struct MockCs(Shared);

impl digital::ErrorType for MockCs {
    type Error = Infallible;
}

impl OutputPin for MockCs {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().select();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().deselect();
        Ok(())
    }
}

/// Async delay that only tallies the time asked for.
pub struct MockDelay(pub Shared);

impl embedded_hal_async::delay::DelayNs for MockDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().slept_ns += u64::from(ns);
    }
}
