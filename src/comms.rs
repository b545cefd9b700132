//! Blocking driver. Refer to the Winbond W25Q16 datasheet, section 8
//! (Instructions).

use crate::address::Address;
use crate::config::Config;
use crate::error::Error;
use crate::traits::HardwareFlashDevice;
use core::fmt::Debug;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

pub struct FlashSpi<SPI, CS> {
    spi: SPI,
    cs: CS,
    config: Config,
    state: State,
}

impl<SPI, CS> Debug for FlashSpi<SPI, CS> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FlashSpi")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Clone, Copy)]
#[repr(u8)]
pub(crate) enum Opcode {
    /// Set the write enable latch.
    WriteEnable = 0x06,
    /// Clear the write enable latch.
    WriteDisable = 0x04,
    PageProg = 0x02,
    /// Read status register 1.
    ReadStatus = 0x05,
    Read = 0x03,
    ChipErase = 0xC7,
    PowerDown = 0xB9,
    ReleasePowerDown = 0xAB,
    /// Read the 8-bit manufacturer and device IDs.
    ReadMfDId = 0x90,
}

bitflags::bitflags! {
    /// Status register 1 bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Erase, program or power transition in progress.
        const BUSY = 1 << 0;
        /// Status of the **W**rite **E**nable **L**atch.
        const WEL = 1 << 1;
        /// The 3 block protection bits.
        const PROT = 0b0001_1100;
        /// Top/bottom protect.
        const TB = 1 << 5;
        /// Sector/block protect.
        const SEC = 1 << 6;
        /// **S**tatus **R**egister **W**rite **D**isable bit.
        const SRWD = 1 << 7;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Status {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Status({=u8:#010b})", self.bits())
    }
}

/// Which kind of stream, if any, currently holds chip-select low.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    #[default]
    Idle,
    StreamReadOpen,
    StreamWriteOpen,
}

/// Opcode followed by the 24-bit address, most significant byte first.
pub(crate) fn command_bytes(opcode: Opcode, addr: Address) -> [u8; 4] {
    let [high, mid, low] = addr.to_bytes();
    [opcode as u8, high, mid, low]
}

impl<SPI, CS> FlashSpi<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    /// Takes ownership of the bus and chip-select line, deasserts
    /// chip-select, then wakes the chip from power-down and clears its write
    /// enable latch.
    ///
    /// The bus must already be configured for [`crate::MODE`]. An absent chip
    /// is not detected here; use [`FlashSpi::manufacturer_id`] for that.
    pub fn init(spi: SPI, cs: CS, config: Config) -> Result<Self, Error<SPI, CS>> {
        let mut this = Self {
            spi,
            cs,
            config,
            state: State::Idle,
        };
        this.cs.set_high().map_err(Error::Pin)?;
        this.release_power_down()?;
        this.write_disable()?;
        debug!("Flash initialised: {}", this.config);
        Ok(this)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gives back the bus and chip-select line. An open stream is abandoned
    /// with chip-select still asserted.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    /// Reads one byte at `page`/`offset`.
    pub fn read_byte(&mut self, page: u16, offset: u8) -> Result<u8, Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        let cmd = command_bytes(Opcode::Read, Address::new(page, offset));
        let value = self.command_with_response(&cmd)?;
        self.wait_done()?;
        Ok(value)
    }

    /// Programs one byte at `page`/`offset`.
    ///
    /// Programming only clears bits, so the byte should have been erased
    /// (FFh) since it was last written.
    pub fn write_byte(&mut self, page: u16, offset: u8, value: u8) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.write_enable()?;
        let [opcode, high, mid, low] = command_bytes(Opcode::PageProg, Address::new(page, offset));
        self.command(&[opcode, high, mid, low, value])?;
        self.wait_done()?;
        self.write_disable()
    }

    /// Starts a page program at `page`/`offset` and leaves chip-select
    /// asserted for [`FlashSpi::stream_write`].
    ///
    /// The chip does not advance to the next page: bytes past offset 255 wrap
    /// to the start of the same page.
    pub fn init_stream_write(&mut self, page: u16, offset: u8) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.write_enable()?;
        self.open_stream(Opcode::PageProg, Address::new(page, offset))?;
        self.state = State::StreamWriteOpen;
        trace!("Write stream opened at page {} offset {}", page, offset);
        Ok(())
    }

    pub fn stream_write(&mut self, value: u8) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::StreamWriteOpen)?;
        self.spi.write(&[value]).map_err(Error::Spi)
    }

    /// Ends the write stream, waits for the program cycle and clears the
    /// write enable latch.
    pub fn close_stream_write(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::StreamWriteOpen)?;
        self.state = State::Idle;
        self.deselect()?;
        trace!("Write stream closed");
        self.wait_done()?;
        self.write_disable()
    }

    /// Starts a read at `page`/`offset` and leaves chip-select asserted for
    /// [`FlashSpi::stream_read`]. Reads run on across page boundaries.
    pub fn init_stream_read(&mut self, page: u16, offset: u8) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.open_stream(Opcode::Read, Address::new(page, offset))?;
        self.state = State::StreamReadOpen;
        trace!("Read stream opened at page {} offset {}", page, offset);
        Ok(())
    }

    pub fn stream_read(&mut self) -> Result<u8, Error<SPI, CS>> {
        self.expect_state(State::StreamReadOpen)?;
        self.exchange(0)
    }

    pub fn close_stream_read(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::StreamReadOpen)?;
        self.state = State::Idle;
        self.deselect()?;
        trace!("Read stream closed");
        self.wait_done()
    }

    /// Puts the chip into its low power mode. Only
    /// [`FlashSpi::release_power_down`] is serviced until it is woken.
    pub fn power_down(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.command(&[Opcode::PowerDown as u8])?;
        self.wait_done()
    }

    pub fn release_power_down(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.command(&[Opcode::ReleasePowerDown as u8])?;
        self.wait_done()
    }

    /// Chip Erase (see datasheet 8.2.18)
    /// The Chip Erase instruction sets all memory within the device to the erased
    /// state of all 1s (FFh). A Write Enable instruction must be executed before
    /// the device will accept the Chip Erase Instruction (Status Register bit WEL
    /// must equal 1). The erase takes seconds rather than milliseconds, all of
    /// which is spent in the busy poll.
    pub fn chip_erase(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.write_enable()?;
        self.command(&[Opcode::ChipErase as u8])?;
        self.wait_done()?;
        self.write_disable()
    }

    /// Reads the manufacturer ID, [`crate::MANUFACTURER_ID`] for a Winbond part.
    pub fn manufacturer_id(&mut self) -> Result<u8, Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        let id = self.command_with_response(&[Opcode::ReadMfDId as u8, 0, 0, 0])?;
        self.wait_done()?;
        Ok(id)
    }

    /// Reads the status register.
    pub fn read_status(&mut self) -> Result<Status, Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        let bits = self.command_with_response(&[Opcode::ReadStatus as u8])?;
        Ok(Status::from_bits_truncate(bits))
    }

    pub fn is_busy(&mut self) -> Result<bool, Error<SPI, CS>> {
        Ok(self.read_status()?.contains(Status::BUSY))
    }

    pub fn is_wel(&mut self) -> Result<bool, Error<SPI, CS>> {
        Ok(self.read_status()?.contains(Status::WEL))
    }

    fn expect_state(&self, expected: State) -> Result<(), Error<SPI, CS>> {
        if self.state == expected {
            return Ok(());
        }
        warn!("Expected flash state {}, found {}", expected, self.state);
        Err(Error::Protocol(self.state))
    }

    fn select(&mut self) -> Result<(), Error<SPI, CS>> {
        self.cs.set_low().map_err(Error::Pin)
    }

    /// Flushes the bus before raising chip-select. Chip-select is raised even
    /// when the flush fails.
    fn deselect(&mut self) -> Result<(), Error<SPI, CS>> {
        let flushed = self.spi.flush().map_err(Error::Spi);
        self.cs.set_high().map_err(Error::Pin)?;
        flushed
    }

    /// Runs `f` with chip-select asserted and always deasserts afterwards.
    fn framed<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Error<SPI, CS>>,
    ) -> Result<T, Error<SPI, CS>> {
        self.select()?;
        let result = f(self);
        let released = self.deselect();
        let value = result?;
        released?;
        Ok(value)
    }

    /// Asserts chip-select and sends `opcode` and `addr`, leaving chip-select
    /// asserted only on success.
    fn open_stream(&mut self, opcode: Opcode, addr: Address) -> Result<(), Error<SPI, CS>> {
        self.select()?;
        if let Err(err) = self.spi.write(&command_bytes(opcode, addr)) {
            let _ = self.deselect();
            return Err(Error::Spi(err));
        }
        Ok(())
    }

    /// Clocks out `byte` and returns the byte clocked in.
    fn exchange(&mut self, byte: u8) -> Result<u8, Error<SPI, CS>> {
        let mut buf = [byte];
        self.spi.transfer_in_place(&mut buf).map_err(Error::Spi)?;
        Ok(buf[0])
    }

    /// Writes a command to the SPI bus
    fn command(&mut self, bytes: &[u8]) -> Result<(), Error<SPI, CS>> {
        self.framed(|this| this.spi.write(bytes).map_err(Error::Spi))
    }

    /// Writes a command, then clocks one dummy byte to fetch the response.
    fn command_with_response(&mut self, instruction: &[u8]) -> Result<u8, Error<SPI, CS>> {
        self.framed(|this| {
            this.spi.write(instruction).map_err(Error::Spi)?;
            this.exchange(0)
        })
    }

    /// Block until the status of the device is not busy.
    ///
    /// Status register 1 is read continuously within a single chip-select
    /// cycle. Without a configured poll limit this never returns if the chip
    /// stays busy.
    fn wait_done(&mut self) -> Result<(), Error<SPI, CS>> {
        self.framed(|this| {
            this.spi
                .write(&[Opcode::ReadStatus as u8])
                .map_err(Error::Spi)?;
            let mut polls: u32 = 0;
            while Status::from_bits_truncate(this.exchange(0)?).contains(Status::BUSY) {
                polls += 1;
                if this.config.poll_limit_reached(polls) {
                    warn!("Flash still busy after {} status reads", polls);
                    return Err(Error::Timeout);
                }
            }
            Ok(())
        })
    }

    /// From datasheet section 8.2.1
    /// The Write Enable instruction sets the Write Enable Latch (WEL) bit
    /// in the Status Register to a 1. The WEL bit must be set prior to every Page Program,
    /// Sector Erase, Block Erase, Chip Erase and Write Status Register instruction.
    fn write_enable(&mut self) -> Result<(), Error<SPI, CS>> {
        self.command(&[Opcode::WriteEnable as u8])?;
        self.wait_done()
    }

    /// The chip clears WEL itself once a program or erase completes; this
    /// clears it regardless.
    fn write_disable(&mut self) -> Result<(), Error<SPI, CS>> {
        self.command(&[Opcode::WriteDisable as u8])?;
        self.wait_done()
    }
}

impl<SPI, CS> HardwareFlashDevice for FlashSpi<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    type Error = Error<SPI, CS>;

    /// From datasheet section 8.2.6 (Read Data (03h))
    /// Reads flash contents into `buf`, starting at `addr`, as one read
    /// stream. Only the low 24 bits of `addr` reach the chip.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        if buf.is_empty() {
            return Ok(());
        }
        let addr = Address::from_linear(addr);
        self.init_stream_read(addr.page, addr.offset)?;
        buf.fill(0);
        let result = self.spi.transfer_in_place(buf).map_err(Error::Spi);
        let closed = self.close_stream_read();
        result?;
        closed
    }

    /// Programs `data` one page program cycle per page it touches, so that
    /// nothing wraps within a page.
    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        let mut addr = Address::from_linear(addr);
        let mut data = data;
        while !data.is_empty() {
            let (chunk, rest) = data.split_at(data.len().min(addr.remaining_in_page()));
            self.init_stream_write(addr.page, addr.offset)?;
            let result = self.spi.write(chunk).map_err(Error::Spi);
            let closed = self.close_stream_write();
            result?;
            closed?;
            addr = Address::from_linear(addr.linear() + chunk.len() as u32);
            data = rest;
        }
        Ok(())
    }

    fn chip_erase(&mut self) -> Result<(), Error<SPI, CS>> {
        FlashSpi::chip_erase(self)
    }
}
