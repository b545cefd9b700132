//! Async driver. Refer to the Winbond W25Q16 datasheet, section 8
//! (Instructions).

use core::fmt::Debug;

use crate::address::Address;
use crate::comms::{command_bytes, Opcode, State, Status};
use crate::config::Config;
use crate::error::Error;
use crate::traits::AsyncHardwareFlashDevice;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiBus;

/// Async flavour of [`crate::FlashSpi`]. Busy polls can be paced with
/// [`Config::poll_interval_us`] so that long erases yield to the executor.
pub struct AsyncFlashSpi<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
    config: Config,
    state: State,
}

impl<SPI, CS, D> Debug for AsyncFlashSpi<SPI, CS, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncFlashSpi")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl<SPI, CS, D> AsyncHardwareFlashDevice for AsyncFlashSpi<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = Error<SPI, CS>;

    /// From datasheet section 8.2.6 (Read Data (03h))
    /// Reads flash contents into `buf`, starting at `addr`, as one read
    /// stream. Only the low 24 bits of `addr` reach the chip.
    async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        if buf.is_empty() {
            return Ok(());
        }
        let addr = Address::from_linear(addr);
        self.init_stream_read(addr.page, addr.offset).await?;
        buf.fill(0);
        let result = self.spi.transfer_in_place(buf).await.map_err(Error::Spi);
        let closed = self.close_stream_read().await;
        result?;
        closed
    }

    async fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        let mut addr = Address::from_linear(addr);
        let mut data = data;
        while !data.is_empty() {
            let (chunk, rest) = data.split_at(data.len().min(addr.remaining_in_page()));
            self.init_stream_write(addr.page, addr.offset).await?;
            let result = self.spi.write(chunk).await.map_err(Error::Spi);
            let closed = self.close_stream_write().await;
            result?;
            closed?;
            addr = Address::from_linear(addr.linear() + chunk.len() as u32);
            data = rest;
        }
        Ok(())
    }

    async fn chip_erase(&mut self) -> Result<(), Error<SPI, CS>> {
        AsyncFlashSpi::chip_erase(self).await
    }
}

impl<SPI, CS, D> AsyncFlashSpi<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    pub async fn init(spi: SPI, cs: CS, delay: D, config: Config) -> Result<Self, Error<SPI, CS>> {
        let mut this = Self {
            spi,
            cs,
            delay,
            config,
            state: State::Idle,
        };
        this.cs.set_high().map_err(Error::Pin)?;
        this.release_power_down().await?;
        this.write_disable().await?;
        debug!("Flash initialised: {}", this.config);
        Ok(this)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }

    pub async fn read_byte(&mut self, page: u16, offset: u8) -> Result<u8, Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        let cmd = command_bytes(Opcode::Read, Address::new(page, offset));
        let value = self.command_with_response(&cmd).await?;
        self.wait_done().await?;
        Ok(value)
    }

    pub async fn write_byte(
        &mut self,
        page: u16,
        offset: u8,
        value: u8,
    ) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.write_enable().await?;
        let [opcode, high, mid, low] = command_bytes(Opcode::PageProg, Address::new(page, offset));
        self.command(&[opcode, high, mid, low, value]).await?;
        self.wait_done().await?;
        self.write_disable().await
    }

    pub async fn init_stream_write(&mut self, page: u16, offset: u8) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.write_enable().await?;
        self.open_stream(Opcode::PageProg, Address::new(page, offset))
            .await?;
        self.state = State::StreamWriteOpen;
        trace!("Write stream opened at page {} offset {}", page, offset);
        Ok(())
    }

    pub async fn stream_write(&mut self, value: u8) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::StreamWriteOpen)?;
        self.spi.write(&[value]).await.map_err(Error::Spi)
    }

    pub async fn close_stream_write(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::StreamWriteOpen)?;
        self.state = State::Idle;
        self.deselect().await?;
        trace!("Write stream closed");
        self.wait_done().await?;
        self.write_disable().await
    }

    pub async fn init_stream_read(&mut self, page: u16, offset: u8) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.open_stream(Opcode::Read, Address::new(page, offset))
            .await?;
        self.state = State::StreamReadOpen;
        trace!("Read stream opened at page {} offset {}", page, offset);
        Ok(())
    }

    pub async fn stream_read(&mut self) -> Result<u8, Error<SPI, CS>> {
        self.expect_state(State::StreamReadOpen)?;
        self.exchange(0).await
    }

    pub async fn close_stream_read(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::StreamReadOpen)?;
        self.state = State::Idle;
        self.deselect().await?;
        trace!("Read stream closed");
        self.wait_done().await
    }

    pub async fn power_down(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.command(&[Opcode::PowerDown as u8]).await?;
        self.wait_done().await
    }

    pub async fn release_power_down(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.command(&[Opcode::ReleasePowerDown as u8]).await?;
        self.wait_done().await
    }

    /// Chip Erase (see datasheet 8.2.18). Set [`Config::poll_interval_us`]
    /// to avoid hammering the bus for the seconds this takes.
    pub async fn chip_erase(&mut self) -> Result<(), Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        self.write_enable().await?;
        self.command(&[Opcode::ChipErase as u8]).await?;
        self.wait_done().await?;
        self.write_disable().await
    }

    pub async fn manufacturer_id(&mut self) -> Result<u8, Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        let id = self
            .command_with_response(&[Opcode::ReadMfDId as u8, 0, 0, 0])
            .await?;
        self.wait_done().await?;
        Ok(id)
    }

    /// Reads the status register.
    pub async fn read_status(&mut self) -> Result<Status, Error<SPI, CS>> {
        self.expect_state(State::Idle)?;
        let bits = self
            .command_with_response(&[Opcode::ReadStatus as u8])
            .await?;
        Ok(Status::from_bits_truncate(bits))
    }

    pub async fn is_busy(&mut self) -> Result<bool, Error<SPI, CS>> {
        Ok(self.read_status().await?.contains(Status::BUSY))
    }

    pub async fn is_wel(&mut self) -> Result<bool, Error<SPI, CS>> {
        Ok(self.read_status().await?.contains(Status::WEL))
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

    async fn deselect(&mut self) -> Result<(), Error<SPI, CS>> {
        let flushed = self.spi.flush().await.map_err(Error::Spi);
        self.cs.set_high().map_err(Error::Pin)?;
        flushed
    }

    /// Deasserts chip-select after a framed transfer, keeping the transfer's
    /// error over any error from deasserting.
    async fn finish<T>(&mut self, result: Result<T, Error<SPI, CS>>) -> Result<T, Error<SPI, CS>> {
        let released = self.deselect().await;
        let value = result?;
        released?;
        Ok(value)
    }

    async fn open_stream(&mut self, opcode: Opcode, addr: Address) -> Result<(), Error<SPI, CS>> {
        self.select()?;
        if let Err(err) = self.spi.write(&command_bytes(opcode, addr)).await {
            let _ = self.deselect().await;
            return Err(Error::Spi(err));
        }
        Ok(())
    }

    async fn exchange(&mut self, byte: u8) -> Result<u8, Error<SPI, CS>> {
        let mut buf = [byte];
        self.spi
            .transfer_in_place(&mut buf)
            .await
            .map_err(Error::Spi)?;
        Ok(buf[0])
    }

    /// Writes a command to the SPI bus
    async fn command(&mut self, bytes: &[u8]) -> Result<(), Error<SPI, CS>> {
        self.select()?;
        let result = self.spi.write(bytes).await.map_err(Error::Spi);
        self.finish(result).await
    }

    async fn command_with_response(&mut self, instruction: &[u8]) -> Result<u8, Error<SPI, CS>> {
        self.select()?;
        let result = match self.spi.write(instruction).await {
            Ok(()) => self.exchange(0).await,
            Err(err) => Err(Error::Spi(err)),
        };
        self.finish(result).await
    }

    /// Block until the status of the device is not busy
    async fn wait_done(&mut self) -> Result<(), Error<SPI, CS>> {
        self.select()?;
        let result = self.poll_status().await;
        self.finish(result).await
    }

    async fn poll_status(&mut self) -> Result<(), Error<SPI, CS>> {
        self.spi
            .write(&[Opcode::ReadStatus as u8])
            .await
            .map_err(Error::Spi)?;
        let mut polls: u32 = 0;
        while Status::from_bits_truncate(self.exchange(0).await?).contains(Status::BUSY) {
            polls += 1;
            if self.config.poll_limit_reached(polls) {
                warn!("Flash still busy after {} status reads", polls);
                return Err(Error::Timeout);
            }
            if self.config.poll_interval_us > 0 {
                self.delay.delay_us(self.config.poll_interval_us).await;
            }
        }
        Ok(())
    }

    /// From datasheet section 8.2.1
    /// The Write Enable instruction sets the Write Enable Latch (WEL) bit
    /// in the Status Register to a 1.
    async fn write_enable(&mut self) -> Result<(), Error<SPI, CS>> {
        self.command(&[Opcode::WriteEnable as u8]).await?;
        self.wait_done().await
    }

    async fn write_disable(&mut self) -> Result<(), Error<SPI, CS>> {
        self.command(&[Opcode::WriteDisable as u8]).await?;
        self.wait_done().await
    }
}
