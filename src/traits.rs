pub trait HardwareFlashDevice {
    type Error;

    /// Reads flash contents into `buf`, starting at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Programs `data` starting at `addr` into previously erased (FFh)
    /// locations. Data running past the end of a page continues at the start
    /// of the next page.
    fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// The Chip Erase instruction sets all memory within the device to the
    /// erased state of all 1s (FFh).
    fn chip_erase(&mut self) -> Result<(), Self::Error>;
}

#[allow(async_fn_in_trait)]
pub trait AsyncHardwareFlashDevice {
    type Error;

    /// Reads flash contents into `buf`, starting at `addr`.
    async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// See [`HardwareFlashDevice::page_program`].
    async fn page_program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Erases the whole device to FFh.
    async fn chip_erase(&mut self) -> Result<(), Self::Error>;
}
