use core::fmt::{self, Debug};
use embedded_hal::{digital, spi};

use crate::comms::State;

/// The error type used by this library.
///
/// This can encapsulate an SPI or chip-select error, and adds its own protocol
/// errors on top of that.
pub enum Error<SPI: spi::ErrorType, CS: digital::ErrorType> {
    /// An SPI transfer failed.
    Spi(SPI::Error),
    /// Driving the chip-select line failed.
    Pin(CS::Error),
    /// The busy flag stayed set for the whole configured poll budget.
    Timeout,
    /// The call is not allowed while the driver is in this stream state.
    Protocol(State),
}

#[cfg(feature = "defmt")]
impl<SPI: spi::ErrorType, CS: digital::ErrorType> defmt::Format for Error<SPI, CS> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::Spi(_spi) => defmt::write!(fmt, "Error::Spi"),
            Error::Pin(_pin) => defmt::write!(fmt, "Error::Pin"),
            Error::Timeout => defmt::write!(fmt, "Error::Timeout"),
            Error::Protocol(state) => defmt::write!(fmt, "Error::Protocol({})", state),
        }
    }
}

impl<SPI: spi::ErrorType, CS: digital::ErrorType> Debug for Error<SPI, CS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::Pin(pin) => write!(f, "Error::Pin({:?})", pin),
            Error::Timeout => write!(f, "Error::Timeout"),
            Error::Protocol(state) => write!(f, "Error::Protocol({:?})", state),
        }
    }
}

impl<SPI: spi::ErrorType, CS: digital::ErrorType> PartialEq for Error<SPI, CS>
where
    SPI::Error: PartialEq,
    CS::Error: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Spi(a), Error::Spi(b)) => a == b,
            (Error::Pin(a), Error::Pin(b)) => a == b,
            (Error::Timeout, Error::Timeout) => true,
            (Error::Protocol(a), Error::Protocol(b)) => a == b,
            _ => false,
        }
    }
}
