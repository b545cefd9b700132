/// Per-instance driver settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Give up with [`Error::Timeout`](crate::Error::Timeout) after this many
    /// consecutive busy status reads. `None` polls until the chip answers,
    /// which blocks forever if it never does.
    pub busy_poll_limit: Option<u32>,
    /// Microseconds to wait between busy status reads. Only the async driver
    /// honours this; the blocking driver spins.
    pub poll_interval_us: u32,
}

impl Config {
    pub const fn with_busy_poll_limit(mut self, limit: u32) -> Self {
        self.busy_poll_limit = Some(limit);
        self
    }

    pub const fn with_poll_interval_us(mut self, us: u32) -> Self {
        self.poll_interval_us = us;
        self
    }

    /// True once `polls` busy reads have used up the limit.
    pub(crate) fn poll_limit_reached(&self, polls: u32) -> bool {
        matches!(self.busy_poll_limit, Some(limit) if polls >= limit)
    }
}
