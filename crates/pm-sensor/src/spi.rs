//! SPI bus access.
//!
//! [`SpiBus`] is the full-duplex transfer the converter driver needs.
//! [`Spidev`] implements it on Linux through the spidev character device
//! (`/dev/spidevB.C`), configured for SPI mode 0, 8 bits per word, MSB first.

use crate::{SensorError, SensorResult};
use std::path::Path;
use tracing::{debug, info};

/// Full-duplex SPI transfer.
pub trait SpiBus: Send {
    /// Clock `buf` out and overwrite it with the bytes clocked in.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    fn transfer(&mut self, buf: &mut [u8]) -> SensorResult<()>;
}

/// spidev-backed SPI bus.
#[cfg(target_os = "linux")]
pub struct Spidev {
    device: spidev::Spidev,
    clock_hz: u32,
    /// Outgoing copy of the frame; the kernel writes the reply into the
    /// caller's buffer. Grows once to the frame length, then is reused.
    tx: Vec<u8>,
}

/// spidev-backed SPI bus (unavailable on this platform).
#[cfg(not(target_os = "linux"))]
#[derive(Debug)]
pub struct Spidev {
    clock_hz: u32,
}

#[cfg(target_os = "linux")]
impl std::fmt::Debug for Spidev {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spidev")
            .field("clock_hz", &self.clock_hz)
            .finish_non_exhaustive()
    }
}

impl Spidev {
    /// Open and configure a spidev device node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node cannot be opened or configured.
    #[cfg(target_os = "linux")]
    pub fn open(path: &Path, clock_hz: u32) -> SensorResult<Self> {
        use spidev::{SpiModeFlags, SpidevOptions};

        debug!(?path, clock_hz, "Opening spidev device");

        let mut device = spidev::Spidev::open(path).map_err(|e| SensorError::Open {
            path: path.display().to_string(),
            source: e,
        })?;

        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(clock_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        device
            .configure(&options)
            .map_err(|e| SensorError::Configure(e.to_string()))?;

        info!(?path, clock_hz, "SPI bus configured");
        Ok(Self {
            device,
            clock_hz,
            tx: Vec::new(),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open(_path: &Path, _clock_hz: u32) -> SensorResult<Self> {
        Err(SensorError::Unsupported)
    }

    /// Configured bus clock in Hz.
    pub fn clock_hz(&self) -> u32 {
        self.clock_hz
    }
}

#[cfg(target_os = "linux")]
impl SpiBus for Spidev {
    fn transfer(&mut self, buf: &mut [u8]) -> SensorResult<()> {
        use spidev::SpidevTransfer;

        self.tx.clear();
        self.tx.extend_from_slice(buf);

        let mut transfer = SpidevTransfer::read_write(&self.tx, buf);
        self.device
            .transfer(&mut transfer)
            .map_err(|e| SensorError::Transfer(e.to_string()))
    }
}

#[cfg(not(target_os = "linux"))]
impl SpiBus for Spidev {
    fn transfer(&mut self, _buf: &mut [u8]) -> SensorResult<()> {
        Err(SensorError::Unsupported)
    }
}
