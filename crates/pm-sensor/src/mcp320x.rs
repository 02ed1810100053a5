//! MCP3204/MCP3208 12-bit converter protocol.
//!
//! A conversion is one 3-byte full-duplex SPI transaction. The first byte
//! carries the start bit, the single-ended/differential bit and the three
//! channel bits; the converter answers with a null bit followed by the
//! 12-bit result, most significant bit first.
//!
//! ```text
//! tx:  1 S D2 D1 D0 x  x  x | x x x x x x x x | x x x x x x x x
//! rx:  ? ?  ?  ?  ?  ? 0 B11|B10 ......... B3 | B2 B1 B0 ? ? ? ? ?
//! ```

use crate::spi::SpiBus;
use crate::{ChannelId, InputMode, Sensor, SensorResult};
use pm_common::record::Reading;
use tracing::debug;

/// Start bit, first bit clocked out after chip select.
const START_BIT: u8 = 0x80;

/// Single-ended mode bit. Cleared for differential conversions.
const SGL_BIT: u8 = 0x40;

/// Bit offset of the three channel select bits in the command byte.
const CHANNEL_SHIFT: u8 = 3;

/// Bytes per conversion transaction.
pub const TRANSFER_LEN: usize = 3;

/// Build the transmit frame for one conversion.
#[must_use]
pub fn encode_command(channel: ChannelId, mode: InputMode) -> [u8; TRANSFER_LEN] {
    let mode_bit = match mode {
        InputMode::SingleEnded => SGL_BIT,
        InputMode::Differential => 0,
    };
    [START_BIT | mode_bit | (channel.get() << CHANNEL_SHIFT), 0, 0]
}

/// Extract the 12-bit result from the receive frame.
#[must_use]
pub fn decode_reading(rx: [u8; TRANSFER_LEN]) -> Reading {
    let raw = (u16::from(rx[0] & 0x01) << 11)
        | (u16::from(rx[1]) << 3)
        | (u16::from(rx[2] & 0xE0) >> 5);
    Reading::from_masked(raw)
}

/// MCP3204/3208 converter on an SPI bus.
#[derive(Debug)]
pub struct Mcp320x<B: SpiBus> {
    bus: B,
    mode: InputMode,
}

impl<B: SpiBus> Mcp320x<B> {
    /// Create a converter driver in single-ended mode.
    pub fn new(bus: B) -> Self {
        Self::with_mode(bus, InputMode::SingleEnded)
    }

    /// Create a converter driver with an explicit input mode.
    pub fn with_mode(bus: B, mode: InputMode) -> Self {
        debug!(?mode, "MCP320x converter attached");
        Self { bus, mode }
    }

    /// Input mode used for every conversion.
    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Release the underlying bus.
    pub fn into_inner(self) -> B {
        self.bus
    }
}

impl<B: SpiBus> Sensor for Mcp320x<B> {
    fn read_channel(&mut self, channel: ChannelId) -> SensorResult<Reading> {
        let mut frame = encode_command(channel, self.mode);
        self.bus.transfer(&mut frame)?;
        Ok(decode_reading(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SensorError;

    /// Bus that records the command and answers with a fixed value.
    struct LoopbackBus {
        answer: u16,
        last_command: Option<[u8; TRANSFER_LEN]>,
        fail: bool,
    }

    impl SpiBus for LoopbackBus {
        fn transfer(&mut self, buf: &mut [u8]) -> SensorResult<()> {
            if self.fail {
                return Err(SensorError::Transfer("bus fault".into()));
            }
            self.last_command = Some([buf[0], buf[1], buf[2]]);
            buf[0] = ((self.answer >> 11) & 0x01) as u8;
            buf[1] = ((self.answer >> 3) & 0xFF) as u8;
            buf[2] = ((self.answer & 0x07) << 5) as u8;
            Ok(())
        }
    }

    #[test]
    fn test_encode_single_ended() {
        let ch0 = ChannelId::new(0).unwrap();
        let ch5 = ChannelId::new(5).unwrap();
        let ch7 = ChannelId::new(7).unwrap();

        assert_eq!(encode_command(ch0, InputMode::SingleEnded), [0xC0, 0, 0]);
        assert_eq!(encode_command(ch5, InputMode::SingleEnded), [0xE8, 0, 0]);
        assert_eq!(encode_command(ch7, InputMode::SingleEnded), [0xF8, 0, 0]);
    }

    #[test]
    fn test_encode_differential_clears_sgl_bit() {
        let ch1 = ChannelId::new(1).unwrap();
        assert_eq!(encode_command(ch1, InputMode::Differential), [0x88, 0, 0]);
    }

    #[test]
    fn test_decode_reading() {
        assert_eq!(decode_reading([0x00, 0x00, 0x00]).get(), 0);
        assert_eq!(decode_reading([0x01, 0xFF, 0xE0]).get(), 4095);
        // Only bit 0 of the first byte and the top three of the last belong to the result
        assert_eq!(decode_reading([0xFE, 0x00, 0x1F]).get(), 0);
        // 0x800 -> MSB only
        assert_eq!(decode_reading([0x01, 0x00, 0x00]).get(), 2048);
        // 0x123 = 0b0001_0010_0011
        assert_eq!(decode_reading([0x00, 0x24, 0x60]).get(), 0x123);
    }

    #[test]
    fn test_read_channel_over_bus() {
        let bus = LoopbackBus {
            answer: 3001,
            last_command: None,
            fail: false,
        };
        let mut adc = Mcp320x::new(bus);

        let ch3 = ChannelId::new(3).unwrap();
        assert_eq!(adc.read_channel(ch3).unwrap().get(), 3001);

        let bus = adc.into_inner();
        assert_eq!(bus.last_command, Some([0xD8, 0, 0]));
    }

    #[test]
    fn test_read_channel_propagates_bus_error() {
        let bus = LoopbackBus {
            answer: 0,
            last_command: None,
            fail: true,
        };
        let mut adc = Mcp320x::new(bus);
        let ch0 = ChannelId::new(0).unwrap();
        assert!(matches!(
            adc.read_channel(ch0),
            Err(SensorError::Transfer(_))
        ));
    }
}
