//! Register layout of the DS2438 memory pages and the arithmetic to decode them.

/// Data bytes of a page, without the trailing CRC.
pub type PageData = [u8; 8];

/// A page as clocked out of the scratchpad: 8 data bytes and their CRC.
pub const SCRATCHPAD_LEN: usize = 9;

/// Status/Configuration register, page 0 byte 0.
pub mod config {
    /// Current A/D converter enable.
    pub const IAD: u8 = 0x01;
    /// Current accumulator (ICA, CCA, DCA) enable.
    pub const CA: u8 = 0x02;
    /// Shadow the current accumulators to EEPROM.
    pub const EE: u8 = 0x04;
    /// Voltage A/D input select: set for VDD (channel B), clear for VAD (channel A).
    pub const AD: u8 = 0x08;
    /// Temperature conversion busy.
    pub const TB: u8 = 0x10;
    /// Non-volatile memory busy.
    pub const NVB: u8 = 0x20;
    /// A/D converter busy.
    pub const ADB: u8 = 0x40;

    /// Channel A measurement: current ADC and accumulators running, VAD selected.
    pub const CHANNEL_A: u8 = IAD | CA;
    /// Channel B measurement: current ADC and accumulators running, VDD selected.
    pub const CHANNEL_B: u8 = IAD | CA | AD;
    /// Current ADC and accumulators stopped, used while calibrating the offset.
    pub const CURRENT_DISABLED: u8 = EE;
}

/// Byte offsets within page 0.
pub mod status {
    pub const TEMPERATURE_LSB: usize = 1;
    pub const TEMPERATURE_MSB: usize = 2;
    pub const VOLTAGE_LSB: usize = 3;
    pub const VOLTAGE_MSB: usize = 4;
    pub const CURRENT_LSB: usize = 5;
    pub const CURRENT_MSB: usize = 6;
}

/// Byte offsets within page 1.
pub mod counters {
    pub const ICA: usize = 4;
    pub const OFFSET_LSB: usize = 5;
    pub const OFFSET_MSB: usize = 6;
}

/// Byte offsets within page 7.
pub mod accumulators {
    pub const CCA_LSB: usize = 4;
    pub const CCA_MSB: usize = 5;
    pub const DCA_LSB: usize = 6;
    pub const DCA_MSB: usize = 7;
}

/// Largest magnitude accepted by the offset register, exclusive.
pub const OFFSET_LIMIT: i16 = 512;

const TEN_BITS: u16 = 0x3FF;

/// Temperature in units of 1/32 °C.
///
/// ```rust
/// # use ds2438::descriptors::decode_temperature;
/// assert_eq!(decode_temperature(&[0x00, 0x80, 0x01, 0, 0, 0, 0, 0]), 48);
/// assert_eq!(decode_temperature(&[0x00, 0x00, 0xE7, 0, 0, 0, 0, 0]), -800);
/// ```
pub fn decode_temperature(page: &PageData) -> i16 {
    i16::from_le_bytes([
        page[status::TEMPERATURE_LSB],
        page[status::TEMPERATURE_MSB],
    ]) >> 3
}

/// Voltage in units of 10 mV.
///
/// ```rust
/// # use ds2438::descriptors::decode_voltage;
/// assert_eq!(decode_voltage(&[0, 0, 0, 0x64, 0x00, 0, 0, 0]), 100);
/// assert_eq!(decode_voltage(&[0, 0, 0, 0xFF, 0xFF, 0, 0, 0]), 1023);
/// ```
pub fn decode_voltage(page: &PageData) -> u16 {
    u16::from_le_bytes([page[status::VOLTAGE_LSB], page[status::VOLTAGE_MSB]]) & TEN_BITS
}

/// Raw current register value. `sign_mask` selects the bit(s) of byte 6 that mark a
/// negative reading.
pub fn decode_current(page: &PageData, sign_mask: u8) -> i16 {
    let raw = u16::from_le_bytes([page[status::CURRENT_LSB], page[status::CURRENT_MSB]]) & TEN_BITS;

    if page[status::CURRENT_MSB] & sign_mask != 0 {
        raw as i16 - TEN_BITS as i16
    } else {
        raw as i16
    }
}

/// Inverse of [`decode_current`]: returns the (LSB, MSB) register bytes for `current`.
///
/// Every bit of `sign_mask` is set for negative values, so the result only round-trips
/// when `sign_mask` does not overlap the value bits the encoding produces.
pub fn encode_current(current: i16, sign_mask: u8) -> [u8; 2] {
    if current < 0 {
        let [lsb, msb] = ((TEN_BITS as i16 + current) as u16 & TEN_BITS).to_le_bytes();
        [lsb, msb | sign_mask]
    } else {
        (current as u16 & TEN_BITS).to_le_bytes()
    }
}

/// Current offset register bytes (page 1 bytes 5-6) for `offset`, or `None` if the offset
/// does not fit the register.
///
/// The offset is stored in two's complement, shifted past the three unused low bits.
///
/// ```rust
/// # use ds2438::descriptors::encode_offset;
/// assert_eq!(encode_offset(511), Some([0xF8, 0x0F]));
/// assert_eq!(encode_offset(-511), Some([0x08, 0xF0]));
/// assert_eq!(encode_offset(-1), Some([0xF8, 0xFF]));
/// assert_eq!(encode_offset(512), None);
/// ```
pub fn encode_offset(offset: i16) -> Option<[u8; 2]> {
    if offset <= -OFFSET_LIMIT || offset >= OFFSET_LIMIT {
        return None;
    }

    Some(((offset as u16) << 3).to_le_bytes())
}

/// Offset stored in the current offset register.
pub fn decode_offset(page: &PageData) -> i16 {
    i16::from_le_bytes([page[counters::OFFSET_LSB], page[counters::OFFSET_MSB]]) >> 3
}

/// Integrated current accumulator, page 1.
pub fn decode_ica(page: &PageData) -> u8 {
    page[counters::ICA]
}

/// Charging current accumulator, page 7.
pub fn decode_cca(page: &PageData) -> i16 {
    i16::from_le_bytes([page[accumulators::CCA_LSB], page[accumulators::CCA_MSB]])
}

/// Discharging current accumulator, page 7.
pub fn decode_dca(page: &PageData) -> u16 {
    u16::from_le_bytes([page[accumulators::DCA_LSB], page[accumulators::DCA_MSB]])
}
