use crc::{Crc, CRC_8_MAXIM_DOW};

use crate::{
    descriptors::{PageData, SCRATCHPAD_LEN},
    diagnostics::Diagnostics,
};

const CRC_ONEWIRE: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// The 64-bit ROM code of a device on the bus: family code, 48-bit serial and CRC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceId(pub [u8; 8]);

impl DeviceId {
    pub const fn new(rom: [u8; 8]) -> Self {
        Self(rom)
    }

    pub const fn family_code(&self) -> u8 {
        self.0[0]
    }

    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl From<[u8; 8]> for DeviceId {
    fn from(rom: [u8; 8]) -> Self {
        Self(rom)
    }
}

/// Byte-level access to a 1-Wire bus master.
///
/// Every call is synchronous. The driver assumes it has the bus to itself for the duration
/// of one [`Ds2438::update`](crate::Ds2438::update) call.
pub trait OneWire {
    type Error;

    /// Issues a reset pulse. Returns `true` if any device answered with a presence pulse.
    fn reset(&mut self) -> Result<bool, Self::Error>;

    /// Addresses a single device (Match ROM) for the commands that follow.
    fn select(&mut self, id: &DeviceId) -> Result<(), Self::Error>;

    /// Restarts device enumeration from the beginning.
    fn reset_search(&mut self);

    /// Returns the next enumerated device, or `None` once every device has been reported.
    fn search(&mut self) -> Result<Option<DeviceId>, Self::Error>;

    /// Writes a byte. With `hold_power` set the bus is left driven high afterwards, so a
    /// device can draw its conversion current from the data line.
    fn write_byte_with_power(&mut self, byte: u8, hold_power: bool) -> Result<(), Self::Error>;

    fn read_byte(&mut self) -> Result<u8, Self::Error>;

    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.write_byte_with_power(byte, false)
    }

    /// Dallas/Maxim CRC-8 (x^8 + x^5 + x^4 + 1).
    fn crc8(&self, data: &[u8]) -> u8 {
        CRC_ONEWIRE.checksum(data)
    }
}

/// Function commands understood by the DS2438.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    ConvertT = 0x44,
    ConvertV = 0xB4,
    WriteScratchpad = 0x4E,
    CopyScratchpad = 0x48,
    ReadScratchpad = 0xBE,
    RecallMemory = 0xB8,
}

impl Command {
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    /// Memory commands are followed by a page number.
    pub const fn takes_page(self) -> bool {
        !matches!(self, Self::ConvertT | Self::ConvertV)
    }

    pub const fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x44 => Some(Self::ConvertT),
            0xB4 => Some(Self::ConvertV),
            0x4E => Some(Self::WriteScratchpad),
            0x48 => Some(Self::CopyScratchpad),
            0xBE => Some(Self::ReadScratchpad),
            0xB8 => Some(Self::RecallMemory),
            _ => None,
        }
    }
}

/// Memory pages of the DS2438. Only the pages the driver touches are named.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Page {
    /// Status/configuration, temperature, voltage, current and threshold registers.
    Status = 0,
    /// Elapsed time meter, ICA and current offset registers.
    Counters = 1,
    /// CCA and DCA accumulators.
    Accumulators = 7,
}

impl Page {
    pub const fn number(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageError<E> {
    Bus(E),
    /// The received checksum byte does not match the data.
    Checksum { computed: u8, received: u8 },
    /// The byte read back is not what was written.
    Verify { written: u8, read: u8 },
}

impl<E> From<E> for PageError<E> {
    fn from(error: E) -> Self {
        Self::Bus(error)
    }
}

/// Scratchpad protocol of one addressed DS2438.
pub struct Ds2438Interface<B, D> {
    pub bus: B,
    pub id: DeviceId,
    pub diagnostics: D,
}

impl<B, D> Ds2438Interface<B, D>
where
    B: OneWire,
    D: Diagnostics,
{
    fn address(&mut self) -> Result<(), B::Error> {
        self.bus.reset()?;
        self.bus.select(&self.id)
    }

    fn command(&mut self, command: Command, page: Page) -> Result<(), B::Error> {
        self.address()?;
        self.bus.write_byte(command.opcode())?;
        self.bus.write_byte(page.number())
    }

    fn read_scratchpad(&mut self, page: Page) -> Result<PageData, PageError<B::Error>> {
        self.command(Command::ReadScratchpad, page)?;

        let mut raw = [0; SCRATCHPAD_LEN];
        for byte in raw.iter_mut() {
            *byte = self.bus.read_byte()?;
        }

        let computed = self.bus.crc8(&raw[..8]);
        let valid = computed == raw[8];

        trace!("Page {} dump: {:?}", page.number(), raw);
        self.diagnostics.page_read(page, &raw, valid);

        if !valid {
            return Err(PageError::Checksum {
                computed,
                received: raw[8],
            });
        }

        let mut data = [0; 8];
        data.copy_from_slice(&raw[..8]);
        Ok(data)
    }

    /// Recalls `page` from memory into its scratchpad and reads it out.
    pub fn read_page(&mut self, page: Page) -> Result<PageData, PageError<B::Error>> {
        self.command(Command::RecallMemory, page)?;
        self.read_scratchpad(page)
    }

    /// Writes all 8 bytes of `page` and commits them. The write is not read back.
    pub fn write_page(&mut self, page: Page, data: &PageData) -> Result<(), B::Error> {
        self.command(Command::WriteScratchpad, page)?;
        for byte in data {
            self.bus.write_byte(*byte)?;
        }
        self.command(Command::CopyScratchpad, page)?;

        trace!("Wrote page {}: {:?}", page.number(), data);
        self.diagnostics.page_written(page, data);

        Ok(())
    }

    /// Writes the Status/Configuration byte, checks the scratchpad copy, then commits it.
    pub fn write_configuration(&mut self, config: u8) -> Result<(), PageError<B::Error>> {
        self.command(Command::WriteScratchpad, Page::Status)?;
        self.bus.write_byte(config)?;

        let readback = self.read_scratchpad(Page::Status)?;
        if readback[0] != config {
            warn!(
                "Configuration not written: wrote {}, read {}",
                config, readback[0]
            );
            return Err(PageError::Verify {
                written: config,
                read: readback[0],
            });
        }

        self.command(Command::CopyScratchpad, Page::Status)?;
        self.diagnostics.page_written(Page::Status, &readback);

        Ok(())
    }

    /// Starts an A/D conversion of the selected voltage input, preceded by a temperature
    /// conversion if requested.
    pub fn start_conversion(&mut self, temperature: bool) -> Result<(), B::Error> {
        if temperature {
            self.address()?;
            self.bus.write_byte_with_power(Command::ConvertT.opcode(), true)?;
        }
        self.address()?;
        self.bus.write_byte_with_power(Command::ConvertV.opcode(), true)
    }

    /// Enumerates the bus and reports whether the bound device is present.
    pub fn is_present(&mut self) -> Result<bool, B::Error> {
        self.bus.reset_search();
        while let Some(id) = self.bus.search()? {
            if id == self.id {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
