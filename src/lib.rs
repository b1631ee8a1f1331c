#![no_std]

//! Driver for the DS2438 Smart Battery Monitor on a 1-Wire bus.
//!
//! The driver measures temperature, two voltage inputs, battery current and the charge
//! accumulators. Conversions take tens of milliseconds, so instead of blocking, [`Ds2438::update`]
//! performs one step of a four-phase cycle per call. Call it no faster than every ~20 ms.

#[cfg(test)]
extern crate std;

use embedded_hal::delay::DelayNs;
use enumset::{EnumSet, EnumSetType};

#[macro_use]
mod fmt;

pub mod descriptors;
pub mod diagnostics;
pub mod ll;
#[cfg(test)]
mod sim;

use descriptors::{config, counters};

pub use diagnostics::Diagnostics;
pub use ll::{DeviceId, OneWire, Page, PageError};

/// Millisecond timestamp supplied by the caller.
pub type Instant = fugit::TimerInstantU64<1000>;

/// Time for the current ADC to stop after it has been disabled.
const ADC_SETTLE_MS: u32 = 40;

#[derive(Debug, EnumSetType)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Measurement {
    ChannelA,
    ChannelB,
    Temperature,
    Current,
}

/// Voltage inputs. Channel A is the general purpose VAD input, channel B is VDD.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    A,
    B,
}

impl Channel {
    const fn configuration(self) -> u8 {
        match self {
            Channel::A => config::CHANNEL_A,
            Channel::B => config::CHANNEL_B,
        }
    }
}

/// Decides which mode flag enables each phase, and which bit marks a negative current.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GatingPolicy {
    /// Every phase is enabled by its own channel flag. Bit 2 of the current MSB is the sign.
    #[default]
    PerChannel,
    /// Bit-compatible with older firmware: every phase is enabled by the channel A flag, the
    /// accumulator read only by the current flag, and bit 0 of the current MSB is taken as the
    /// sign.
    Legacy,
}

impl GatingPolicy {
    pub const fn current_sign_mask(self) -> u8 {
        match self {
            GatingPolicy::PerChannel => 0x04,
            GatingPolicy::Legacy => 0x01,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    pub mode: EnumSet<Measurement>,
    pub policy: GatingPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            mode: EnumSet::all(),
            policy: GatingPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    TriggerA,
    ReadA,
    TriggerB,
    ReadB,
}

impl Phase {
    pub const fn next(self) -> Self {
        match self {
            Phase::TriggerA => Phase::ReadA,
            Phase::ReadA => Phase::TriggerB,
            Phase::TriggerB => Phase::ReadB,
            Phase::ReadB => Phase::TriggerA,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Accumulators {
    /// Integrated current accumulator.
    pub ica: u8,
    /// Charging current accumulator.
    pub cca: i16,
    /// Discharging current accumulator.
    pub dca: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Readings {
    /// LSB = 1/32 °C
    pub temperature: i16,
    /// LSB = 10 mV
    pub voltage_a: u16,
    /// LSB = 10 mV
    pub voltage_b: u16,
    /// Raw current ADC value. LSB = 1 / (4096 * r_sense) A
    pub current: i16,
    pub accumulators: Accumulators,
}

impl Readings {
    /// ```rust
    /// # use ds2438::Readings;
    /// let readings = Readings { temperature: 48, ..Default::default() };
    /// assert_eq!(readings.temperature_celsius(), 1.5);
    /// ```
    pub fn temperature_celsius(&self) -> f32 {
        self.temperature as f32 * 0.03125
    }

    /// Returns the voltage of `channel` in V.
    pub fn voltage(&self, channel: Channel) -> f32 {
        self.voltage_raw(channel) as f32 / 100.0
    }

    /// Returns the voltage of `channel` in mV.
    pub fn voltage_mv(&self, channel: Channel) -> u32 {
        self.voltage_raw(channel) as u32 * 10
    }

    fn voltage_raw(&self, channel: Channel) -> u16 {
        match channel {
            Channel::A => self.voltage_a,
            Channel::B => self.voltage_b,
        }
    }

    /// Converts the raw current to A, given the sense resistor in Ω.
    ///
    /// ```rust
    /// # use ds2438::Readings;
    /// let readings = Readings { current: -512, ..Default::default() };
    /// assert_eq!(readings.current_amps(0.03125), -4.0);
    /// ```
    pub fn current_amps(&self, shunt_ohms: f32) -> f32 {
        self.current as f32 / (4096.0 * shunt_ohms)
    }

    /// Raw discharging current accumulator.
    pub fn accumulated_charge(&self) -> u16 {
        self.accumulators.dca
    }

    /// Converts the discharging accumulator to coulombs, given the sense resistor in Ω.
    /// LSB = 15.625 mVh / r_sense
    ///
    /// ```rust
    /// # use ds2438::{Accumulators, Readings};
    /// let readings = Readings {
    ///     accumulators: Accumulators { dca: 2, ..Default::default() },
    ///     ..Default::default()
    /// };
    /// assert_eq!(readings.discharged_coulombs(0.015625), 7200.0);
    /// ```
    pub fn discharged_coulombs(&self, shunt_ohms: f32) -> f32 {
        self.accumulators.dca as f32 * 0.015625 * 3600.0 / shunt_ohms
    }
}

#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateError<E> {
    ChannelSelect(PageError<E>),
    ConversionStart(E),
    ReadChannelA(PageError<E>),
    ReadChannelB(PageError<E>),
    AccumulatedCharge(PageError<E>),
}

impl<E> UpdateError<E> {
    /// Numeric status code, compatible with older firmware.
    pub const fn code(&self) -> i8 {
        match self {
            UpdateError::ConversionStart(_) => -1,
            UpdateError::ReadChannelA(_) => -2,
            UpdateError::AccumulatedCharge(_) => -3,
            UpdateError::ReadChannelB(_) => -4,
            UpdateError::ChannelSelect(_) => -5,
        }
    }
}

/// Collapses an update result into its numeric status code, 0 meaning success.
pub fn result_code<E>(result: &Result<(), UpdateError<E>>) -> i8 {
    match result {
        Ok(()) => 0,
        Err(error) => error.code(),
    }
}

#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError<E> {
    /// The offset does not fit the offset register. No bus traffic was generated.
    InvalidRange(i16),
    Page(PageError<E>),
}

impl<E> From<PageError<E>> for CalibrationError<E> {
    fn from(error: PageError<E>) -> Self {
        Self::Page(error)
    }
}

pub struct Ds2438<B, D = ()> {
    iface: ll::Ds2438Interface<B, D>,
    config: DriverConfig,
    phase: Phase,
    readings: Readings,
    timestamp: Instant,
    error: bool,
}

impl<B> Ds2438<B> {
    pub const fn new(bus: B, id: DeviceId, config: DriverConfig) -> Self {
        Self::with_diagnostics(bus, id, config, ())
    }
}

impl<B, D> Ds2438<B, D> {
    pub const fn with_diagnostics(
        bus: B,
        id: DeviceId,
        config: DriverConfig,
        diagnostics: D,
    ) -> Self {
        Self {
            iface: ll::Ds2438Interface {
                bus,
                id,
                diagnostics,
            },
            config,
            phase: Phase::TriggerA,
            readings: Readings {
                temperature: 0,
                voltage_a: 0,
                voltage_b: 0,
                current: 0,
                accumulators: Accumulators {
                    ica: 0,
                    cca: 0,
                    dca: 0,
                },
            },
            timestamp: Instant::from_ticks(0),
            error: true,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.iface.id
    }

    pub fn config(&self) -> DriverConfig {
        self.config
    }

    /// The phase the next [`update`](Self::update) call will perform.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn readings(&self) -> &Readings {
        &self.readings
    }

    /// Whether the most recent update failed. Set until the first successful update.
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Time of the most recent update, successful or not.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn diagnostics_mut(&mut self) -> &mut D {
        &mut self.iface.diagnostics
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.iface.bus
    }

    pub fn into_inner(self) -> B {
        self.iface.bus
    }
}

impl<B, D> Ds2438<B, D>
where
    B: OneWire,
    D: Diagnostics,
{
    /// Checks that the device is on the bus. Absence is reported as `Ok(false)`.
    pub fn begin(&mut self) -> Result<bool, B::Error> {
        let present = self.iface.is_present()?;
        if !present {
            warn!("DS2438 {:?} not found", self.iface.id);
        }
        Ok(present)
    }

    /// Performs the current phase and moves to the next one.
    ///
    /// On error the phase is retried by the next call; the readings keep their last valid values.
    pub fn update(&mut self, now: Instant) -> Result<(), UpdateError<B::Error>> {
        self.error = true;
        self.timestamp = now;

        let result = match self.phase {
            Phase::TriggerA => self.trigger(Channel::A),
            Phase::ReadA => self.read_channel_a(),
            Phase::TriggerB => self.trigger(Channel::B),
            Phase::ReadB => self.read_channel_b(),
        };

        match &result {
            Ok(()) => {
                self.phase = self.phase.next();
                self.error = false;
            }
            Err(error) => {
                warn!("{:?} failed with code {}", self.phase, error.code());
            }
        }

        result
    }

    fn enabled(&self, phase: Phase) -> bool {
        let flag = match (self.config.policy, phase) {
            (GatingPolicy::Legacy, _) => Measurement::ChannelA,
            (_, Phase::TriggerA | Phase::ReadA) => Measurement::ChannelA,
            (_, Phase::TriggerB | Phase::ReadB) => Measurement::ChannelB,
        };
        self.config.mode.contains(flag)
    }

    fn trigger(&mut self, channel: Channel) -> Result<(), UpdateError<B::Error>> {
        let phase = match channel {
            Channel::A => Phase::TriggerA,
            Channel::B => Phase::TriggerB,
        };
        if !self.enabled(phase) {
            return Ok(());
        }

        // With both channels active the temperature is converted alongside channel A only.
        let mode = self.config.mode;
        let temperature = mode.contains(Measurement::Temperature)
            && (channel == Channel::A || !mode.contains(Measurement::ChannelA));

        self.iface
            .write_configuration(channel.configuration())
            .map_err(UpdateError::ChannelSelect)?;
        self.iface
            .start_conversion(temperature)
            .map_err(UpdateError::ConversionStart)
    }

    fn read_channel_a(&mut self) -> Result<(), UpdateError<B::Error>> {
        if !self.enabled(Phase::ReadA) {
            return Ok(());
        }

        let page = self
            .iface
            .read_page(Page::Status)
            .map_err(UpdateError::ReadChannelA)?;

        let sign_mask = self.config.policy.current_sign_mask();
        self.readings.temperature = descriptors::decode_temperature(&page);
        self.readings.voltage_a = descriptors::decode_voltage(&page);
        self.readings.current = descriptors::decode_current(&page, sign_mask);

        Ok(())
    }

    fn read_channel_b(&mut self) -> Result<(), UpdateError<B::Error>> {
        let read_status = self.enabled(Phase::ReadB);
        let read_accumulators = self.config.mode.contains(Measurement::Current)
            && (read_status || self.config.policy == GatingPolicy::Legacy);

        let page = if read_status {
            let page = self
                .iface
                .read_page(Page::Status)
                .map_err(UpdateError::ReadChannelB)?;
            Some(page)
        } else {
            None
        };

        let accumulators = if read_accumulators {
            let accumulators = self
                .read_accumulators()
                .map_err(UpdateError::AccumulatedCharge)?;
            Some(accumulators)
        } else {
            None
        };

        if let Some(page) = page {
            let sign_mask = self.config.policy.current_sign_mask();
            self.readings.current = descriptors::decode_current(&page, sign_mask);
            self.readings.voltage_b = descriptors::decode_voltage(&page);
        }
        if let Some(accumulators) = accumulators {
            self.readings.accumulators = accumulators;
        }

        Ok(())
    }

    /// Reads the ICA, CCA and DCA accumulators.
    pub fn read_accumulators(&mut self) -> Result<Accumulators, PageError<B::Error>> {
        let counters = self.iface.read_page(Page::Counters)?;
        let totals = self.iface.read_page(Page::Accumulators)?;

        let accumulators = Accumulators {
            ica: descriptors::decode_ica(&counters),
            cca: descriptors::decode_cca(&totals),
            dca: descriptors::decode_dca(&totals),
        };

        debug!(
            "ICA: {}, CCA: {}, DCA: {}",
            accumulators.ica, accumulators.cca, accumulators.dca
        );
        self.iface.diagnostics.accumulators(&accumulators);

        Ok(accumulators)
    }

    /// Returns the value of the current offset register.
    pub fn read_current_offset(&mut self) -> Result<i16, PageError<B::Error>> {
        let page = self.iface.read_page(Page::Counters)?;
        Ok(descriptors::decode_offset(&page))
    }

    /// Programs the current offset register.
    ///
    /// The current ADC is disabled first and left disabled; the next channel selection, or
    /// an explicit configuration write by the caller, turns it back on. `offset` must be in
    /// `-511..=511`.
    pub fn write_current_offset(
        &mut self,
        offset: i16,
        delay: &mut impl DelayNs,
    ) -> Result<(), CalibrationError<B::Error>> {
        let Some(bytes) = descriptors::encode_offset(offset) else {
            warn!("Current offset {} out of range", offset);
            return Err(CalibrationError::InvalidRange(offset));
        };

        let mut page = self.iface.read_page(Page::Counters)?;

        self.iface.write_configuration(config::CURRENT_DISABLED)?;
        delay.delay_ms(ADC_SETTLE_MS);

        page[counters::OFFSET_LSB..=counters::OFFSET_MSB].copy_from_slice(&bytes);
        self.iface
            .write_page(Page::Counters, &page)
            .map_err(PageError::Bus)?;

        debug!("Current offset set to {}", offset);

        Ok(())
    }

    /// Writes the Status/Configuration register directly, e.g. to re-enable the current ADC
    /// after calibration.
    pub fn write_configuration(&mut self, configuration: u8) -> Result<(), PageError<B::Error>> {
        self.iface.write_configuration(configuration)
    }
}
