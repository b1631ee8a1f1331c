//! A simulated DS2438 on a bus of its own, for tests.

use std::{vec, vec::Vec};

use crate::{
    descriptors::{config, PageData},
    ll::{Command, DeviceId, OneWire},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusOp {
    Reset,
    Select(DeviceId),
    Write { byte: u8, hold_power: bool },
    Read(u8),
}

#[derive(Default)]
pub struct SimChip {
    pub memory: [PageData; 8],
    pub scratchpad: [PageData; 8],
    /// Temperature register (page 0 bytes 1-2) loaded by a temperature conversion.
    pub temperature: [u8; 2],
    /// Voltage register (page 0 bytes 3-4) loaded by a voltage conversion, per input.
    pub voltage: [[u8; 2]; 2],
    /// Ignores configuration writes and keeps this value instead.
    pub stuck_config: Option<u8>,
}

#[derive(Clone, Copy)]
enum State {
    Idle,
    Selected,
    Command(Command),
    Writing { page: usize, index: usize },
    Reading {
        page: usize,
        buffer: [u8; 9],
        index: usize,
    },
}

pub struct SimBus {
    pub chip: SimChip,
    pub devices: Vec<DeviceId>,
    pub log: Vec<BusOp>,
    /// Index of a scratchpad byte to flip on every read.
    pub corrupt_read: Option<usize>,
    /// Limits `corrupt_read` to reads of this page.
    pub corrupt_page: Option<usize>,
    /// Fails writes of this byte to a selected device.
    pub fail_write: Option<u8>,
    id: DeviceId,
    search: usize,
    state: State,
}

impl SimBus {
    pub fn new(id: DeviceId) -> Self {
        Self {
            chip: SimChip::default(),
            devices: vec![id],
            log: Vec::new(),
            corrupt_read: None,
            corrupt_page: None,
            fail_write: None,
            id,
            search: 0,
            state: State::Idle,
        }
    }

    /// Function commands sent to the device, with their page argument.
    pub fn commands(&self) -> Vec<(Command, Option<u8>)> {
        let mut commands = Vec::new();
        let mut ops = self.log.iter().peekable();

        while let Some(op) = ops.next() {
            if !matches!(op, BusOp::Select(_)) {
                continue;
            }
            let Some(BusOp::Write { byte, .. }) = ops.next() else {
                continue;
            };
            let Some(command) = Command::from_opcode(*byte) else {
                continue;
            };
            let page = match (command.takes_page(), ops.peek()) {
                (true, Some(BusOp::Write { byte, .. })) => Some(*byte),
                _ => None,
            };
            commands.push((command, page));
        }

        commands
    }

    pub fn reads(&self) -> usize {
        self.log
            .iter()
            .filter(|op| matches!(op, BusOp::Read(_)))
            .count()
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn scratchpad_with_crc(&self, page: usize) -> [u8; 9] {
        let mut buffer = [0; 9];
        buffer[..8].copy_from_slice(&self.chip.scratchpad[page]);
        buffer[8] = self.crc8(&buffer[..8]);
        buffer
    }

    fn execute(&mut self, command: Command) -> State {
        match command {
            Command::ConvertT => {
                self.chip.memory[0][1..3].copy_from_slice(&self.chip.temperature);
                State::Idle
            }
            Command::ConvertV => {
                let input = (self.chip.memory[0][0] & config::AD != 0) as usize;
                self.chip.memory[0][3..5].copy_from_slice(&self.chip.voltage[input]);
                State::Idle
            }
            other => State::Command(other),
        }
    }

    fn execute_with_page(&mut self, command: Command, page: u8) -> State {
        let page = page as usize & 0x07;
        match command {
            Command::RecallMemory => {
                self.chip.scratchpad[page] = self.chip.memory[page];
                State::Idle
            }
            Command::CopyScratchpad => {
                if page == 0 {
                    // Only the configuration and threshold bytes of page 0 are writable.
                    self.chip.memory[0][0] = self.chip.scratchpad[0][0];
                    self.chip.memory[0][7] = self.chip.scratchpad[0][7];
                } else {
                    self.chip.memory[page] = self.chip.scratchpad[page];
                }
                State::Idle
            }
            Command::WriteScratchpad => State::Writing { page, index: 0 },
            Command::ReadScratchpad => State::Reading {
                page,
                buffer: self.scratchpad_with_crc(page),
                index: 0,
            },
            Command::ConvertT | Command::ConvertV => State::Idle,
        }
    }
}

impl OneWire for SimBus {
    type Error = SimError;

    fn reset(&mut self) -> Result<bool, SimError> {
        self.log.push(BusOp::Reset);
        self.state = State::Idle;
        Ok(!self.devices.is_empty())
    }

    fn select(&mut self, id: &DeviceId) -> Result<(), SimError> {
        self.log.push(BusOp::Select(*id));
        self.state = if *id == self.id {
            State::Selected
        } else {
            State::Idle
        };
        Ok(())
    }

    fn reset_search(&mut self) {
        self.search = 0;
    }

    fn search(&mut self) -> Result<Option<DeviceId>, SimError> {
        let found = self.devices.get(self.search).copied();
        self.search += 1;
        Ok(found)
    }

    fn write_byte_with_power(&mut self, byte: u8, hold_power: bool) -> Result<(), SimError> {
        self.log.push(BusOp::Write { byte, hold_power });

        if !matches!(self.state, State::Idle) && self.fail_write == Some(byte) {
            self.state = State::Idle;
            return Err(SimError);
        }

        let state = self.state;
        self.state = match state {
            State::Idle => State::Idle,
            State::Selected => match Command::from_opcode(byte) {
                Some(command) => self.execute(command),
                None => State::Idle,
            },
            State::Command(command) => self.execute_with_page(command, byte),
            State::Writing { page, index } => {
                if index < 8 {
                    self.chip.scratchpad[page][index] = match (page, index) {
                        (0, 0) => self.chip.stuck_config.unwrap_or(byte),
                        _ => byte,
                    };
                }
                State::Writing {
                    page,
                    index: index + 1,
                }
            }
            reading @ State::Reading { .. } => reading,
        };

        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, SimError> {
        let byte = match &mut self.state {
            State::Reading {
                page,
                buffer,
                index,
            } if *index < buffer.len() => {
                let mut byte = buffer[*index];
                let page_matches = self.corrupt_page.map_or(true, |p| p == *page);
                if page_matches && self.corrupt_read == Some(*index) {
                    byte ^= 0x5A;
                }
                *index += 1;
                byte
            }
            _ => 0xFF,
        };

        self.log.push(BusOp::Read(byte));
        Ok(byte)
    }
}
