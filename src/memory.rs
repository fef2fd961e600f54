// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::engine::Cable;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
    U32,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
        }
    }
}

/// Target memory access through the cable. Integers are little-endian in both directions.
pub struct MemoryPort<'a> {
    cable: &'a mut dyn Cable,
}

impl<'a> MemoryPort<'a> {
    pub fn new(cable: &'a mut dyn Cable) -> Self {
        Self { cable }
    }

    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.cable.write(addr, data)
    }

    pub fn read(&mut self, addr: u32, size: usize) -> Result<Vec<u8>> {
        self.cable.read(addr, size)
    }

    /// Writes the low `width` bytes of `value`.
    pub fn write_int(&mut self, addr: u32, value: u32, width: Width) -> Result<()> {
        let bytes = value.to_le_bytes();
        self.write(addr, &bytes[..width.bytes()])
    }

    pub fn read_int(&mut self, addr: u32, width: Width) -> Result<u32> {
        let data = self.read(addr, width.bytes())?;
        let mut bytes = [0u8; 4];
        let n = data.len().min(width.bytes());
        bytes[..n].copy_from_slice(&data[..n]);
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_u8(&mut self, addr: u32, value: u8) -> Result<()> {
        self.write_int(addr, value.into(), Width::U8)
    }

    pub fn write_u16(&mut self, addr: u32, value: u16) -> Result<()> {
        self.write_int(addr, value.into(), Width::U16)
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_int(addr, value, Width::U32)
    }

    pub fn read_u8(&mut self, addr: u32) -> Result<u8> {
        Ok(self.read_int(addr, Width::U8)? as u8)
    }

    pub fn read_u16(&mut self, addr: u32) -> Result<u16> {
        Ok(self.read_int(addr, Width::U16)? as u16)
    }

    pub fn read_u32(&mut self, addr: u32) -> Result<u32> {
        self.read_int(addr, Width::U32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCable;

    #[test]
    fn write_int_is_little_endian() {
        let mut cable = SimCable::default();
        let mut port = MemoryPort::new(&mut cable);
        port.write_u32(0x100, 0x1234_5678).unwrap();
        assert_eq!(port.read(0x100, 4).unwrap(), vec![0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn read_int_reverses_write_int() {
        let mut cable = SimCable::default();
        let mut port = MemoryPort::new(&mut cable);
        port.write_u32(0x200, 0xdead_beef).unwrap();
        port.write_u16(0x210, 0xcafe).unwrap();
        port.write_u8(0x220, 0x5a).unwrap();
        assert_eq!(port.read_u32(0x200).unwrap(), 0xdead_beef);
        assert_eq!(port.read_u16(0x210).unwrap(), 0xcafe);
        assert_eq!(port.read_u8(0x220).unwrap(), 0x5a);
    }

    #[test]
    fn narrow_write_only_touches_its_width() {
        let mut cable = SimCable::default();
        let mut port = MemoryPort::new(&mut cable);
        port.write_u32(0x300, 0xffff_ffff).unwrap();
        port.write_int(0x300, 0x1234_5678, Width::U16).unwrap();
        assert_eq!(port.read_u32(0x300).unwrap(), 0xffff_5678);
    }

    #[test]
    fn transport_failure_propagates() {
        let mut cable = SimCable::default();
        cable.fail_writes_at(0x400);
        let mut port = MemoryPort::new(&mut cable);
        assert!(port.write_u32(0x400, 1).is_err());
    }
}
