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

//! Copies executables into target memory.

use log::{debug, info};
use serde::Deserialize;

use crate::elf_items::{BinaryImage, Segment};
use crate::error::{BridgeError, Result};
use crate::memory::MemoryPort;

/// Zero fill is streamed in chunks of this many bytes.
const ZERO_CHUNK: usize = 4096;

/// How the target expects to receive its program (`debug_bridge/boot-mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    #[default]
    Default,
    Jtag,
    JtagHyper,
}

pub struct ElfLoader<'a> {
    port: MemoryPort<'a>,
    set_pc_addr: Option<u32>,
}

impl<'a> ElfLoader<'a> {
    pub fn new(port: MemoryPort<'a>, set_pc_addr: Option<u32>) -> Self {
        Self { port, set_pc_addr }
    }

    /// Returns 1 when an entry point was injected, 0 otherwise.
    pub fn load(&mut self, mode: BootMode, images: &[BinaryImage]) -> Result<u32> {
        match mode {
            BootMode::Jtag => Err(BridgeError::Unsupported("JTAG boot")),
            BootMode::JtagHyper => Err(BridgeError::Unsupported("JTAG hyper boot")),
            BootMode::Default => self.load_default(images),
        }
    }

    /// Loads binaries in order, stopping after the first one whose entry point was injected.
    pub fn load_default(&mut self, images: &[BinaryImage]) -> Result<u32> {
        for image in images {
            if self.load_segments(image)? != 0 {
                return Ok(1);
            }
        }
        Ok(0)
    }

    pub fn load_segments(&mut self, image: &BinaryImage) -> Result<u32> {
        info!("Loading {}", image.path.display());
        for segment in &image.segments {
            self.load_segment(image, segment)?;
        }

        let Some(set_pc_addr) = self.set_pc_addr else {
            return Ok(0);
        };
        let entry = target_addr(image, image.entry)?;
        match image.symbols.lookup(image.entry) {
            Some(symbol) => debug!("Setting PC to 0x{:x} ({})", entry, symbol.name),
            None => debug!("Setting PC to 0x{:x}", entry),
        }
        self.port.write_u32(set_pc_addr, entry)?;
        Ok(1)
    }

    fn load_segment(&mut self, image: &BinaryImage, segment: &Segment) -> Result<()> {
        let base = target_addr(image, segment.paddr)?;
        info!(
            "Loading section (base: 0x{:x}, size: 0x{:x})",
            base,
            segment.data.len()
        );
        if !segment.data.is_empty() {
            self.port.write(base, &segment.data)?;
        }

        let bss_size = segment.bss_size();
        if bss_size == 0 {
            return Ok(());
        }
        let bss_base = target_addr(image, segment.paddr + segment.file_size)?;
        info!(
            "Init section to 0 (base: 0x{:x}, size: 0x{:x})",
            bss_base, bss_size
        );
        let zeros = [0u8; ZERO_CHUNK];
        let mut remaining = bss_size;
        let mut addr = bss_base;
        while remaining > 0 {
            let len = remaining.min(ZERO_CHUNK as u64) as usize;
            self.port.write(addr, &zeros[..len])?;
            addr = addr.wrapping_add(len as u32);
            remaining -= len as u64;
        }
        Ok(())
    }
}

fn target_addr(image: &BinaryImage, addr: u64) -> Result<u32> {
    u32::try_from(addr).map_err(|_| BridgeError::Elf {
        path: image.path.display().to_string(),
        message: format!("address 0x{:x} is outside the 32-bit target space", addr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Cable;
    use crate::sim::{Event, SimCable};
    use crate::symbols::SymbolTable;
    use std::path::PathBuf;

    fn segment(paddr: u64, data: &[u8], mem_size: u64) -> Segment {
        Segment {
            paddr,
            vaddr: paddr,
            file_size: data.len() as u64,
            mem_size,
            data: data.to_vec(),
        }
    }

    fn image(path: &str, entry: u64, segments: Vec<Segment>) -> BinaryImage {
        BinaryImage {
            path: PathBuf::from(path),
            entry,
            segments,
            symbols: SymbolTable::new(),
        }
    }

    #[test]
    fn copies_segments_and_zero_fills_bss() {
        let mut cable = SimCable::default();
        // Garbage where .bss will land.
        cable.write(0x1004, &[0xaa; 12]).unwrap();

        let app = image("app.elf", 0x1000, vec![segment(0x1000, &[1, 2, 3, 4], 16)]);
        let status = ElfLoader::new(MemoryPort::new(&mut cable), None)
            .load_segments(&app)
            .unwrap();
        assert_eq!(status, 0);

        let mut port = MemoryPort::new(&mut cable);
        assert_eq!(port.read(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(port.read(0x1004, 12).unwrap(), vec![0; 12]);
    }

    #[test]
    fn large_bss_is_written_in_chunks() {
        let mut cable = SimCable::default();
        let app = image("app.elf", 0, vec![segment(0x2000, &[], 10_000)]);
        ElfLoader::new(MemoryPort::new(&mut cable), None)
            .load_segments(&app)
            .unwrap();

        let writes: Vec<(u32, usize)> = cable
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write { addr, data } => Some((addr, data.len())),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![(0x2000, 4096), (0x3000, 4096), (0x4000, 1808)]);
    }

    #[test]
    fn entry_point_is_injected_when_configured() {
        let mut cable = SimCable::default();
        let app = image("app.elf", 0x1c00_8080, vec![segment(0x1c00_8000, &[0x13; 4], 4)]);
        let status = ElfLoader::new(MemoryPort::new(&mut cable), Some(0x1a11_0000))
            .load_segments(&app)
            .unwrap();
        assert_eq!(status, 1);
        assert_eq!(
            MemoryPort::new(&mut cable).read_u32(0x1a11_0000).unwrap(),
            0x1c00_8080
        );
    }

    #[test]
    fn load_default_stops_after_injected_entry() {
        let mut cable = SimCable::default();
        let images = vec![
            image("first.elf", 0x100, vec![segment(0x100, &[1], 1)]),
            image("second.elf", 0x200, vec![segment(0x200, &[2], 1)]),
        ];
        let status = ElfLoader::new(MemoryPort::new(&mut cable), Some(0x10))
            .load(BootMode::Default, &images)
            .unwrap();
        assert_eq!(status, 1);
        assert_eq!(MemoryPort::new(&mut cable).read_u8(0x200).unwrap(), 0);
    }

    #[test]
    fn load_default_loads_everything_without_pc_injection() {
        let mut cable = SimCable::default();
        let images = vec![
            image("first.elf", 0x100, vec![segment(0x100, &[1], 1)]),
            image("second.elf", 0x200, vec![segment(0x200, &[2], 1)]),
        ];
        let status = ElfLoader::new(MemoryPort::new(&mut cable), None)
            .load(BootMode::Default, &images)
            .unwrap();
        assert_eq!(status, 0);
        let mut port = MemoryPort::new(&mut cable);
        assert_eq!(port.read_u8(0x100).unwrap(), 1);
        assert_eq!(port.read_u8(0x200).unwrap(), 2);
    }

    #[test]
    fn failed_write_aborts_remaining_segments() {
        let mut cable = SimCable::default();
        cable.fail_writes_at(0x100);
        let app = image(
            "app.elf",
            0,
            vec![segment(0x100, &[1, 2], 2), segment(0x200, &[3, 4], 2)],
        );
        let err = ElfLoader::new(MemoryPort::new(&mut cable), None)
            .load_segments(&app)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Transport { addr: 0x100, .. }));
        assert!(!cable
            .events()
            .iter()
            .any(|e| matches!(e, Event::Write { addr: 0x200, .. })));
    }

    #[test]
    fn jtag_boot_modes_fail_without_touching_the_target() {
        let mut cable = SimCable::default();
        let images = vec![image("app.elf", 0, vec![segment(0x100, &[1], 1)])];
        for mode in [BootMode::Jtag, BootMode::JtagHyper] {
            let err = ElfLoader::new(MemoryPort::new(&mut cable), None)
                .load(mode, &images)
                .unwrap_err();
            assert!(matches!(err, BridgeError::Unsupported(_)));
        }
        assert!(cable.events().is_empty());
    }

    #[test]
    fn boot_mode_names() {
        let mode: BootMode = serde_json::from_str("\"jtag_hyper\"").unwrap();
        assert_eq!(mode, BootMode::JtagHyper);
        let mode: BootMode = serde_json::from_str("\"jtag\"").unwrap();
        assert_eq!(mode, BootMode::Jtag);
    }
}
