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

//! Minimal little-endian ELF32 writer for test fixtures.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;

const EM_RISCV: u16 = 243;
const PT_LOAD: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHN_ABS: u16 = 0xfff1;
// STB_GLOBAL, STT_OBJECT
const GLOBAL_OBJECT: u8 = 0x11;

struct LoadSegment {
    paddr: u32,
    data: Vec<u8>,
    mem_size: u32,
}

#[derive(Default)]
pub struct ElfBuilder {
    entry: u32,
    segments: Vec<LoadSegment>,
    symbols: Vec<(String, u32)>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            ..Default::default()
        }
    }

    /// Loadable segment of `data` at `paddr`, zero-extended to `mem_size` bytes.
    pub fn segment(mut self, paddr: u32, data: &[u8], mem_size: u32) -> Self {
        self.segments.push(LoadSegment {
            paddr,
            data: data.to_vec(),
            mem_size,
        });
        self
    }

    pub fn symbol(mut self, name: &str, value: u32) -> Self {
        self.symbols.push((name.to_string(), value));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phoff = EHDR_SIZE;
        let mut offset = phoff + PHDR_SIZE * self.segments.len();

        let mut segment_offsets = Vec::new();
        for segment in &self.segments {
            segment_offsets.push(offset);
            offset = align4(offset + segment.data.len());
        }

        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; SYM_SIZE];
        for (name, value) in &self.symbols {
            let name_offset = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            symtab.extend_from_slice(&name_offset.to_le_bytes());
            symtab.extend_from_slice(&value.to_le_bytes());
            symtab.extend_from_slice(&4u32.to_le_bytes());
            symtab.push(GLOBAL_OBJECT);
            symtab.push(0);
            symtab.extend_from_slice(&SHN_ABS.to_le_bytes());
        }
        let shstrtab = b"\0.symtab\0.strtab\0.shstrtab\0".to_vec();

        let symtab_offset = offset;
        let strtab_offset = align4(symtab_offset + symtab.len());
        let shstrtab_offset = align4(strtab_offset + strtab.len());
        let shoff = align4(shstrtab_offset + shstrtab.len());
        let total = shoff + SHDR_SIZE * 4;

        let mut out = vec![0u8; total];

        // ELF header
        out[..4].copy_from_slice(b"\x7fELF");
        out[4] = 1; // ELFCLASS32
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1; // EV_CURRENT
        put16(&mut out, 16, 2); // ET_EXEC
        put16(&mut out, 18, EM_RISCV);
        put32(&mut out, 20, 1);
        put32(&mut out, 24, self.entry);
        put32(&mut out, 28, phoff as u32);
        put32(&mut out, 32, shoff as u32);
        put16(&mut out, 40, EHDR_SIZE as u16);
        put16(&mut out, 42, PHDR_SIZE as u16);
        put16(&mut out, 44, self.segments.len() as u16);
        put16(&mut out, 46, SHDR_SIZE as u16);
        put16(&mut out, 48, 4);
        put16(&mut out, 50, 3);

        for (i, (segment, data_offset)) in self.segments.iter().zip(&segment_offsets).enumerate() {
            let ph = phoff + i * PHDR_SIZE;
            put32(&mut out, ph, PT_LOAD);
            put32(&mut out, ph + 4, *data_offset as u32);
            put32(&mut out, ph + 8, segment.paddr);
            put32(&mut out, ph + 12, segment.paddr);
            put32(&mut out, ph + 16, segment.data.len() as u32);
            put32(&mut out, ph + 20, segment.mem_size);
            put32(&mut out, ph + 24, 7); // RWX
            put32(&mut out, ph + 28, 4);
            out[*data_offset..*data_offset + segment.data.len()].copy_from_slice(&segment.data);
        }

        out[symtab_offset..symtab_offset + symtab.len()].copy_from_slice(&symtab);
        out[strtab_offset..strtab_offset + strtab.len()].copy_from_slice(&strtab);
        out[shstrtab_offset..shstrtab_offset + shstrtab.len()].copy_from_slice(&shstrtab);

        // Section headers: null, .symtab, .strtab, .shstrtab
        let sh = shoff + SHDR_SIZE;
        put32(&mut out, sh, 1);
        put32(&mut out, sh + 4, SHT_SYMTAB);
        put32(&mut out, sh + 16, symtab_offset as u32);
        put32(&mut out, sh + 20, symtab.len() as u32);
        put32(&mut out, sh + 24, 2); // sh_link: .strtab
        put32(&mut out, sh + 28, 1); // sh_info: first global
        put32(&mut out, sh + 32, 4);
        put32(&mut out, sh + 36, SYM_SIZE as u32);

        let sh = shoff + 2 * SHDR_SIZE;
        put32(&mut out, sh, 9);
        put32(&mut out, sh + 4, SHT_STRTAB);
        put32(&mut out, sh + 16, strtab_offset as u32);
        put32(&mut out, sh + 20, strtab.len() as u32);
        put32(&mut out, sh + 32, 1);

        let sh = shoff + 3 * SHDR_SIZE;
        put32(&mut out, sh, 17);
        put32(&mut out, sh + 4, SHT_STRTAB);
        put32(&mut out, sh + 16, shstrtab_offset as u32);
        put32(&mut out, sh + 20, shstrtab.len() as u32);
        put32(&mut out, sh + 32, 1);

        out
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).expect("write ELF fixture");
        path
    }
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn put16(out: &mut [u8], at: usize, value: u16) {
    out[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
