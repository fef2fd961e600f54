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

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use object::elf;
use object::read::elf::{FileHeader, ProgramHeader, Sym as _};
use object::{Endianness, FileKind};

use crate::error::{BridgeError, Result};
use crate::symbols::{Symbol, SymbolKind, SymbolTable};

/// A `PT_LOAD` segment. `data` holds the file-backed bytes (`file_size` of them);
/// the remaining `mem_size - file_size` bytes are zero-initialized.
#[derive(Debug, Clone)]
pub struct Segment {
    pub paddr: u64,
    pub vaddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub data: Vec<u8>,
}

impl Segment {
    /// Size of the zero-filled tail.
    pub fn bss_size(&self) -> u64 {
        self.mem_size.saturating_sub(self.file_size)
    }
}

/// Everything the bridge needs from one executable: loadable segments,
/// the ELF symbol table and the entry point.
#[derive(Debug, Clone)]
pub struct BinaryImage {
    pub path: PathBuf,
    pub entry: u64,
    pub segments: Vec<Segment>,
    pub symbols: SymbolTable,
}

impl BinaryImage {
    pub fn load(path: &Path) -> Result<Self> {
        let file_data = fs::read(path).map_err(|source| BridgeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(path, &file_data)
    }

    pub fn parse(path: &Path, data: &[u8]) -> Result<Self> {
        match FileKind::parse(data) {
            Ok(FileKind::Elf32) => parse_elf::<elf::FileHeader32<Endianness>>(path, data),
            Ok(FileKind::Elf64) => parse_elf::<elf::FileHeader64<Endianness>>(path, data),
            Ok(other) => Err(elf_error(path, format!("not an ELF file ({:?})", other))),
            Err(e) => Err(elf_error(path, e)),
        }
    }
}

fn parse_elf<Elf: FileHeader<Endian = Endianness>>(
    path: &Path,
    data: &[u8],
) -> Result<BinaryImage> {
    let header = Elf::parse(data).map_err(|e| elf_error(path, e))?;
    let endian = header.endian().map_err(|e| elf_error(path, e))?;

    let mut segments = Vec::new();
    for ph in header
        .program_headers(endian, data)
        .map_err(|e| elf_error(path, e))?
    {
        if ph.p_type(endian) != elf::PT_LOAD {
            continue;
        }
        let offset: u64 = ph.p_offset(endian).into();
        let file_size: u64 = ph.p_filesz(endian).into();
        let bytes = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(file_size).ok())
            .and_then(|(start, len)| data.get(start..start.checked_add(len)?))
            .ok_or_else(|| elf_error(path, "segment data out of bounds"))?;
        segments.push(Segment {
            paddr: ph.p_paddr(endian).into(),
            vaddr: ph.p_vaddr(endian).into(),
            file_size,
            mem_size: ph.p_memsz(endian).into(),
            data: bytes.to_vec(),
        });
    }

    let mut symbols = SymbolTable::new();
    let sections = header.sections(endian, data).map_err(|e| elf_error(path, e))?;
    let symtab = sections
        .symbols(endian, data, elf::SHT_SYMTAB)
        .map_err(|e| elf_error(path, e))?;
    for sym in symtab.iter() {
        if sym.is_undefined(endian) {
            continue;
        }
        let kind = match sym.st_type() {
            elf::STT_FUNC => SymbolKind::Function,
            elf::STT_OBJECT => SymbolKind::Data,
            elf::STT_SECTION | elf::STT_FILE => continue,
            _ => SymbolKind::Unknown,
        };
        let name = sym
            .name(endian, symtab.strings())
            .map_err(|e| elf_error(path, e))?;
        if name.is_empty() {
            continue;
        }
        symbols.insert(Symbol {
            name: String::from_utf8_lossy(name).into_owned(),
            address: sym.st_value(endian).into(),
            size: sym.st_size(endian).into(),
            kind,
        });
    }

    Ok(BinaryImage {
        path: path.to_path_buf(),
        entry: header.e_entry(endian).into(),
        segments,
        symbols,
    })
}

fn elf_error(path: &Path, message: impl Display) -> BridgeError {
    BridgeError::Elf {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_elf_input_is_rejected() {
        let err = BinaryImage::parse(Path::new("notes.txt"), b"hello world").unwrap_err();
        assert!(matches!(err, BridgeError::Elf { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = BinaryImage::load(Path::new("/nonexistent/app.elf")).unwrap_err();
        assert!(matches!(err, BridgeError::Io { .. }));
    }
}
