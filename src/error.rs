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

use thiserror::Error;

/// Errors raised by the bridge and its collaborators.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown cable: {0}")]
    UnknownCable(String),

    #[error("failed to initialize cable with error: {0}")]
    CableOpen(String),

    #[error("cable access failed at 0x{addr:08x} ({size} bytes)")]
    Transport { addr: u32, size: usize },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ELF error in {path}: {message}")]
    Elf { path: String, message: String },

    #[error("{0} is not supported on this target")]
    Unsupported(&'static str),

    #[error("no program loaded")]
    NotLoaded,

    #[error("runtime debug structure not found in any binary")]
    DebugStructNotFound,

    #[error("malformed command: {0}")]
    Protocol(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("failed to load engine library: {0}")]
    Library(#[from] libloading::Error),

    #[error("failed to find engine symbol '{0}': {1}")]
    SymbolNotFound(String, libloading::Error),

    #[error("unmatched repeat loop in command plan")]
    UnmatchedLoop,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
