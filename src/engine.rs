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

//! Interfaces to the lower-level engine: the debug cable and the services
//! (I/O pumps, GDB server) that run on top of it.

use std::any::Any;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Debug cable giving raw access to the target.
pub trait Cable: Send {
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()>;
    fn read(&mut self, addr: u32, size: usize) -> Result<Vec<u8>>;

    fn chip_reset(&mut self, active: bool);
    fn jtag_reset(&mut self, active: bool);
    fn jtag_soft_reset(&mut self);

    fn jtag_set_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<()>;
    fn jtag_get_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<u32>;

    /// Exclusive access across several operations. The bridge only forwards these.
    fn lock(&mut self);
    fn unlock(&mut self);

    /// Lets an engine recover its own concrete cable type.
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CableKind {
    Ftdi,
    JtagProxy,
}

impl FromStr for CableKind {
    type Err = BridgeError;

    /// Accepts `ftdi`, `jtag-proxy`, optionally followed by `@<variant>`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split('@').next().unwrap_or_default() {
            "ftdi" => Ok(Self::Ftdi),
            "jtag-proxy" => Ok(Self::JtagProxy),
            _ => Err(BridgeError::UnknownCable(s.to_string())),
        }
    }
}

/// Handle to a running ioloop or reqloop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopHandle(pub usize);

/// Handle to an open GDB server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GdbHandle(pub usize);

/// Called by the GDB server for every query or monitor command it does not
/// handle itself. Receives the command and the reply buffer, returns the
/// reply length, a negative required length, or a raw status.
pub type CommandHandler = Box<dyn FnMut(&[u8], &mut [u8]) -> i32 + Send>;

/// Services provided by the engine. Methods take `&self` so a blocking
/// close can run while the GDB server thread keeps calling back.
pub trait Engine: Send + Sync {
    fn open_cable(
        &self,
        kind: CableKind,
        cable_config: Option<&str>,
        system_config: &str,
    ) -> Result<Box<dyn Cable>>;

    fn ioloop_open(&self, cable: &dyn Cable, debug_struct: u32) -> Result<LoopHandle>;
    /// With `kill` the loop is stopped at once, otherwise this blocks until the
    /// target exits and returns its status.
    fn ioloop_close(&self, handle: LoopHandle, kill: bool) -> i32;

    fn reqloop_open(&self, cable: &dyn Cable, debug_struct: u32) -> Result<LoopHandle>;
    fn reqloop_close(&self, handle: LoopHandle, kill: bool);

    fn gdb_server_open(
        &self,
        cable: &dyn Cable,
        port: u16,
        handler: CommandHandler,
        capabilities: &str,
    ) -> Result<GdbHandle>;
    fn gdb_server_close(&self, handle: GdbHandle, kill: bool);
    /// Ask the attached debugger to re-read target state.
    fn gdb_server_refresh_target(&self, handle: GdbHandle);
}
