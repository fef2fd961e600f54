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

//! In-process engine backed by a sparse RAM model.
//!
//! Used by `--dry-run` to check a configuration and a set of binaries without
//! hardware, and by the tests to observe exactly which engine calls the bridge
//! makes. Every call is appended to a shared event log.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::engine::{Cable, CableKind, CommandHandler, Engine, GdbHandle, LoopHandle};
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CableOpened(CableKind),
    Write { addr: u32, data: Vec<u8> },
    Read { addr: u32, size: usize },
    ChipReset(bool),
    JtagReset(bool),
    JtagSoftReset,
    SetReg { reg: u32, width: u32, value: u32 },
    GetReg { reg: u32, width: u32 },
    Lock,
    Unlock,
    IoloopOpen { debug_struct: u32 },
    IoloopClose { kill: bool },
    ReqloopOpen { debug_struct: u32 },
    ReqloopClose { kill: bool },
    GdbOpen { port: u16, capabilities: String },
    GdbClose { kill: bool },
    GdbRefresh,
}

#[derive(Default)]
struct SimState {
    events: Vec<Event>,
    memory: BTreeMap<u32, u8>,
    registers: BTreeMap<u32, u32>,
    fail_writes_at: Option<u32>,
    closed_gdb: Vec<GdbHandle>,
}

type Shared = Arc<Mutex<SimState>>;

fn lock(state: &Shared) -> MutexGuard<'_, SimState> {
    // A panicking test thread must not hide the log from the others.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cable over the simulated memory. Unwritten bytes read as zero.
#[derive(Default)]
pub struct SimCable {
    state: Shared,
}

impl SimCable {
    /// Make every write that covers `addr` fail.
    pub fn fail_writes_at(&self, addr: u32) {
        lock(&self.state).fail_writes_at = Some(addr);
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.state).events.clone()
    }
}

impl Cable for SimCable {
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(bad) = state.fail_writes_at {
            let end = addr as u64 + data.len() as u64;
            if (addr as u64..end).contains(&(bad as u64)) {
                return Err(BridgeError::Transport {
                    addr,
                    size: data.len(),
                });
            }
        }
        for (offset, byte) in data.iter().enumerate() {
            state.memory.insert(addr.wrapping_add(offset as u32), *byte);
        }
        state.events.push(Event::Write {
            addr,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn read(&mut self, addr: u32, size: usize) -> Result<Vec<u8>> {
        let mut state = lock(&self.state);
        state.events.push(Event::Read { addr, size });
        Ok((0..size)
            .map(|offset| {
                let at = addr.wrapping_add(offset as u32);
                state.memory.get(&at).copied().unwrap_or(0)
            })
            .collect())
    }

    fn chip_reset(&mut self, active: bool) {
        lock(&self.state).events.push(Event::ChipReset(active));
    }

    fn jtag_reset(&mut self, active: bool) {
        lock(&self.state).events.push(Event::JtagReset(active));
    }

    fn jtag_soft_reset(&mut self) {
        lock(&self.state).events.push(Event::JtagSoftReset);
    }

    fn jtag_set_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<()> {
        let mut state = lock(&self.state);
        state.events.push(Event::SetReg { reg, width, value });
        state.registers.insert(reg, value);
        Ok(())
    }

    fn jtag_get_reg(&mut self, reg: u32, width: u32, _value: u32) -> Result<u32> {
        let mut state = lock(&self.state);
        state.events.push(Event::GetReg { reg, width });
        Ok(state.registers.get(&reg).copied().unwrap_or(0))
    }

    fn lock(&mut self) {
        lock(&self.state).events.push(Event::Lock);
    }

    fn unlock(&mut self) {
        lock(&self.state).events.push(Event::Unlock);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Engine whose cable, loops and GDB server live in this process.
pub struct SimEngine {
    state: Shared,
    next_handle: AtomicUsize,
    gdb: Mutex<Option<(GdbHandle, CommandHandler)>>,
    exit_status: i32,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEngine {
    pub fn new() -> Self {
        Self {
            state: Shared::default(),
            next_handle: AtomicUsize::new(1),
            gdb: Mutex::new(None),
            exit_status: 0,
        }
    }

    /// Status reported by a blocking ioloop close, i.e. the target's exit code.
    pub fn with_exit_status(mut self, status: i32) -> Self {
        self.exit_status = status;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.state).events.clone()
    }

    pub fn clear_events(&self) {
        lock(&self.state).events.clear();
    }

    /// Fill target memory, bypassing the event log.
    pub fn poke(&self, addr: u32, data: &[u8]) {
        let mut state = lock(&self.state);
        for (offset, byte) in data.iter().enumerate() {
            state.memory.insert(addr.wrapping_add(offset as u32), *byte);
        }
    }

    /// Read target memory, bypassing the event log.
    pub fn peek(&self, addr: u32, size: usize) -> Vec<u8> {
        let state = lock(&self.state);
        (0..size)
            .map(|offset| {
                let at = addr.wrapping_add(offset as u32);
                state.memory.get(&at).copied().unwrap_or(0)
            })
            .collect()
    }

    /// Make every write that covers `addr` fail on all cables.
    pub fn fail_writes_at(&self, addr: u32) {
        lock(&self.state).fail_writes_at = Some(addr);
    }

    /// Play the debugger: hand `command` to the registered GDB callback.
    pub fn gdb_command(&self, command: &str, buf: &mut [u8]) -> Option<i32> {
        // The handler runs unlocked so it may close or reopen the server.
        let (handle, mut handler) = self.gdb.lock().unwrap_or_else(|p| p.into_inner()).take()?;
        let status = handler(command.as_bytes(), buf);
        let mut gdb = self.gdb.lock().unwrap_or_else(|p| p.into_inner());
        if gdb.is_none() && !lock(&self.state).closed_gdb.contains(&handle) {
            *gdb = Some((handle, handler));
        }
        Some(status)
    }

    fn handle(&self) -> usize {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn record(&self, event: Event) {
        lock(&self.state).events.push(event);
    }
}

impl Engine for SimEngine {
    fn open_cable(
        &self,
        kind: CableKind,
        _cable_config: Option<&str>,
        _system_config: &str,
    ) -> Result<Box<dyn Cable>> {
        self.record(Event::CableOpened(kind));
        Ok(Box::new(SimCable {
            state: self.state.clone(),
        }))
    }

    fn ioloop_open(&self, _cable: &dyn Cable, debug_struct: u32) -> Result<LoopHandle> {
        self.record(Event::IoloopOpen { debug_struct });
        Ok(LoopHandle(self.handle()))
    }

    fn ioloop_close(&self, handle: LoopHandle, kill: bool) -> i32 {
        debug!("sim: closing ioloop {:?}", handle);
        self.record(Event::IoloopClose { kill });
        if kill {
            0
        } else {
            self.exit_status
        }
    }

    fn reqloop_open(&self, _cable: &dyn Cable, debug_struct: u32) -> Result<LoopHandle> {
        self.record(Event::ReqloopOpen { debug_struct });
        Ok(LoopHandle(self.handle()))
    }

    fn reqloop_close(&self, _handle: LoopHandle, kill: bool) {
        self.record(Event::ReqloopClose { kill });
    }

    fn gdb_server_open(
        &self,
        _cable: &dyn Cable,
        port: u16,
        handler: CommandHandler,
        capabilities: &str,
    ) -> Result<GdbHandle> {
        self.record(Event::GdbOpen {
            port,
            capabilities: capabilities.to_string(),
        });
        let handle = GdbHandle(self.handle());
        *self.gdb.lock().unwrap_or_else(|p| p.into_inner()) = Some((handle, handler));
        Ok(handle)
    }

    fn gdb_server_close(&self, handle: GdbHandle, kill: bool) {
        {
            let mut state = lock(&self.state);
            state.events.push(Event::GdbClose { kill });
            state.closed_gdb.push(handle);
        }
        let mut gdb = self.gdb.lock().unwrap_or_else(|p| p.into_inner());
        if gdb.as_ref().map(|(h, _)| *h) == Some(handle) {
            *gdb = None;
        }
    }

    fn gdb_server_refresh_target(&self, _handle: GdbHandle) {
        self.record(Event::GdbRefresh);
    }
}
