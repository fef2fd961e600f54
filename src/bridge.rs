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

//! The bridge: owns the binaries, the cable and the engine services, and
//! drives the target through reset, load, start and stop.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info, warn};

use crate::config::{BridgeSettings, Config};
use crate::elf_items::BinaryImage;
use crate::engine::{Cable, CableKind, CommandHandler, Engine, GdbHandle, LoopHandle};
use crate::error::{BridgeError, Result};
use crate::loader::ElfLoader;
use crate::memory::MemoryPort;
use crate::protocol::{self, MonitorTarget, ResetMode};
use crate::symbols::SymbolResolver;
use crate::utils::absolute_path;
use crate::xfer::{XferProvider, XferRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Unloaded,
    Loaded,
    Running,
    Halted,
}

/// Bridge state. Use [`DebugBridge`] to share it with the GDB server.
pub struct Bridge {
    engine: Arc<dyn Engine>,
    config: Config,
    settings: BridgeSettings,
    cable_kind: Option<CableKind>,
    images: Arc<Vec<BinaryImage>>,
    cable: Option<Box<dyn Cable>>,
    state: TargetState,
    started: bool,
    debug_struct: Option<u32>,
    ioloop: Option<LoopHandle>,
    reqloop: Option<LoopHandle>,
    gdb: Option<GdbHandle>,
    xfer: XferRegistry,
}

impl Bridge {
    /// Parses every binary up front. The cable is only opened on first use.
    pub fn new(engine: Arc<dyn Engine>, config: Config, binaries: &[PathBuf]) -> Result<Self> {
        let settings = BridgeSettings::from_config(&config)?;
        let cable_kind = settings
            .cable_type
            .as_deref()
            .map(str::parse::<CableKind>)
            .transpose()?;

        let images = binaries
            .iter()
            .map(|path| BinaryImage::load(path))
            .collect::<Result<Vec<_>>>()?;
        for image in &images {
            debug!(
                "{}: entry 0x{:x}, {} segments, {} symbols",
                image.path.display(),
                image.entry,
                image.segments.len(),
                image.symbols.len()
            );
        }
        let exec_file = binaries.first().map(|path| absolute_path(path));

        Ok(Self {
            engine,
            config,
            settings,
            cable_kind,
            images: Arc::new(images),
            cable: None,
            state: TargetState::Unloaded,
            started: false,
            debug_struct: None,
            ioloop: None,
            reqloop: None,
            gdb: None,
            xfer: XferRegistry::new(exec_file),
        })
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn images(&self) -> &[BinaryImage] {
        &self.images
    }

    fn mount_cable(&self) -> Result<Box<dyn Cable>> {
        let kind = self.cable_kind.ok_or_else(|| {
            BridgeError::Config("debug_bridge/cable/type is not set".to_string())
        })?;
        info!("Opening {:?} cable", kind);
        let cable_config = self.config.dump_section("**/debug_bridge/cable");
        self.engine
            .open_cable(kind, cable_config.as_deref(), &self.config.dump())
    }

    /// The cable, opened on first use.
    pub fn cable(&mut self) -> Result<&mut dyn Cable> {
        let cable = match self.cable.take() {
            Some(cable) => cable,
            None => self.mount_cable()?,
        };
        Ok(&mut **self.cable.insert(cable))
    }

    /// Pulses the JTAG and chip resets. Target state is left alone.
    pub fn reset(&mut self) -> Result<i32> {
        info!("Resetting target");
        let cable = self.cable()?;
        cable.jtag_reset(true);
        cable.jtag_reset(false);
        cable.chip_reset(true);
        cable.chip_reset(false);
        Ok(0)
    }

    pub fn load(&mut self) -> Result<u32> {
        let images = self.images.clone();
        let mode = self.settings.boot_mode;
        let set_pc_addr = self.settings.set_pc_addr;
        let status =
            ElfLoader::new(MemoryPort::new(self.cable()?), set_pc_addr).load(mode, &images)?;
        // A fresh image needs a fresh start.
        self.state = TargetState::Loaded;
        self.started = false;
        Ok(status)
    }

    pub fn start(&mut self) -> Result<i32> {
        let Some(doorbell) = self.settings.start else {
            debug!("No start doorbell configured");
            return Ok(0);
        };
        if self.state == TargetState::Unloaded {
            return Err(BridgeError::NotLoaded);
        }
        info!(
            "Starting execution (addr: 0x{:x}, value: 0x{:x})",
            doorbell.addr, doorbell.value
        );
        MemoryPort::new(self.cable()?).write_u32(doorbell.addr, doorbell.value)?;
        self.started = true;
        self.state = TargetState::Running;
        Ok(0)
    }

    pub fn stop(&mut self) -> Result<i32> {
        let Some(doorbell) = self.settings.stop else {
            debug!("No stop doorbell configured");
            return Ok(0);
        };
        info!(
            "Stopping execution (addr: 0x{:x}, value: 0x{:x})",
            doorbell.addr, doorbell.value
        );
        MemoryPort::new(self.cable()?).write_u32(doorbell.addr, doorbell.value)?;
        self.started = false;
        if self.state == TargetState::Running {
            self.state = TargetState::Halted;
        }
        Ok(0)
    }

    pub fn flash(&mut self) -> Result<i32> {
        Err(BridgeError::Unsupported("flash"))
    }

    pub fn lock(&mut self) -> Result<()> {
        self.cable()?.lock();
        Ok(())
    }

    pub fn unlock(&mut self) -> Result<()> {
        self.cable()?.unlock();
        Ok(())
    }

    /// Address of the runtime debug structure, remembered once found.
    fn cached_debug_struct(&mut self) -> Result<u32> {
        if let Some(addr) = self.debug_struct {
            return Ok(addr);
        }
        let addr = resolve_debug_struct(&self.images)?;
        self.debug_struct = Some(addr);
        Ok(addr)
    }

    /// (Re)starts the I/O pump. A running one is killed first.
    pub fn ioloop(&mut self) -> Result<()> {
        let debug_struct = self.cached_debug_struct()?;
        if let Some(handle) = self.ioloop.take() {
            debug!("Killing previous ioloop {:?}", handle);
            self.engine.ioloop_close(handle, true);
        }
        let engine = self.engine.clone();
        let handle = engine.ioloop_open(self.cable()?, debug_struct)?;
        info!("Started ioloop (debug struct: 0x{:x})", debug_struct);
        self.ioloop = Some(handle);
        Ok(())
    }

    pub fn reqloop(&mut self) -> Result<()> {
        let debug_struct = resolve_debug_struct(&self.images)?;
        if let Some(handle) = self.reqloop {
            warn!("Request loop {:?} is already running, opening another", handle);
        }
        let engine = self.engine.clone();
        let handle = engine.reqloop_open(self.cable()?, debug_struct)?;
        info!("Started request loop (debug struct: 0x{:x})", debug_struct);
        self.reqloop = Some(handle);
        Ok(())
    }

    fn open_gdb(&mut self, port: u16, handler: CommandHandler) -> Result<()> {
        if let Some(handle) = self.gdb.take() {
            debug!("Killing previous GDB server {:?}", handle);
            self.engine.gdb_server_close(handle, true);
        }
        let engine = self.engine.clone();
        let capabilities = self.xfer.capabilities().to_string();
        let handle = engine.gdb_server_open(self.cable()?, port, handler, &capabilities)?;
        info!("GDB server listening on port {}", port);
        self.gdb = Some(handle);
        Ok(())
    }

    pub fn set_capabilities(&mut self, extra: &str) {
        self.xfer.set_extra_capabilities(extra);
    }

    pub fn set_xfer_provider(&mut self, provider: Box<dyn XferProvider>) {
        self.xfer.set_provider(provider);
    }
}

fn resolve_debug_struct(images: &[BinaryImage]) -> Result<u32> {
    match SymbolResolver::new(images).resolve_debug_struct() {
        0 => Err(BridgeError::DebugStructNotFound),
        addr => Ok(addr),
    }
}

impl MonitorTarget for Bridge {
    fn is_started(&self) -> bool {
        self.started
    }

    fn start(&mut self) -> Result<i32> {
        Bridge::start(self)
    }

    fn stop(&mut self) -> Result<i32> {
        Bridge::stop(self)
    }

    /// Steps already done are not rolled back when a later one fails.
    fn reset_target(&mut self, mode: ResetMode) -> Result<()> {
        info!("Monitor reset ({:?})", mode);
        if let Some(handle) = self.ioloop.take() {
            self.engine.ioloop_close(handle, true);
        }
        Bridge::stop(self)?;
        self.load()?;
        if let Some(handle) = self.gdb {
            self.engine.gdb_server_refresh_target(handle);
        }
        self.ioloop()?;
        if mode == ResetMode::Run {
            Bridge::start(self)?;
        }
        Ok(())
    }

    fn xfer(&self) -> &XferRegistry {
        &self.xfer
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // The engine must stop calling back before the state goes away.
        if let Some(handle) = self.gdb.take() {
            self.engine.gdb_server_close(handle, true);
        }
        if let Some(handle) = self.ioloop.take() {
            self.engine.ioloop_close(handle, true);
        }
        if let Some(handle) = self.reqloop.take() {
            self.engine.reqloop_close(handle, true);
        }
    }
}

/// Shared handle on a [`Bridge`]. The GDB server's callback only holds a weak
/// reference, so dropping the last handle shuts the bridge down.
#[derive(Clone)]
pub struct DebugBridge {
    inner: Arc<Mutex<Bridge>>,
}

impl DebugBridge {
    pub fn new(engine: Arc<dyn Engine>, config: Config, binaries: &[PathBuf]) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Bridge::new(engine, config, binaries)?)),
        })
    }

    /// Direct access to the bridge state. Do not hold it across `wait`.
    pub fn bridge(&self) -> MutexGuard<'_, Bridge> {
        lock_bridge(&self.inner)
    }

    pub fn state(&self) -> TargetState {
        self.bridge().state()
    }

    pub fn is_started(&self) -> bool {
        self.bridge().started
    }

    pub fn reset(&self) -> Result<i32> {
        self.bridge().reset()
    }

    pub fn load(&self) -> Result<u32> {
        self.bridge().load()
    }

    pub fn start(&self) -> Result<i32> {
        self.bridge().start()
    }

    pub fn stop(&self) -> Result<i32> {
        self.bridge().stop()
    }

    pub fn flash(&self) -> Result<i32> {
        self.bridge().flash()
    }

    pub fn lock(&self) -> Result<()> {
        self.bridge().lock()
    }

    pub fn unlock(&self) -> Result<()> {
        self.bridge().unlock()
    }

    pub fn ioloop(&self) -> Result<()> {
        self.bridge().ioloop()
    }

    pub fn reqloop(&self) -> Result<()> {
        self.bridge().reqloop()
    }

    pub fn set_capabilities(&self, extra: &str) {
        self.bridge().set_capabilities(extra);
    }

    pub fn set_xfer_provider(&self, provider: Box<dyn XferProvider>) {
        self.bridge().set_xfer_provider(provider);
    }

    /// Runs one GDB command against the bridge, as the server callback does.
    pub fn dispatch(&self, cmd: &[u8], buf: &mut [u8]) -> i32 {
        protocol::dispatch(&mut *self.bridge(), cmd, buf)
    }

    /// Opens the GDB server and routes its commands to this bridge.
    pub fn gdb(&self, port: u16) -> Result<()> {
        let weak: Weak<Mutex<Bridge>> = Arc::downgrade(&self.inner);
        let handler: CommandHandler =
            Box::new(move |cmd: &[u8], buf: &mut [u8]| match weak.upgrade() {
                Some(inner) => protocol::dispatch(&mut *lock_bridge(&inner), cmd, buf),
                None => {
                    warn!("GDB command {:?} after bridge shutdown", String::from_utf8_lossy(cmd));
                    protocol::encode_reply(b"E00", buf)
                }
            });
        self.bridge().open_gdb(port, handler)
    }

    /// Waits for the session to end: the debugger to detach, then the target
    /// to exit. Returns the target's exit status when an ioloop was running.
    pub fn wait(&self) -> Result<i32> {
        let (engine, gdb, ioloop, reqloop) = {
            let bridge = self.bridge();
            (bridge.engine.clone(), bridge.gdb, bridge.ioloop, bridge.reqloop)
        };

        // The bridge stays unlocked while blocking, the server may still call in.
        if let Some(handle) = gdb {
            info!("Waiting for GDB server to finish");
            engine.gdb_server_close(handle, false);
            let mut bridge = self.bridge();
            if bridge.gdb == Some(handle) {
                bridge.gdb = None;
            }
        }

        if let Some(handle) = ioloop {
            info!("Waiting for target to exit");
            let status = engine.ioloop_close(handle, false);
            let mut bridge = self.bridge();
            if bridge.ioloop == Some(handle) {
                bridge.ioloop = None;
            }
            info!("Target exited with status {}", status);
            return Ok(status);
        }

        if let Some(handle) = reqloop {
            engine.reqloop_close(handle, false);
            let mut bridge = self.bridge();
            if bridge.reqloop == Some(handle) {
                bridge.reqloop = None;
            }
        }
        Ok(0)
    }
}

fn lock_bridge(inner: &Mutex<Bridge>) -> MutexGuard<'_, Bridge> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
