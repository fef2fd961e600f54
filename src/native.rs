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

//! Engine backed by the native debug bridge library.
//!
//! Uses libloading to load the shared library and call its C API. The GDB
//! server's command callback carries no user data, so at most one server per
//! process can be routed to Rust; its handler lives in a global slot.

use std::any::Any;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use libloading::Library;
use log::{debug, error, info};

use crate::engine::{Cable, CableKind, CommandHandler, Engine, GdbHandle, LoopHandle};
use crate::error::{BridgeError, Result};
use crate::protocol::encode_reply;

pub const DEFAULT_LIBRARY: &str = "libpulpdebugbridge.so";

type CommandCallback = extern "C" fn(*const c_char, *mut c_char, c_int) -> c_int;

type BridgeInit = unsafe extern "C" fn(*const c_char, c_int);
type BridgeGetError = unsafe extern "C" fn() -> *const c_char;
type CableNew = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut c_void;
type CableAccess = unsafe extern "C" fn(*mut c_void, c_uint, c_int, *mut c_char);
type CableSetLine = unsafe extern "C" fn(*mut c_void, bool);
type CableOp = unsafe extern "C" fn(*mut c_void);
type CableSetReg = unsafe extern "C" fn(*mut c_void, c_int, c_int, c_uint) -> bool;
type CableGetReg = unsafe extern "C" fn(*mut c_void, c_int, c_int, *mut c_uint, c_uint) -> bool;
type LoopOpen = unsafe extern "C" fn(*mut c_void, c_uint) -> *mut c_void;
type IoloopClose = unsafe extern "C" fn(*mut c_void, c_int) -> c_int;
type ReqloopClose = unsafe extern "C" fn(*mut c_void, c_int);
type GdbServerOpen =
    unsafe extern "C" fn(*mut c_void, c_int, CommandCallback, *const c_char) -> *mut c_void;
type GdbServerClose = unsafe extern "C" fn(*mut c_void, c_int);
type GdbServerRefresh = unsafe extern "C" fn(*mut c_void);

struct NativeApi {
    bridge_init: BridgeInit,
    bridge_get_error: BridgeGetError,
    cable_new: CableNew,
    cable_write: CableAccess,
    cable_read: CableAccess,
    chip_reset: CableSetLine,
    jtag_reset: CableSetLine,
    jtag_soft_reset: CableOp,
    cable_jtag_set_reg: CableSetReg,
    cable_jtag_get_reg: CableGetReg,
    cable_lock: CableOp,
    cable_unlock: CableOp,
    ioloop_open: LoopOpen,
    ioloop_close: IoloopClose,
    reqloop_open: LoopOpen,
    reqloop_close: ReqloopClose,
    gdb_server_open: GdbServerOpen,
    gdb_server_close: GdbServerClose,
    gdb_server_refresh_target: GdbServerRefresh,
}

impl NativeApi {
    unsafe fn load(lib: &Library) -> Result<Self> {
        Ok(Self {
            bridge_init: load_symbol(lib, b"bridge_init", "bridge_init")?,
            bridge_get_error: load_symbol(lib, b"bridge_get_error", "bridge_get_error")?,
            cable_new: load_symbol(lib, b"cable_new", "cable_new")?,
            cable_write: load_symbol(lib, b"cable_write", "cable_write")?,
            cable_read: load_symbol(lib, b"cable_read", "cable_read")?,
            chip_reset: load_symbol(lib, b"chip_reset", "chip_reset")?,
            jtag_reset: load_symbol(lib, b"jtag_reset", "jtag_reset")?,
            jtag_soft_reset: load_symbol(lib, b"jtag_soft_reset", "jtag_soft_reset")?,
            cable_jtag_set_reg: load_symbol(lib, b"cable_jtag_set_reg", "cable_jtag_set_reg")?,
            cable_jtag_get_reg: load_symbol(lib, b"cable_jtag_get_reg", "cable_jtag_get_reg")?,
            cable_lock: load_symbol(lib, b"cable_lock", "cable_lock")?,
            cable_unlock: load_symbol(lib, b"cable_unlock", "cable_unlock")?,
            ioloop_open: load_symbol(lib, b"bridge_ioloop_open", "bridge_ioloop_open")?,
            ioloop_close: load_symbol(lib, b"bridge_ioloop_close", "bridge_ioloop_close")?,
            reqloop_open: load_symbol(lib, b"bridge_reqloop_open", "bridge_reqloop_open")?,
            reqloop_close: load_symbol(lib, b"bridge_reqloop_close", "bridge_reqloop_close")?,
            gdb_server_open: load_symbol(lib, b"gdb_server_open", "gdb_server_open")?,
            gdb_server_close: load_symbol(lib, b"gdb_server_close", "gdb_server_close")?,
            gdb_server_refresh_target: load_symbol(
                lib,
                b"gdb_server_refresh_target",
                "gdb_server_refresh_target",
            )?,
        })
    }

    fn last_error(&self) -> String {
        let msg = unsafe { (self.bridge_get_error)() };
        if msg.is_null() {
            return "unknown error".to_string();
        }
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

unsafe fn load_symbol<T: Copy>(
    lib: &Library,
    symbol: &'static [u8],
    label: &'static str,
) -> Result<T> {
    let sym: libloading::Symbol<T> = lib
        .get(symbol)
        .map_err(|e| BridgeError::SymbolNotFound(label.to_string(), e))?;
    Ok(*sym)
}

fn c_string(label: &str, value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| BridgeError::Engine(format!("{} contains a NUL byte", label)))
}

fn c_size(size: usize) -> Result<c_int> {
    c_int::try_from(size)
        .map_err(|_| BridgeError::Engine(format!("transfer of {} bytes is too large", size)))
}

pub struct NativeEngine {
    api: Arc<NativeApi>,
    _lib: Library,
}

impl NativeEngine {
    /// Loads the engine library and initializes it with the system configuration.
    pub fn load(path: &Path, system_config: &str, verbose: u8) -> Result<Self> {
        info!("Loading engine library {}", path.display());
        let lib = unsafe { Library::new(path)? };
        let api = unsafe { NativeApi::load(&lib)? };
        let config = c_string("system configuration", system_config)?;
        unsafe { (api.bridge_init)(config.as_ptr(), c_int::from(verbose)) };
        Ok(Self {
            api: Arc::new(api),
            _lib: lib,
        })
    }

    fn instance(cable: &dyn Cable) -> Result<*mut c_void> {
        cable
            .as_any()
            .downcast_ref::<NativeCable>()
            .map(|c| c.instance)
            .ok_or_else(|| {
                BridgeError::Engine("cable was not opened by the native engine".to_string())
            })
    }
}

impl Engine for NativeEngine {
    fn open_cable(
        &self,
        kind: CableKind,
        cable_config: Option<&str>,
        system_config: &str,
    ) -> Result<Box<dyn Cable>> {
        debug!("Creating native {:?} cable", kind);
        let cable_config = cable_config
            .map(|c| c_string("cable configuration", c))
            .transpose()?;
        let system_config = c_string("system configuration", system_config)?;
        let instance = unsafe {
            (self.api.cable_new)(
                cable_config.as_ref().map_or(std::ptr::null(), |c| c.as_ptr()),
                system_config.as_ptr(),
            )
        };
        if instance.is_null() {
            return Err(BridgeError::CableOpen(self.api.last_error()));
        }
        Ok(Box::new(NativeCable {
            api: self.api.clone(),
            instance,
        }))
    }

    fn ioloop_open(&self, cable: &dyn Cable, debug_struct: u32) -> Result<LoopHandle> {
        let handle = unsafe { (self.api.ioloop_open)(Self::instance(cable)?, debug_struct) };
        if handle.is_null() {
            return Err(BridgeError::Engine(format!("ioloop: {}", self.api.last_error())));
        }
        Ok(LoopHandle(handle as usize))
    }

    fn ioloop_close(&self, handle: LoopHandle, kill: bool) -> i32 {
        unsafe { (self.api.ioloop_close)(handle.0 as *mut c_void, c_int::from(kill)) }
    }

    fn reqloop_open(&self, cable: &dyn Cable, debug_struct: u32) -> Result<LoopHandle> {
        let handle = unsafe { (self.api.reqloop_open)(Self::instance(cable)?, debug_struct) };
        if handle.is_null() {
            return Err(BridgeError::Engine(format!("reqloop: {}", self.api.last_error())));
        }
        Ok(LoopHandle(handle as usize))
    }

    fn reqloop_close(&self, handle: LoopHandle, kill: bool) {
        unsafe { (self.api.reqloop_close)(handle.0 as *mut c_void, c_int::from(kill)) }
    }

    fn gdb_server_open(
        &self,
        cable: &dyn Cable,
        port: u16,
        handler: CommandHandler,
        capabilities: &str,
    ) -> Result<GdbHandle> {
        let instance = Self::instance(cable)?;
        let capabilities = c_string("capabilities", capabilities)?;
        let generation = install_handler(handler);
        let handle = unsafe {
            (self.api.gdb_server_open)(
                instance,
                c_int::from(port),
                command_trampoline,
                capabilities.as_ptr(),
            )
        };
        if handle.is_null() {
            remove_handler(generation);
            return Err(BridgeError::Engine(format!("GDB server: {}", self.api.last_error())));
        }
        Ok(GdbHandle(handle as usize))
    }

    fn gdb_server_close(&self, handle: GdbHandle, kill: bool) {
        unsafe { (self.api.gdb_server_close)(handle.0 as *mut c_void, c_int::from(kill)) };
        remove_handler(GENERATION.load(Ordering::SeqCst));
    }

    fn gdb_server_refresh_target(&self, handle: GdbHandle) {
        unsafe { (self.api.gdb_server_refresh_target)(handle.0 as *mut c_void) }
    }
}

/// Cable instance created by the engine library.
pub struct NativeCable {
    api: Arc<NativeApi>,
    instance: *mut c_void,
}

// The engine serializes access to a cable instance internally.
unsafe impl Send for NativeCable {}

impl Cable for NativeCable {
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let size = c_size(data.len())?;
        // The C API takes a mutable pointer for both directions.
        let mut buffer = data.to_vec();
        unsafe { (self.api.cable_write)(self.instance, addr, size, buffer.as_mut_ptr().cast()) };
        Ok(())
    }

    fn read(&mut self, addr: u32, size: usize) -> Result<Vec<u8>> {
        let c_len = c_size(size)?;
        let mut buffer = vec![0u8; size];
        unsafe { (self.api.cable_read)(self.instance, addr, c_len, buffer.as_mut_ptr().cast()) };
        Ok(buffer)
    }

    fn chip_reset(&mut self, active: bool) {
        unsafe { (self.api.chip_reset)(self.instance, active) }
    }

    fn jtag_reset(&mut self, active: bool) {
        unsafe { (self.api.jtag_reset)(self.instance, active) }
    }

    fn jtag_soft_reset(&mut self) {
        unsafe { (self.api.jtag_soft_reset)(self.instance) }
    }

    fn jtag_set_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<()> {
        let ok = unsafe {
            (self.api.cable_jtag_set_reg)(self.instance, reg as c_int, width as c_int, value)
        };
        if !ok {
            return Err(BridgeError::Engine(format!("failed to set JTAG register {}", reg)));
        }
        Ok(())
    }

    fn jtag_get_reg(&mut self, reg: u32, width: u32, value: u32) -> Result<u32> {
        let mut out: c_uint = 0;
        let ok = unsafe {
            (self.api.cable_jtag_get_reg)(
                self.instance,
                reg as c_int,
                width as c_int,
                &mut out,
                value,
            )
        };
        if !ok {
            return Err(BridgeError::Engine(format!("failed to get JTAG register {}", reg)));
        }
        Ok(out)
    }

    fn lock(&mut self) {
        unsafe { (self.api.cable_lock)(self.instance) }
    }

    fn unlock(&mut self) {
        unsafe { (self.api.cable_unlock)(self.instance) }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Handler of the open GDB server, tagged with the generation it was installed under.
static HANDLER: Mutex<Option<(usize, CommandHandler)>> = Mutex::new(None);
static GENERATION: AtomicUsize = AtomicUsize::new(0);

fn handler_slot() -> MutexGuard<'static, Option<(usize, CommandHandler)>> {
    HANDLER.lock().unwrap_or_else(PoisonError::into_inner)
}

fn install_handler(handler: CommandHandler) -> usize {
    let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
    *handler_slot() = Some((generation, handler));
    generation
}

fn remove_handler(generation: usize) {
    let _ = GENERATION.compare_exchange(
        generation,
        generation + 1,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    let mut slot = handler_slot();
    if slot.as_ref().is_some_and(|(g, _)| *g == generation) {
        *slot = None;
    }
}

/// Runs the handler outside the slot lock, so it may close the server itself.
fn call_handler(cmd: &[u8], buf: &mut [u8]) -> i32 {
    let Some((generation, mut handler)) = handler_slot().take() else {
        return encode_reply(b"E00", buf);
    };
    let status = handler(cmd, buf);
    let mut slot = handler_slot();
    if slot.is_none() && GENERATION.load(Ordering::SeqCst) == generation {
        *slot = Some((generation, handler));
    }
    status
}

extern "C" fn command_trampoline(cmd: *const c_char, buf: *mut c_char, len: c_int) -> c_int {
    if cmd.is_null() || buf.is_null() || len < 0 {
        return 0;
    }
    let cmd = unsafe { CStr::from_ptr(cmd) }.to_bytes();
    let buf = unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), len as usize) };
    match panic::catch_unwind(AssertUnwindSafe(|| call_handler(cmd, &mut *buf))) {
        Ok(status) => status,
        Err(_) => {
            error!("GDB command handler panicked");
            encode_reply(b"E00", buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_reported() {
        let err = NativeEngine::load(Path::new("/nonexistent/libnothing.so"), "{}", 0)
            .err()
            .expect("load should fail");
        assert!(matches!(err, BridgeError::Library(_)));
    }

    #[test]
    fn trampoline_routes_to_installed_handler() {
        let generation = install_handler(Box::new(|cmd: &[u8], buf: &mut [u8]| {
            encode_reply(if cmd == b"ping" { b"pong" } else { b"" }, buf)
        }));

        let cmd = CString::new("ping").unwrap();
        let mut buf = [0 as c_char; 16];
        let n = command_trampoline(cmd.as_ptr(), buf.as_mut_ptr(), buf.len() as c_int);
        assert_eq!(n, 4);
        let reply = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(reply.to_bytes(), b"pong");

        remove_handler(generation);
        let n = command_trampoline(cmd.as_ptr(), buf.as_mut_ptr(), buf.len() as c_int);
        assert_eq!(n, 3);
        let reply = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(reply.to_bytes(), b"E00");
    }
}
