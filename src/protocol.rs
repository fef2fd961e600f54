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

//! Decoding of the queries and monitor commands the GDB server forwards to the
//! bridge, and encoding of the replies into the server's buffer.
//!
//! The dispatcher runs inside the engine's callback, so every failure becomes
//! an `E00` reply instead of escaping.

use log::{debug, warn};

use crate::error::{BridgeError, Result};
use crate::xfer::XferRegistry;

/// What the dispatcher needs from the bridge.
pub trait MonitorTarget {
    fn is_started(&self) -> bool;
    fn start(&mut self) -> Result<i32>;
    fn stop(&mut self) -> Result<i32>;
    /// Stop, reload and (for `ResetMode::Run`) restart the target.
    fn reset_target(&mut self, mode: ResetMode) -> Result<()>;
    fn xfer(&self) -> &XferRegistry;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Run,
    Halt,
}

/// Internal representation of one command from the GDB server.
#[derive(Debug, PartialEq, Eq)]
pub enum Request<'a> {
    XferRead {
        object: &'a str,
        annex: &'a str,
        offset: usize,
        length: usize,
    },
    /// A qXfer operation other than `read`.
    XferUnsupported,
    /// Decoded `qRcmd` payload.
    Monitor(String),
    /// `qRcmd` without a usable payload.
    MonitorMalformed,
    IsStarted,
    StartTarget,
    StopTarget,
    Unknown,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MonitorCommand {
    Reset(ResetMode),
    Unknown,
}

#[derive(Debug, PartialEq, Eq)]
enum Reply {
    /// ASCII text copied into the reply buffer.
    Text(Vec<u8>),
    /// Status returned to the server as is.
    Raw(i32),
}

impl Reply {
    fn text(s: &str) -> Self {
        Reply::Text(s.as_bytes().to_vec())
    }
}

pub fn parse_request(cmd: &str) -> Result<Request<'_>> {
    if cmd.starts_with("qXfer") {
        let fields: Vec<&str> = cmd.split(':').collect();
        let [_, object, operation, annex, window] = fields[..] else {
            return Err(BridgeError::Protocol(format!(
                "qXfer needs 5 fields, got {}",
                fields.len()
            )));
        };
        let (offset, length) = window
            .split_once(',')
            .ok_or_else(|| BridgeError::Protocol(format!("bad qXfer window: {}", window)))?;
        let offset = parse_hex(offset)?;
        let length = parse_hex(length)?;
        if operation != "read" {
            return Ok(Request::XferUnsupported);
        }
        return Ok(Request::XferRead {
            object,
            annex,
            offset,
            length,
        });
    }

    if cmd.starts_with("qRcmd") {
        if cmd.len() < "qRcmd".len() + 2 {
            return Ok(Request::MonitorMalformed);
        }
        let fields: Vec<&str> = cmd.split(',').collect();
        let [_, payload] = fields[..] else {
            return Ok(Request::MonitorMalformed);
        };
        let bytes = decode_hex_buf(payload.as_bytes())?;
        let text = String::from_utf8(bytes)
            .map_err(|_| BridgeError::Protocol("monitor command is not UTF-8".to_string()))?;
        return Ok(Request::Monitor(text));
    }

    Ok(if cmd.starts_with("__is_started") {
        Request::IsStarted
    } else if cmd.starts_with("__start_target") {
        Request::StartTarget
    } else if cmd.starts_with("__stop_target") {
        Request::StopTarget
    } else {
        Request::Unknown
    })
}

/// `reset`, `reset run` and `reset halt`; anything else is unknown.
pub fn parse_monitor(payload: &str) -> MonitorCommand {
    let words: Vec<&str> = payload.split(' ').collect();
    match words[..] {
        ["reset"] | ["reset", "run"] => MonitorCommand::Reset(ResetMode::Run),
        ["reset", "halt"] => MonitorCommand::Reset(ResetMode::Halt),
        _ => MonitorCommand::Unknown,
    }
}

/// Handle one command. Returns the reply length, `-(required length)` when
/// `buf` is too small, or a raw status for the `__*` verbs.
pub fn dispatch<T: MonitorTarget + ?Sized>(target: &mut T, cmd: &[u8], buf: &mut [u8]) -> i32 {
    let reply = match route(target, cmd) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Command {:?} failed: {}", String::from_utf8_lossy(cmd), e);
            Reply::text("E00")
        }
    };
    match reply {
        Reply::Raw(status) => status,
        Reply::Text(text) if text.is_ascii() => encode_reply(&text, buf),
        Reply::Text(_) => {
            warn!("Reply to {:?} is not ASCII", String::from_utf8_lossy(cmd));
            encode_reply(b"E00", buf)
        }
    }
}

fn route<T: MonitorTarget + ?Sized>(target: &mut T, cmd: &[u8]) -> Result<Reply> {
    let cmd = std::str::from_utf8(cmd)
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| BridgeError::Protocol("command is not ASCII".to_string()))?;
    debug!("GDB command: {}", cmd);

    Ok(match parse_request(cmd)? {
        Request::XferRead {
            object,
            annex,
            offset,
            length,
        } => Reply::Text(target.xfer().read_reply(object, annex, offset, length)),
        Request::XferUnsupported | Request::Unknown => Reply::text(""),
        Request::MonitorMalformed => Reply::text("E01"),
        Request::Monitor(payload) => match parse_monitor(&payload) {
            MonitorCommand::Reset(mode) => {
                target.reset_target(mode)?;
                Reply::text("OK")
            }
            MonitorCommand::Unknown => {
                debug!("Unknown monitor command: {:?}", payload);
                Reply::text("")
            }
        },
        Request::IsStarted => Reply::Raw(i32::from(target.is_started())),
        Request::StartTarget => Reply::Raw(target.start()?),
        Request::StopTarget => Reply::Raw(target.stop()?),
    })
}

/// Copies `reply` plus a NUL terminator into `buf`. When it does not fit,
/// nothing is written and `-(reply length)` is returned.
pub fn encode_reply(reply: &[u8], buf: &mut [u8]) -> i32 {
    let len = reply.len();
    if len + 1 > buf.len() {
        return -(len as i32);
    }
    buf[..len].copy_from_slice(reply);
    buf[len] = 0;
    len as i32
}

fn parse_hex(input: &str) -> Result<usize> {
    usize::from_str_radix(input, 16)
        .map_err(|_| BridgeError::Protocol(format!("invalid hex number: {:?}", input)))
}

fn ascii2byte(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

pub fn decode_hex_buf(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(BridgeError::Protocol("odd-length hex string".to_string()));
    }
    hex.chunks_exact(2)
        .map(|pair| {
            let hi = ascii2byte(pair[0]);
            let lo = ascii2byte(pair[1]);
            hi.zip(lo)
                .map(|(hi, lo)| (hi << 4) | lo)
                .ok_or_else(|| BridgeError::Protocol("invalid hex digit".to_string()))
        })
        .collect()
}

pub fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}
