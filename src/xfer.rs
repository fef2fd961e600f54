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

//! Named objects served through `qXfer:<object>:read:<annex>:<offset>,<length>`.

use thiserror::Error;

pub const EXEC_FILE: &str = "exec-file";
const BASE_CAPABILITIES: &str = "qXfer:exec-file:read+";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XferError {
    #[error("invalid object")]
    InvalidObject,
    #[error("invalid annex")]
    InvalidAnnex,
    #[error("E{0:02X}")]
    Failed(u8),
}

/// Source for objects other than `exec-file`.
pub trait XferProvider: Send {
    fn read(&self, object: &str, annex: &str) -> Result<Vec<u8>, XferError>;
}

/// Knows no extra objects.
pub struct NoObjects;

impl XferProvider for NoObjects {
    fn read(&self, _object: &str, _annex: &str) -> Result<Vec<u8>, XferError> {
        Err(XferError::InvalidObject)
    }
}

pub struct XferRegistry {
    exec_file: Option<String>,
    provider: Box<dyn XferProvider>,
    capabilities: String,
}

impl XferRegistry {
    pub fn new(exec_file: Option<String>) -> Self {
        Self {
            exec_file,
            provider: Box::new(NoObjects),
            capabilities: BASE_CAPABILITIES.to_string(),
        }
    }

    pub fn set_provider(&mut self, provider: Box<dyn XferProvider>) {
        self.provider = provider;
    }

    /// Advertised to the debugger when the GDB server opens.
    pub fn capabilities(&self) -> &str {
        &self.capabilities
    }

    pub fn set_extra_capabilities(&mut self, extra: &str) {
        self.capabilities = if extra.is_empty() {
            BASE_CAPABILITIES.to_string()
        } else {
            format!("{};{}", BASE_CAPABILITIES, extra)
        };
    }

    pub fn read_object(&self, object: &str, annex: &str) -> Result<Vec<u8>, XferError> {
        if object == EXEC_FILE {
            return Ok(self.exec_file.clone().unwrap_or_default().into_bytes());
        }
        self.provider.read(object, annex)
    }

    /// Builds the complete reply for one `qXfer` read request.
    pub fn read_reply(&self, object: &str, annex: &str, offset: usize, length: usize) -> Vec<u8> {
        match self.read_object(object, annex) {
            Ok(content) => page(&content, offset, length),
            Err(XferError::InvalidObject) => Vec::new(),
            Err(XferError::InvalidAnnex) => b"E00".to_vec(),
            Err(err @ XferError::Failed(_)) => err.to_string().into_bytes(),
        }
    }
}

/// `l` marks the last page, `m` means more data follows. An `m` page carries
/// `length - 1` bytes, one fewer than the debugger asked for.
pub fn page(content: &[u8], offset: usize, length: usize) -> Vec<u8> {
    if offset >= content.len() {
        return b"l".to_vec();
    }
    let mut reply = Vec::with_capacity(length.min(content.len() - offset) + 1);
    if offset.saturating_add(length) >= content.len() {
        reply.push(b'l');
        reply.extend_from_slice(&content[offset..]);
    } else {
        let end = offset + length.saturating_sub(1);
        reply.push(b'm');
        reply.extend_from_slice(&content[offset..end]);
    }
    reply
}
