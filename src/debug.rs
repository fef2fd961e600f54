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

// Global logging setup
use flexi_logger::{FlexiLoggerError, Logger, LoggerHandle};

/// Log level spec for a `-v` count. `RUST_LOG` takes precedence.
pub fn level_spec(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize logging to stderr. Must be called once at startup; keep the
/// handle alive for the lifetime of the program.
pub fn init_logging(verbose: u8) -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_env_or_str(level_spec(verbose))?
        .log_to_stderr()
        .start()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_spec(0), "info");
        assert_eq!(level_spec(1), "debug");
        assert_eq!(level_spec(2), "trace");
        assert_eq!(level_spec(9), "trace");
    }
}
