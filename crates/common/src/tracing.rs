// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Shared tracing initialization for programs embedding tablebox.

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// The storage engine underneath is chatty at debug level.
const QUIET_DIRECTIVES: &str = "fjall=warn,lsm_tree=warn";

#[derive(Debug, thiserror::Error)]
pub enum TracingInitError {
    #[error("Invalid filter directive: {0}")]
    Filter(String),
    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Initialize tracing, honouring `RUST_LOG` when set.
///
/// When `RUST_LOG` is absent, `debug_fallback` picks DEBUG over INFO.
pub fn init_tracing(debug_fallback: bool) -> Result<(), TracingInitError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = if debug_fallback { "debug" } else { "info" };
            EnvFilter::try_new(format!("{level},{QUIET_DIRECTIVES}"))
                .map_err(|e| TracingInitError::Filter(e.to_string()))?
        }
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(true)
                .with_file(true)
                .with_target(false)
                .with_line_number(true)
                .with_thread_names(true)
                .with_span_events(fmt::format::FmtSpan::NONE),
        )
        .with(filter)
        .try_init()
        .map_err(|e| TracingInitError::AlreadyInstalled(e.to_string()))
}
