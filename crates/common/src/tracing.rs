// Copyright (C) 2025 The telwire developers. This program is free software:
// you can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Logging setup for telwire binaries.

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Noisy dependency targets kept at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["mio", "polling"];

/// Build the level filter: `RUST_LOG` wins when set, otherwise `debug` or `info` depending on
/// `debug_fallback`.
pub fn level_filter(debug_fallback: bool) -> EnvFilter {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        return env_filter;
    }
    let level = if debug_fallback { "debug" } else { "info" };
    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    EnvFilter::new(directives.join(","))
}

/// Install the global subscriber: compact output with file/line and thread names.
///
/// Fails if a global subscriber has already been installed.
pub fn init_tracing(debug_fallback: bool) -> Result<(), eyre::Report> {
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
        .with(level_filter(debug_fallback))
        .try_init()
        .map_err(|e| eyre::eyre!("Unable to install tracing subscriber: {e}"))
}
