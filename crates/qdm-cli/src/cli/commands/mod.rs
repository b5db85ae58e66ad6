//! CLI command handlers, one file per command.

mod add;
mod download;
mod follow;
mod queue;
mod remove;
mod status;

pub use add::run_add;
pub use download::run_download;
pub use queue::{run_queue_add, run_queue_list, run_queue_move, run_queue_start, run_queue_stop};
pub use remove::run_remove;
pub use status::run_status;

/// Human-readable byte count in binary units.
pub(crate) fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if n < 1024 {
        return format!("{n} B");
    }
    let mut value = n as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
