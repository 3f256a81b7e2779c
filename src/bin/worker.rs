//! fsbridge worker process.
//!
//! Reads one JSON request per line from stdin and writes one response per
//! line to stdout until stdin closes. Logs go to stderr.

use std::io;
use std::process::ExitCode;

use fsbridge::logging::set_up_logging;
use fsbridge::worker::Worker;
use tracing::{error, info};

fn main() -> ExitCode {
    set_up_logging();
    info!(pid = std::process::id(), "worker started");

    let stdin = io::stdin();
    let stdout = io::stdout();
    match Worker::new().serve(stdin.lock(), stdout.lock()) {
        Ok(()) => {
            info!("stdin closed, worker exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "worker i/o failed");
            ExitCode::FAILURE
        }
    }
}
