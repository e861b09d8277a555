use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gencp_gateway::SimulatedDevice;
use gencp_transport::UnixDomainSocket;

use crate::cmd::SimulateArgs;
use crate::exit::{transport_error, CliError, CliResult, INTERNAL, SUCCESS};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Serve one connection at a time until Ctrl-C. Register contents persist
/// across connections; Ctrl-C takes effect once the current host disconnects.
pub fn run(args: SimulateArgs) -> CliResult<i32> {
    let listener =
        UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| transport_error("bind failed", err))?;

    let mut device = SimulatedDevice::new();
    if let Some(ms) = args.pending_ack {
        device = device.with_pending_ack(ms);
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    tracing::info!(path = %args.path.display(), "simulated device listening");

    while running.load(Ordering::SeqCst) {
        let link = match listener.try_accept() {
            Ok(Some(link)) => link,
            Ok(None) => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        tracing::info!("host connected");
        if let Err(err) = device.serve(link) {
            tracing::warn!(error = %err, "connection ended with error");
        }
    }

    tracing::info!(requests = device.handled(), "simulated device stopped");
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
