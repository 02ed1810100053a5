//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM cancel the process-wide [`SHUTDOWN`] token. The
//! handler only performs atomic stores; the lifecycle controller notices the
//! cancellation on its next poll and closes the channel from a normal thread,
//! so both workers wake up and the logging thread drains what was buffered.

use pm_runtime::cancel::{CancelReason, CancelToken};

/// Cancellation token shared between the signal handlers and the pipeline.
pub static SHUTDOWN: CancelToken = CancelToken::new();

/// Map a signal number to the cancellation reason it stands for.
fn reason_for(signo: i32) -> CancelReason {
    if signo == libc::SIGTERM {
        CancelReason::Terminate
    } else {
        CancelReason::Interrupt
    }
}

#[cfg(unix)]
extern "C" fn handle_signal(signo: libc::c_int) {
    SHUTDOWN.cancel(reason_for(signo));
}

/// Register the SIGINT and SIGTERM handlers.
///
/// # Errors
///
/// Returns the OS error if a handler cannot be installed.
#[cfg(unix)]
pub fn install() -> std::io::Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );

    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler touches nothing but the atomics in SHUTDOWN.
        #[allow(unsafe_code)]
        let installed = unsafe { sigaction(signal, &action) };
        installed.map_err(std::io::Error::from)?;
    }

    tracing::debug!("Signal handlers registered");
    Ok(())
}

/// Signals are not supported here; the run ends only on its sample limit.
#[cfg(not(unix))]
pub fn install() -> std::io::Result<()> {
    tracing::warn!("Signal handling unavailable on this platform");
    Ok(())
}
