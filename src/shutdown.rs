//! Shutdown signal handling.
//!
//! The main loop is synchronous, so signals are awaited on a small dedicated thread running a
//! current-thread `tokio` runtime. The thread raises a flag that the loop checks before every
//! tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::info;

/// Registered SIGINT and SIGTERM handlers.
///
/// Handlers are in place from construction on. A signal delivered before anyone waits is
/// reported by the next [`ShutdownSignals::recv`].
pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    /// Must be called from within a `tokio` runtime context.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for either signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Set `exit` once a shutdown signal arrives.
///
/// The handlers are installed before this returns.
pub fn spawn_listener(exit: Arc<AtomicBool>) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let mut signals = {
        let _guard = runtime.enter();
        ShutdownSignals::install()?
    };

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            let name = runtime.block_on(signals.recv());
            info!(signal = name, "shutdown signal received");
            exit.store(true, Ordering::Relaxed);
        })?;
    Ok(())
}
