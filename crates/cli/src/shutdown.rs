use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Turns SIGINT/SIGTERM into cancellation of the running job. The job stops
/// at its next chunk or batch boundary and keeps what it already wrote. A
/// second signal exits at once.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
    shutdown_requested: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn register_handlers(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let Some(first) = next_signal().await else {
                return;
            };
            warn!(signal = first, "Stopping after the current batch; signal again to exit now");
            coordinator.shutdown_requested.store(true, Ordering::SeqCst);
            coordinator.cancel_token.cancel();

            if let Some(second) = next_signal().await {
                warn!(signal = second, "Exiting without waiting for the job");
                std::process::exit(ExitCode::ShutdownRequested.as_i32());
            }
        });
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// Waits for the next SIGINT or SIGTERM and names it. `None` when no
/// handler could be installed.
async fn next_signal() -> Option<&'static str> {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                None
            }
        };
        let terminate = async {
            match sigterm.as_mut() {
                Some(sigterm) => {
                    sigterm.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = signal::ctrl_c() => match result {
                Ok(()) => Some("SIGINT"),
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGINT");
                    None
                }
            },
            _ = terminate => Some("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    match signal::ctrl_c().await {
        Ok(()) => Some("SIGINT"),
        Err(e) => {
            error!(error = %e, "Failed to listen for SIGINT");
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    ShutdownRequested = 130, // 128 + SIGINT
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
