use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Signal that ended the process's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
}

impl ShutdownSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Interrupt => "SIGINT",
        }
    }
}

/// Cancel `token` on the first SIGTERM or SIGINT.
///
/// Both handlers are registered before this returns, so a signal arriving
/// right after the call is never missed. The returned task resolves to the
/// signal received.
pub fn cancel_on_signal(token: &CancellationToken) -> std::io::Result<JoinHandle<ShutdownSignal>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let token = token.clone();

    Ok(tokio::spawn(async move {
        let received = tokio::select! {
            _ = sigterm.recv() => ShutdownSignal::Terminate,
            _ = sigint.recv() => ShutdownSignal::Interrupt,
        };
        tracing::info!(signal = received.as_str(), "Shutdown requested, draining worker");
        token.cancel();
        received
    }))
}
