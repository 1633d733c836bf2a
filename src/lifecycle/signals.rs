//! Termination signal handling.
//!
//! # Responsibilities
//! - Register OS handlers (SIGINT, SIGTERM)
//! - Translate them into a single pending termination request
//! - Let in-process callers (tests, embedders) request termination too
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Single slot: while one request is pending, further ones are dropped
//! - The orchestrator only ever consumes the first request

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;

/// Why the orchestrator stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Requested through a [`ShutdownTrigger`].
    Requested,
    /// The serve loop ended without being asked to.
    ServerExited,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Termination::Interrupt => "interrupt",
            Termination::Terminate => "terminate",
            Termination::Requested => "requested",
            Termination::ServerExited => "server-exited",
        };
        f.write_str(name)
    }
}

/// Receiving side of the single-slot notification.
#[derive(Debug)]
pub struct TerminationSignal {
    tx: mpsc::Sender<Termination>,
    rx: mpsc::Receiver<Termination>,
}

impl TerminationSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx }
    }

    /// A handle that can fire this signal.
    pub fn trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            tx: self.tx.clone(),
        }
    }

    /// Wait for the pending request. Cancel-safe.
    pub async fn recv(&mut self) -> Termination {
        // `self.tx` keeps the channel open, so `None` cannot happen.
        self.rx.recv().await.unwrap_or(Termination::Requested)
    }
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable sender for termination requests.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::Sender<Termination>,
}

impl ShutdownTrigger {
    /// Record a request. Returns `false` if one was already pending.
    pub fn fire(&self, reason: Termination) -> bool {
        self.tx.try_send(reason).is_ok()
    }

    /// Request termination from inside the process.
    pub fn request(&self) -> bool {
        self.fire(Termination::Requested)
    }
}

/// Forward SIGINT/SIGTERM to `trigger` until the returned task is aborted.
///
/// Handlers are registered before this returns, so a signal sent right after
/// startup is never lost. The task inherits the caller's tracing subscriber.
#[cfg(unix)]
pub fn listen_for_os_signals(trigger: ShutdownTrigger) -> JoinHandle<()> {
    use tokio::signal::unix::SignalKind;

    let interrupt = register(SignalKind::interrupt(), "SIGINT");
    let terminate = register(SignalKind::terminate(), "SIGTERM");
    tokio::spawn(forward_os_signals(trigger, interrupt, terminate).with_current_subscriber())
}

#[cfg(unix)]
fn register(
    kind: tokio::signal::unix::SignalKind,
    name: &'static str,
) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::error!(signal = name, error = %e, "Failed to install signal handler");
            None
        }
    }
}

#[cfg(unix)]
async fn forward_os_signals(
    trigger: ShutdownTrigger,
    mut interrupt: Option<tokio::signal::unix::Signal>,
    mut terminate: Option<tokio::signal::unix::Signal>,
) {
    if interrupt.is_none() && terminate.is_none() {
        return;
    }
    loop {
        let reason = tokio::select! {
            Some(()) = recv_optional(&mut interrupt) => Termination::Interrupt,
            Some(()) = recv_optional(&mut terminate) => Termination::Terminate,
            else => return,
        };
        deliver(&trigger, reason);
    }
}

#[cfg(unix)]
async fn recv_optional(stream: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

/// Forward Ctrl+C to `trigger` until the returned task is aborted.
#[cfg(not(unix))]
pub fn listen_for_os_signals(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(forward_ctrl_c(trigger).with_current_subscriber())
}

#[cfg(not(unix))]
async fn forward_ctrl_c(trigger: ShutdownTrigger) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        deliver(&trigger, Termination::Interrupt);
    }
}

fn deliver(trigger: &ShutdownTrigger, reason: Termination) {
    if trigger.fire(reason) {
        tracing::info!(signal = %reason, "Termination signal received");
    } else {
        tracing::debug!(signal = %reason, "Termination already pending, signal dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_request_is_delivered() {
        let mut signal = TerminationSignal::new();
        let trigger = signal.trigger();

        assert!(trigger.fire(Termination::Terminate));
        assert_eq!(signal.recv().await, Termination::Terminate);
    }

    #[tokio::test]
    async fn test_extra_requests_are_dropped() {
        let mut signal = TerminationSignal::new();
        let trigger = signal.trigger();
        let other = trigger.clone();

        assert!(trigger.fire(Termination::Interrupt));
        assert!(!other.request());
        assert!(!trigger.fire(Termination::Terminate));

        assert_eq!(signal.recv().await, Termination::Interrupt);
        let pending = tokio::time::timeout(Duration::from_millis(50), signal.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_slot_frees_after_consumption() {
        let mut signal = TerminationSignal::new();
        let trigger = signal.trigger();

        assert!(trigger.request());
        signal.recv().await;
        assert!(trigger.request());
    }

    #[tokio::test]
    async fn test_recv_waits_for_request() {
        let mut signal = TerminationSignal::new();
        let trigger = signal.trigger();

        let pending = tokio::time::timeout(Duration::from_millis(50), signal.recv()).await;
        assert!(pending.is_err());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.request();
        });
        assert_eq!(signal.recv().await, Termination::Requested);
    }
}
