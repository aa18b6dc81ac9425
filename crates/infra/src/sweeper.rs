//! Background purge of expired lease rows.
//!
//! Expiry is enforced on read, so sweeping only keeps the ledger small.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::lease::LeaseLedger;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to stop a running sweeper.
#[derive(Debug)]
pub struct LeaseSweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    purged: Arc<AtomicU64>,
}

impl LeaseSweeperHandle {
    /// Request shutdown and wait for the thread to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Rows removed since the sweeper started.
    pub fn purged(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct LeaseSweeper;

impl LeaseSweeper {
    /// Spawn the sweeper thread. Must be called from inside a tokio runtime
    /// when `ledger` is Postgres-backed; the runtime handle is carried over.
    pub fn spawn<L>(ledger: L, interval: Duration) -> std::io::Result<LeaseSweeperHandle>
    where
        L: LeaseLedger + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let purged = Arc::new(AtomicU64::new(0));
        let counter = purged.clone();
        let runtime = tokio::runtime::Handle::try_current().ok();

        let join = thread::Builder::new()
            .name("lease-sweeper".to_string())
            .spawn(move || {
                let _guard = runtime.as_ref().map(|h| h.enter());
                sweep_loop(&ledger, interval, shutdown_rx, &counter);
            })?;

        info!(interval_ms = interval.as_millis() as u64, "lease sweeper started");
        Ok(LeaseSweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            purged,
        })
    }
}

fn sweep_loop<L: LeaseLedger>(
    ledger: &L,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
    purged: &AtomicU64,
) {
    loop {
        match shutdown_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        match ledger.purge_expired() {
            Ok(0) => {}
            Ok(n) => {
                purged.fetch_add(n as u64, Ordering::Relaxed);
                debug!(purged = n, "expired leases removed");
            }
            Err(e) => warn!(error = %e, "lease sweep failed"),
        }
    }
    debug!("lease sweeper stopped");
}
