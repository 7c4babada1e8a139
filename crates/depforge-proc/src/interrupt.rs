// SPDX-License-Identifier: MIT OR Apache-2.0
//! Interrupt token shared between a running process and outside contexts.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::Notify;

/// Interrupt request flag for a supervised process.
///
/// Cloneable and backed by an `Arc`; any clone — typically one held by a
/// signal handler or a shutdown coordinator — can call
/// [`interrupt`](InterruptToken::interrupt) to wake the process wait loop.
/// Whether the request actually stops the process depends on the process'
/// `terminate_on_interrupt` flag.
#[derive(Debug, Clone)]
pub struct InterruptToken {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl InterruptToken {
    /// Create a new, unsignalled token.
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request an interrupt, waking all waiters.
    pub fn interrupt(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns `true` if an interrupt has been requested.
    pub fn is_interrupted(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Wait until an interrupt is requested (returns immediately if one
    /// already was).
    pub async fn interrupted(&self) {
        // Subscribe before checking the flag: interrupt() firing between the
        // check and the await would otherwise have no subscriber and the
        // notification would be lost.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_interrupted() {
            return;
        }
        notified.await;
    }
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}
