//! Reload notification for store snapshots

use tokio::sync::watch;

use crate::provider::ChangeToken;

/// Fires whenever a snapshot's entries are replaced
#[derive(Debug)]
pub struct ReloadTrigger {
    tx: watch::Sender<u64>,
}

impl ReloadTrigger {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Token that reports changes made after this call
    pub fn token(&self) -> WatchChangeToken {
        WatchChangeToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn fire(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    /// Number of reloads so far
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }
}

impl Default for ReloadTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ChangeToken`] backed by a `watch` receiver
#[derive(Debug, Clone)]
pub struct WatchChangeToken {
    rx: watch::Receiver<u64>,
}

impl ChangeToken for WatchChangeToken {
    fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_reports_changes_after_issuance_only() {
        let trigger = ReloadTrigger::new();
        trigger.fire();

        let token = trigger.token();
        assert!(!token.has_changed());

        trigger.fire();
        assert!(token.has_changed());
        // stays changed until replaced
        assert!(token.has_changed());

        let fresh = trigger.token();
        assert!(!fresh.has_changed());
        assert_eq!(trigger.generation(), 2);
    }
}
