// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pending acknowledgement registry
//!
//! A waiter registers its identifier before the command is written, blocks
//! on the returned receiver outside every lock, and releases the registration
//! when it returns whatever the outcome. At most one registration exists per
//! identifier; a newer one replaces the older, whose waiter then times out.

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Handle returned by [`PendingAcks::register`]
#[derive(Debug)]
pub struct AckWaiter {
    id: String,
    seq: u64,
    rx: Receiver<()>,
}

impl AckWaiter {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block until the acknowledgement arrives or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct PendingAcks {
    entries: Mutex<HashMap<String, (u64, Sender<()>)>>,
    next_seq: AtomicU64,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str) -> AckWaiter {
        let (tx, rx) = bounded(1);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id.to_string(), (seq, tx));
        AckWaiter {
            id: id.to_string(),
            seq,
            rx,
        }
    }

    /// Deliver an acknowledgement. The entry is removed, so a duplicate
    /// acknowledgement for the same identifier wakes nobody.
    pub fn signal(&self, id: &str) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some((_, tx)) => tx.try_send(()).is_ok(),
            None => false,
        }
    }

    /// Remove the waiter's registration if it is still the current one
    pub fn release(&self, waiter: &AckWaiter) {
        let mut entries = self.entries.lock();
        if entries.get(&waiter.id).map(|(seq, _)| *seq) == Some(waiter.seq) {
            entries.remove(&waiter.id);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let acks = PendingAcks::new();
        let waiter = acks.register("CALIBRATE_SHOW");
        assert!(acks.signal("CALIBRATE_SHOW"));
        assert!(waiter.wait(Duration::from_millis(10)));
        acks.release(&waiter);
        assert_eq!(acks.pending_count(), 0);
    }

    #[test]
    fn test_delivery_is_at_most_once() {
        let acks = PendingAcks::new();
        let _waiter = acks.register("CALIBRATE_START");
        assert!(acks.signal("CALIBRATE_START"));
        assert!(!acks.signal("CALIBRATE_START"));
    }

    #[test]
    fn test_timeout_then_release_leaves_nothing() {
        let acks = PendingAcks::new();
        let waiter = acks.register("CALIBRATE_CLEAR");
        assert!(!waiter.wait(Duration::from_millis(5)));
        acks.release(&waiter);
        assert_eq!(acks.pending_count(), 0);
    }

    #[test]
    fn test_stale_release_keeps_newer_registration() {
        let acks = PendingAcks::new();
        let old = acks.register("CALIBRATE_ADDPOINT");
        let new = acks.register("CALIBRATE_ADDPOINT");
        acks.release(&old);
        assert_eq!(acks.pending_count(), 1);
        assert!(acks.signal("CALIBRATE_ADDPOINT"));
        assert!(new.wait(Duration::from_millis(10)));
        assert!(!old.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_cross_thread_signal() {
        let acks = Arc::new(PendingAcks::new());
        let waiter = acks.register("ENABLE_SEND_DATA");
        let signaller = Arc::clone(&acks);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal("ENABLE_SEND_DATA")
        });
        assert!(waiter.wait(Duration::from_secs(2)));
        assert!(handle.join().unwrap());
        acks.release(&waiter);
    }
}
