use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use vesta_storage::RecordStore;

use crate::change::ChangeEvent;

/// Observer of applied change batches.
///
/// `before` runs while the store still reflects the state prior to the whole batch; `after`
/// runs once every event of the batch has landed.
pub trait BulkFileListener: Send {
    fn before(&mut self, _store: &RecordStore, _events: &[ChangeEvent]) {}

    fn after(&mut self, _store: &RecordStore, _events: &[ChangeEvent]) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfsNotification {
    Before(Arc<[ChangeEvent]>),
    After(Arc<[ChangeEvent]>),
}

/// Forwards every batch to a channel, for consumers living on another thread.
///
/// Sends to a disconnected receiver are dropped silently.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: Sender<VfsNotification>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<VfsNotification>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl BulkFileListener for ChannelListener {
    fn before(&mut self, _store: &RecordStore, events: &[ChangeEvent]) {
        let _ = self.tx.send(VfsNotification::Before(events.into()));
    }

    fn after(&mut self, _store: &RecordStore, events: &[ChangeEvent]) {
        let _ = self.tx.send(VfsNotification::After(events.into()));
    }
}
