//! Bounded inbox of received messages
//!
//! A FIFO deque keyed by UUID: appending past capacity evicts the oldest
//! record. Everything lives in memory; the inbox does not survive restarts.
//! Only `received_message` events reach this type — routing of other event
//! kinds is the bridge's job.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use jabber_protocol::ReceivedMessage;

/// Inbound bodies longer than this are rejected at admission
pub const MAX_BODY_BYTES: usize = 8 * 1024;

/// A stored inbox record
#[derive(Debug, Clone, Serialize)]
pub struct InboxRecord {
    pub uuid: Uuid,
    pub from_jid: String,
    pub body: String,
    /// Monotonic seconds at ingestion
    pub ts: f64,
    /// Wall-clock arrival time, for human-facing output
    pub received_at: DateTime<Utc>,
}

/// Inbox statistics
#[derive(Debug, Clone, Serialize)]
pub struct InboxStats {
    pub total: usize,
    pub capacity: usize,
    pub utilization_percent: f64,
}

/// Bounded FIFO store of received messages
pub struct Inbox {
    records: Mutex<VecDeque<InboxRecord>>,
    capacity: usize,
}

impl Inbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Append a received message, evicting the oldest record when full.
    ///
    /// Returns the generated UUID, or `None` when the body exceeds
    /// [`MAX_BODY_BYTES`] (logged and dropped).
    pub async fn append(&self, msg: &ReceivedMessage) -> Option<Uuid> {
        if msg.body.len() > MAX_BODY_BYTES {
            debug!(from = %msg.from_jid, len = msg.body.len(), "dropping oversized message");
            return None;
        }

        let record = InboxRecord {
            uuid: Uuid::new_v4(),
            from_jid: msg.from_jid.clone(),
            body: msg.body.clone(),
            ts: msg.ts,
            received_at: Utc::now(),
        };
        let uuid = record.uuid;

        let mut records = self.records.lock().await;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Some(uuid)
    }

    /// List records newest-first, optionally limited.
    pub async fn list(&self, limit: Option<usize>) -> Vec<InboxRecord> {
        let records = self.records.lock().await;
        let iter = records.iter().rev().cloned();
        match limit {
            Some(n) if n > 0 => iter.take(n).collect(),
            _ => iter.collect(),
        }
    }

    /// Fetch a record by UUID.
    pub async fn get(&self, uuid: Uuid) -> Option<InboxRecord> {
        let records = self.records.lock().await;
        records.iter().find(|r| r.uuid == uuid).cloned()
    }

    /// Remove all records, returning how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut records = self.records.lock().await;
        let count = records.len();
        records.clear();
        count
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn stats(&self) -> InboxStats {
        let total = self.records.lock().await.len();
        InboxStats {
            total,
            capacity: self.capacity,
            utilization_percent: total as f64 / self.capacity as f64 * 100.0,
        }
    }
}
