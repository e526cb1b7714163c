//! Bounded bridge queues with back-pressure
//!
//! Both directions share the same admission bands, measured against queue
//! utilization:
//!
//! - below 70%: accept everything
//! - 70–90%: reject `low`
//! - 90% and above: accept only `high`
//! - full: reject; the incoming queue additionally lets a `high` event evict
//!   the oldest `low` entry
//!
//! Outbound has a separate priority lane that is drained before the main
//! queue; the lane is plain bounded FIFO (high priority already passed the
//! bands by definition). Locks are never held across await points; waiting
//! consumers park on a `Notify`.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use jabber_protocol::{BridgeEvent, OutboundMessage, Priority};

/// Admission failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Rejected by the back-pressure policy
    Overloaded,
    /// Queue is closed (bridge stopping)
    Closed,
}

/// Band check shared by both queues. `len` counts entries already queued.
fn admit(len: usize, capacity: usize, priority: Priority) -> bool {
    if len >= capacity {
        return false;
    }
    let percent = len * 100 / capacity;
    match priority {
        Priority::High => true,
        Priority::Medium => percent < 90,
        Priority::Low => percent < 70,
    }
}

// ---------------------------------------------------------------------------
// Incoming queue (XMPP → bridge)
// ---------------------------------------------------------------------------

struct IncomingState {
    queue: VecDeque<BridgeEvent>,
    closed: bool,
}

/// Bounded queue of events flowing from the XMPP session into the bridge
pub struct IncomingQueue {
    state: Mutex<IncomingState>,
    notify: Notify,
    capacity: usize,
}

impl IncomingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(IncomingState {
                queue: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Offer an event. A `high` event arriving at a full queue may evict the
    /// oldest `low` entry instead of being rejected.
    pub fn try_push(&self, event: BridgeEvent) -> Result<(), EnqueueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EnqueueError::Closed);
        }

        let priority = event.priority();
        if !admit(state.queue.len(), self.capacity, priority) {
            if state.queue.len() >= self.capacity && priority == Priority::High {
                let victim = state
                    .queue
                    .iter()
                    .position(|e| e.priority() == Priority::Low);
                if let Some(idx) = victim {
                    state.queue.remove(idx);
                } else {
                    return Err(EnqueueError::Overloaded);
                }
            } else {
                return Err(EnqueueError::Overloaded);
            }
        }

        state.queue.push_back(event);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next event; `None` once closed and drained.
    pub async fn pop(&self) -> Option<BridgeEvent> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(event) = state.queue.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking pop, used when draining at shutdown.
    pub fn try_pop(&self) -> Option<BridgeEvent> {
        self.state.lock().queue.pop_front()
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Outbound queues (bridge → XMPP)
// ---------------------------------------------------------------------------

struct OutboundState {
    lane: VecDeque<OutboundMessage>,
    main: VecDeque<OutboundMessage>,
    closed: bool,
}

/// Main outbound queue plus the high-priority lane
pub struct OutboundQueues {
    state: Mutex<OutboundState>,
    notify: Notify,
    main_capacity: usize,
    lane_capacity: usize,
}

impl OutboundQueues {
    pub fn new(main_capacity: usize, lane_capacity: usize) -> Self {
        Self {
            state: Mutex::new(OutboundState {
                lane: VecDeque::new(),
                main: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            main_capacity: main_capacity.max(1),
            lane_capacity: lane_capacity.max(1),
        }
    }

    /// Offer a message under the back-pressure policy.
    pub fn try_enqueue(&self, msg: OutboundMessage) -> Result<(), EnqueueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EnqueueError::Closed);
        }

        match msg.priority {
            Priority::High => {
                if state.lane.len() >= self.lane_capacity {
                    return Err(EnqueueError::Overloaded);
                }
                state.lane.push_back(msg);
            }
            _ => {
                if !admit(state.main.len(), self.main_capacity, msg.priority) {
                    return Err(EnqueueError::Overloaded);
                }
                state.main.push_back(msg);
            }
        }
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Re-insert a message at the tail of its lane after a failed attempt.
    ///
    /// Retries bypass the soft bands; only the hard capacity applies.
    pub fn requeue(&self, msg: OutboundMessage) -> Result<(), EnqueueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EnqueueError::Closed);
        }
        let (queue, capacity) = match msg.priority {
            Priority::High => (&mut state.lane, self.lane_capacity),
            _ => (&mut state.main, self.main_capacity),
        };
        if queue.len() >= capacity {
            return Err(EnqueueError::Overloaded);
        }
        queue.push_back(msg);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next message, lane first; `None` once closed and empty.
    pub async fn pop(&self) -> Option<OutboundMessage> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(msg) = state.lane.pop_front() {
                    return Some(msg);
                }
                if let Some(msg) = state.main.pop_front() {
                    return Some(msg);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking pop, lane first.
    pub fn try_pop(&self) -> Option<OutboundMessage> {
        let mut state = self.state.lock();
        state.lane.pop_front().or_else(|| state.main.pop_front())
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    /// Remove and return everything still queued (lane first).
    pub fn drain(&self) -> Vec<OutboundMessage> {
        let mut state = self.state.lock();
        let mut items: Vec<OutboundMessage> = state.lane.drain(..).collect();
        items.extend(state.main.drain(..));
        items
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.lane.len() + state.main.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn main_len(&self) -> usize {
        self.state.lock().main.len()
    }

    pub fn main_capacity(&self) -> usize {
        self.main_capacity
    }
}
