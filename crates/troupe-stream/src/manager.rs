// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::context::EventSink;
use crate::events::StreamEvent;

/// Number of events replayed to a late-joining subscriber.
pub const REPLAY_CAP: usize = 200;

/// An event as delivered to subscribers: the payload plus its session and a
/// per-session monotonic sequence number, which lets clients distinguish
/// replayed events from live ones.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub session_id: String,
    pub sequence: u64,
    #[serde(flatten)]
    pub event: StreamEvent,
}

struct SessionChannel {
    next_sequence: u64,
    buffer: VecDeque<Envelope>,
    subscribers: Vec<mpsc::UnboundedSender<Envelope>>,
}

impl SessionChannel {
    fn new() -> Self {
        Self {
            next_sequence: 0,
            buffer: VecDeque::with_capacity(REPLAY_CAP),
            subscribers: Vec::new(),
        }
    }
}

/// Per-session fan-out that preserves emission order.
///
/// `broadcast` runs entirely inside the lock with non-blocking channel sends,
/// so events from one turn reach every subscriber in emission order.  A
/// subscriber whose channel has closed is dropped silently; the others are
/// unaffected.
#[derive(Default)]
pub struct SessionStreamManager {
    sessions: Mutex<HashMap<String, SessionChannel>>,
}

impl SessionStreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.  Returns the buffered replay (oldest first)
    /// and the live receiver.
    pub fn subscribe(
        &self,
        session_id: &str,
    ) -> (Vec<Envelope>, mpsc::UnboundedReceiver<Envelope>) {
        let mut sessions = self.sessions.lock().expect("stream sessions poisoned");
        let channel = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionChannel::new);
        let (tx, rx) = mpsc::unbounded_channel();
        let replay: Vec<Envelope> = channel.buffer.iter().cloned().collect();
        channel.subscribers.push(tx);
        (replay, rx)
    }

    /// Broadcast one event to every live subscriber of the session and add
    /// it to the replay ring.  Returns the assigned sequence number.
    pub fn broadcast(&self, session_id: &str, event: StreamEvent) -> u64 {
        let mut sessions = self.sessions.lock().expect("stream sessions poisoned");
        let channel = sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionChannel::new);
        let envelope = Envelope {
            session_id: session_id.to_string(),
            sequence: channel.next_sequence,
            event,
        };
        channel.next_sequence += 1;
        if channel.buffer.len() == REPLAY_CAP {
            channel.buffer.pop_front();
        }
        channel.buffer.push_back(envelope.clone());
        let before = channel.subscribers.len();
        channel
            .subscribers
            .retain(|tx| tx.send(envelope.clone()).is_ok());
        if channel.subscribers.len() < before {
            debug!(
                session = %session_id,
                dropped = before - channel.subscribers.len(),
                "dropped closed stream subscribers"
            );
        }
        envelope.sequence
    }

    /// Forget a session entirely (buffer, sequence counter, subscribers).
    pub fn drop_session(&self, session_id: &str) {
        self.sessions
            .lock()
            .expect("stream sessions poisoned")
            .remove(session_id);
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .expect("stream sessions poisoned")
            .get(session_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }
}

/// [`EventSink`] adapter binding a manager to one session, handed to the
/// turn's [`crate::StreamContext`].
pub struct SessionSink {
    manager: Arc<SessionStreamManager>,
    session_id: String,
}

impl SessionSink {
    pub fn new(manager: Arc<SessionStreamManager>, session_id: impl Into<String>) -> Self {
        Self {
            manager,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl EventSink for SessionSink {
    async fn send(&self, event: StreamEvent) -> anyhow::Result<()> {
        self.manager.broadcast(&self.session_id, event);
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
