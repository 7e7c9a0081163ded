// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The streaming fabric.
//!
//! Decouples agents and the orchestrator from the transport and the message
//! store: everything a turn emits — tokens, statuses, tool calls, errors,
//! final messages — travels through a per-turn [`StreamContext`] that fans
//! events out to subscribers and persists the event kinds that belong in the
//! session history.
//!
//! The turn context is an explicit value threaded through the orchestrator
//! and agents; concurrent turns in different sessions never share state.

mod context;
mod events;
mod manager;

pub use context::{EventSink, MessagePersister, StreamContext};
pub use events::{normalize_timestamp, StreamEvent};
pub use manager::{Envelope, SessionSink, SessionStreamManager, REPLAY_CAP};
