//! Remote session boundary.
//!
//! A transport is an opaque bidirectional stream: encoded microphone chunks go
//! out through `TransportLink::outbound`, typed events come back on
//! `TransportLink::events`.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::EncodedChunk;
use crate::config::Config;
use crate::error::SessionResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ChunkReceived(EncodedChunk),
    /// The remote side cut off its own reply (barge-in).
    Interrupted,
    /// The remote side finished a reply turn.
    TurnComplete,
    Closed,
    Error(String),
}

/// Channel pair handed out by an opened transport.
#[derive(Debug)]
pub struct TransportLink {
    /// Fire-and-forget send path. Callers use `try_send`; a full queue means
    /// the network is behind and the chunk may be dropped.
    pub outbound: mpsc::Sender<EncodedChunk>,
    pub events: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait Transport: Send {
    /// Connect and complete the session handshake. Returning `Ok` is the
    /// "transport-opened" event.
    async fn open(&mut self, config: &Config) -> SessionResult<TransportLink>;

    /// Tear the session down. Must be idempotent and safe to call on a
    /// transport whose `open` was cancelled halfway.
    async fn close(&mut self);
}
