use std::collections::HashMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::caps::StreamCaps;
use crate::error::{MediaError, Result};
use crate::producer::PacketKind;
use crate::session::PlaybackState;
use crate::session::transport::{Sender, Transport, TransportKey};

struct Attached {
    sender: Box<dyn Sender>,
    /// Consecutive failed sends, RTP and RTCP combined.
    failures: AtomicU32,
}

/// One elementary stream of a session and the transports it fans out to.
///
/// Fan-out holds the transport set's read lock while invoking senders;
/// attach, detach and release take the write lock. A sender is therefore
/// never called once its release has started.
pub struct StreamState {
    index: usize,
    caps: OnceLock<StreamCaps>,
    prepared: AtomicBool,
    max_send_failures: u32,
    transports: RwLock<HashMap<TransportKey, Attached>>,
}

impl StreamState {
    pub(crate) fn new(index: usize, max_send_failures: u32) -> Self {
        Self {
            index,
            caps: OnceLock::new(),
            prepared: AtomicBool::new(false),
            max_send_failures,
            transports: RwLock::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Caps announced by the producer, if any yet.
    pub fn caps(&self) -> Option<&StreamCaps> {
        self.caps.get()
    }

    /// Record the stream's caps. Only the first announcement sticks.
    pub(crate) fn set_caps(&self, caps: StreamCaps) -> bool {
        match self.caps.set(caps) {
            Ok(()) => {
                tracing::debug!(stream = self.index, caps = ?self.caps.get(), "caps discovered");
                true
            }
            Err(ignored) => {
                tracing::debug!(stream = self.index, caps = ?ignored, "caps already set, ignoring");
                false
            }
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    pub(crate) fn set_prepared(&self, prepared: bool) {
        self.prepared.store(prepared, Ordering::Release);
    }

    pub fn transport_count(&self) -> usize {
        self.transports.read().len()
    }

    pub fn transport_keys(&self) -> Vec<TransportKey> {
        let mut keys: Vec<_> = self.transports.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn attach(&self, transport: Transport) -> Result<()> {
        let (key, sender) = transport.into_parts();
        let mut transports = self.transports.write();
        if transports.contains_key(&key) {
            return Err(MediaError::DuplicateTransport {
                index: self.index,
                key,
            });
        }
        tracing::debug!(stream = self.index, key = %key, total = transports.len() + 1, "transport attached");
        transports.insert(
            key,
            Attached {
                sender,
                failures: AtomicU32::new(0),
            },
        );
        Ok(())
    }

    pub(crate) fn detach(&self, key: &TransportKey) -> Result<()> {
        let mut transports = self.transports.write();
        let attached = transports
            .remove(key)
            .ok_or_else(|| MediaError::TransportNotFound {
                index: self.index,
                key: key.clone(),
            })?;
        tracing::debug!(stream = self.index, key = %key, remaining = transports.len(), "transport detached");
        attached.sender.release();
        Ok(())
    }

    /// Invoke the sync hook of one transport. Returns false if it is not attached.
    pub(crate) fn sync_state(&self, key: &TransportKey, state: PlaybackState) -> bool {
        match self.transports.read().get(key) {
            Some(attached) => {
                attached.sender.sync_state(state);
                true
            }
            None => false,
        }
    }

    /// Detach and release every transport. Returns how many were released.
    pub(crate) fn release_all(&self) -> usize {
        let mut transports = self.transports.write();
        let count = transports.len();
        for (key, attached) in transports.drain() {
            tracing::trace!(stream = self.index, key = %key, "releasing transport");
            attached.sender.release();
        }
        count
    }

    /// Send one packet to every attached transport.
    ///
    /// Delivery is independent per transport. A transport that fails
    /// `max_send_failures` times in a row is detached and released once the
    /// pass is over. Returns the number of transports that took the packet.
    pub fn deliver(&self, kind: PacketKind, packet: &[u8]) -> usize {
        let mut delivered = 0;
        let mut exhausted = Vec::new();

        {
            let transports = self.transports.read();
            for (key, attached) in transports.iter() {
                let result = match kind {
                    PacketKind::Rtp => attached.sender.send_rtp(packet),
                    PacketKind::Rtcp => attached.sender.send_rtcp(packet),
                };
                match result {
                    Ok(()) => {
                        attached.failures.store(0, Ordering::Relaxed);
                        delivered += 1;
                    }
                    Err(e) => {
                        let failures = attached.failures.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::trace!(stream = self.index, key = %key, ?kind, failures, error = %e, "send failed");
                        if self.max_send_failures > 0 && failures >= self.max_send_failures {
                            exhausted.push(key.clone());
                        }
                    }
                }
            }
        }

        if !exhausted.is_empty() {
            self.drop_exhausted(&exhausted);
        }

        delivered
    }

    fn drop_exhausted(&self, keys: &[TransportKey]) {
        let mut transports = self.transports.write();
        for key in keys {
            // A concurrent pass may have succeeded or already dropped it.
            let still_failing = transports
                .get(key)
                .is_some_and(|a| a.failures.load(Ordering::Relaxed) >= self.max_send_failures);
            if !still_failing {
                continue;
            }
            if let Some(attached) = transports.remove(key) {
                tracing::warn!(
                    stream = self.index,
                    key = %key,
                    failures = self.max_send_failures,
                    "transport auto-detached after consecutive send failures"
                );
                attached.sender.release();
            }
        }
    }
}

impl std::fmt::Debug for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamState")
            .field("index", &self.index)
            .field("caps", &self.caps.get())
            .field("prepared", &self.is_prepared())
            .field("transports", &self.transport_count())
            .finish()
    }
}
