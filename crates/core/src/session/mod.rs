//! Media session coordination.
//!
//! A [`MediaSession`] owns one [`Producer`] and the per-stream transport
//! sets it feeds. It is shared by every client that attached to it and
//! keeps its state consistent under concurrent control calls.
//!
//! ## Lifecycle
//!
//! ```text
//! Unprepared ──prepare──▶ Preparing ──ready──▶ Prepared ──error──▶ Error
//!     ▲                       │                    │                  │
//!     └──── timeout/cancel ───┘                    └──── teardown ────┘
//! ```
//!
//! ## Locking
//!
//! - `control`: serializes prepare/set_state/seek/attach/detach/teardown and
//!   the message pump's handler. Held across readiness waits.
//! - `streams` and each stream's transport set: read-locked by packet
//!   routing, never held by a control call while it waits.
//! - `status`: short critical sections only, for flags readable at any time.

pub(crate) mod ready;
pub mod stream;
pub mod transport;

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::caps::StreamCaps;
use crate::config::SessionConfig;
use crate::error::{MediaError, PrepareError, ProducerError, Result};
use crate::producer::{PacketKind, Producer, ProducerEvent, ProducerHandle, SeekOutcome};
use crate::pump::{MessageHandler, MessagePump};
use crate::range::TimeRange;
use ready::ReadyGate;
use stream::StreamState;
pub use transport::{Sender, Transport, TransportKey, TransportRef};

/// Where a session is in its prepare/teardown cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Unprepared = 0,
    Preparing = 1,
    /// Streams exist and packets are routed.
    Prepared = 2,
    /// The producer failed; only teardown is accepted.
    Error = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Preparing,
            2 => Self::Prepared,
            3 => Self::Error,
            _ => Self::Unprepared,
        }
    }
}

/// Playback state requested from the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Paused,
    Playing,
}

/// Hook through which the protocol layer learns about asynchronous events.
///
/// Called on the session's message pump thread.
pub trait SessionListener: Send + Sync {
    /// Every producer event, after the session has applied it.
    fn on_event(&self, _event: &ProducerEvent) {}

    /// The session ended on its own (fatal producer error); all transports
    /// have been or are about to be released.
    fn on_session_ended(&self, _reason: &MediaError) {}
}

#[derive(Default)]
struct Control {
    pump: Option<MessagePump>,
    producer_started: bool,
}

#[derive(Debug)]
struct Status {
    target: PlaybackState,
    /// A `Playing` target held back at `Paused` while buffering.
    deferred_play: bool,
    is_live: bool,
    is_buffering: bool,
    range: TimeRange,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            target: PlaybackState::Stopped,
            deferred_play: false,
            is_live: false,
            is_buffering: false,
            range: TimeRange::default(),
        }
    }
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    producer: Box<dyn Producer>,
    shared: AtomicBool,
    control: Mutex<Control>,
    lifecycle: AtomicU8,
    /// Bumped on every prepare and teardown; stale handles compare unequal.
    generation: AtomicU64,
    /// Teardowns that have cancelled the gate but not yet got the control lock.
    pending_teardowns: AtomicUsize,
    streams: RwLock<Vec<Arc<StreamState>>>,
    status: Mutex<Status>,
    gate: ReadyGate,
    listener: RwLock<Option<Arc<dyn SessionListener>>>,
}

/// The session-lifecycle coordinator for one media source.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct MediaSession {
    inner: Arc<SessionInner>,
}

impl MediaSession {
    pub fn new(producer: impl Producer) -> Self {
        Self::with_config(producer, SessionConfig::default())
    }

    pub fn with_config(producer: impl Producer, config: SessionConfig) -> Self {
        let shared = config.shared;
        Self {
            inner: Arc::new(SessionInner {
                config,
                producer: Box::new(producer),
                shared: AtomicBool::new(shared),
                control: Mutex::new(Control::default()),
                lifecycle: AtomicU8::new(LifecycleState::Unprepared as u8),
                generation: AtomicU64::new(0),
                pending_teardowns: AtomicUsize::new(0),
                streams: RwLock::new(Vec::new()),
                status: Mutex::new(Status::default()),
                gate: ReadyGate::new(),
                listener: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn set_listener(&self, listener: Arc<dyn SessionListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    pub fn is_shared(&self) -> bool {
        self.inner.shared.load(Ordering::Acquire)
    }

    pub fn set_shared(&self, shared: bool) {
        self.inner.shared.store(shared, Ordering::Release);
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.lifecycle()
    }

    pub fn target_state(&self) -> PlaybackState {
        self.inner.status.lock().target
    }

    pub fn is_live(&self) -> bool {
        self.inner.status.lock().is_live
    }

    pub fn is_buffering(&self) -> bool {
        self.inner.status.lock().is_buffering
    }

    pub fn active_range(&self) -> TimeRange {
        self.inner.status.lock().range.clone()
    }

    pub fn stream_count(&self) -> usize {
        self.inner.streams.read().len()
    }

    pub fn stream_caps(&self, index: usize) -> Result<StreamCaps> {
        self.inner
            .stream(index)?
            .caps()
            .cloned()
            .ok_or(MediaError::CapsUnknown(index))
    }

    pub fn transport_count(&self, index: usize) -> Result<usize> {
        Ok(self.inner.stream(index)?.transport_count())
    }

    /// Start the producer and wait until it reports readiness.
    ///
    /// Already-prepared sessions return `Ok` immediately, so every client of
    /// a shared session may call this.
    pub fn prepare(&self) -> Result<()> {
        let inner = &self.inner;
        let mut control = inner.control.lock();

        match inner.lifecycle() {
            LifecycleState::Prepared => {
                tracing::debug!("media already prepared");
                return Ok(());
            }
            LifecycleState::Unprepared => {}
            state => {
                return Err(MediaError::InvalidState {
                    operation: "prepare",
                    state,
                });
            }
        }

        inner.arm_gate()?;
        let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let count = inner.producer.stream_count();
        *inner.streams.write() = (0..count)
            .map(|index| Arc::new(StreamState::new(index, inner.config.max_send_failures)))
            .collect();
        inner.set_lifecycle(LifecycleState::Preparing);
        tracing::debug!(generation, streams = count, "preparing media");

        let handler = SessionHandler {
            session: Arc::downgrade(inner),
            generation,
        };
        let pump = match MessagePump::start(&format!("media-pump-{generation}"), handler) {
            Ok(pump) => pump,
            Err(e) => {
                let pump = inner.unprepare(&mut control);
                drop(control);
                join_pump(pump);
                return Err(PrepareError::Failed(format!("message pump: {e}")).into());
            }
        };
        let handle = ProducerHandle {
            session: Arc::downgrade(inner),
            generation,
            events: pump.poster(),
        };
        control.pump = Some(pump);

        if let Err(e) = inner.producer.start(handle) {
            tracing::warn!(error = %e, "producer failed to start");
            let pump = inner.unprepare(&mut control);
            drop(control);
            join_pump(pump);
            return Err(PrepareError::Construction(e).into());
        }
        control.producer_started = true;

        if let Err(e) = inner.gate.wait(inner.config.prepare_timeout) {
            tracing::warn!(error = %e, "media did not become ready");
            let pump = inner.unprepare(&mut control);
            drop(control);
            join_pump(pump);
            return Err(e.into());
        }

        for stream in inner.streams.read().iter() {
            stream.set_prepared(true);
        }
        let range = TimeRange::until(inner.producer.duration());
        tracing::info!(streams = count, range = %range, "media prepared");
        inner.status.lock().range = range;
        inner.set_lifecycle(LifecycleState::Prepared);
        Ok(())
    }

    /// Request a playback state and sync the given transports to it.
    ///
    /// `Playing` while the producer is buffering is accepted but held back:
    /// the producer stays at `Paused` until buffering completes.
    pub fn set_state(&self, target: PlaybackState, sync: &[TransportRef]) -> Result<()> {
        let inner = &self.inner;
        let _control = inner.control.lock();
        inner.require_prepared("set_state")?;

        let (previous, effective) = {
            let mut status = inner.status.lock();
            let previous = (status.target, status.deferred_play);
            status.target = target;
            status.deferred_play = target == PlaybackState::Playing && status.is_buffering;
            let effective = if status.deferred_play {
                PlaybackState::Paused
            } else {
                target
            };
            (previous, effective)
        };

        if let Err(e) = inner.producer.request_state(effective) {
            let mut status = inner.status.lock();
            status.target = previous.0;
            status.deferred_play = previous.1;
            return Err(MediaError::State {
                target,
                reason: e.to_string(),
            });
        }
        if effective != target {
            tracing::debug!(?target, "playing deferred until buffering completes");
        }

        let streams = inner.streams.read().clone();
        for transport in sync {
            let synced = streams
                .get(transport.stream)
                .is_some_and(|s| s.sync_state(&transport.key, target));
            if !synced {
                tracing::debug!(stream = transport.stream, key = %transport.key, "sync target not attached");
            }
        }

        tracing::info!(?target, ?effective, synced = sync.len(), "state changed");
        Ok(())
    }

    /// Move the play window. Waits for the producer to re-preroll when it
    /// completes the seek asynchronously.
    pub fn seek(&self, range: TimeRange) -> Result<()> {
        let inner = &self.inner;
        let _control = inner.control.lock();
        inner.require_prepared("seek")?;

        if inner.status.lock().is_live || !inner.producer.is_seekable() {
            return Err(MediaError::NotSeekable);
        }

        inner.arm_gate()?;
        let outcome = inner.producer.seek(&range).map_err(|e| match e {
            ProducerError::NotSeekable => MediaError::NotSeekable,
            other => MediaError::Seek(other.to_string()),
        })?;
        if outcome == SeekOutcome::Pending {
            inner.gate.wait(inner.config.seek_timeout)?;
        }

        tracing::info!(range = %range, "seek applied");
        inner.status.lock().range = range;
        Ok(())
    }

    /// Attach a transport to a stream of a prepared session.
    pub fn attach_transport(&self, stream: usize, transport: Transport) -> Result<()> {
        let inner = &self.inner;
        let _control = inner.control.lock();
        inner.require_prepared("attach_transport")?;
        inner.stream(stream)?.attach(transport)
    }

    /// Detach a transport and release it.
    ///
    /// When the session is not shared and this was its last transport, the
    /// session tears itself down.
    pub fn detach_transport(&self, stream: usize, key: &TransportKey) -> Result<()> {
        let inner = &self.inner;
        let pump = {
            let mut control = inner.control.lock();
            inner.require_prepared("detach_transport")?;
            inner.stream(stream)?.detach(key)?;

            if !self.is_shared() && inner.total_transports() == 0 {
                tracing::info!("last transport of unshared media detached, tearing down");
                inner.unprepare(&mut control)
            } else {
                None
            }
        };
        join_pump(pump);
        Ok(())
    }

    /// Stop everything and return to `Unprepared`. Safe to call at any time,
    /// any number of times; interrupts a prepare or seek that is waiting.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("lifecycle", &self.lifecycle())
            .field("shared", &self.is_shared())
            .field("streams", &self.stream_count())
            .finish_non_exhaustive()
    }
}

fn join_pump(pump: Option<MessagePump>) {
    if let Some(pump) = pump {
        pump.join();
    }
}

impl SessionInner {
    fn lifecycle(&self) -> LifecycleState {
        LifecycleState::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn set_lifecycle(&self, state: LifecycleState) {
        let old = LifecycleState::from_u8(self.lifecycle.swap(state as u8, Ordering::AcqRel));
        if old != state {
            tracing::debug!(?old, new = ?state, "lifecycle transition");
        }
    }

    fn require_prepared(&self, operation: &'static str) -> Result<()> {
        match self.lifecycle() {
            LifecycleState::Prepared => Ok(()),
            state => Err(MediaError::InvalidState { operation, state }),
        }
    }

    fn stream(&self, index: usize) -> Result<Arc<StreamState>> {
        self.streams
            .read()
            .get(index)
            .cloned()
            .ok_or(MediaError::StreamNotFound(index))
    }

    fn total_transports(&self) -> usize {
        self.streams.read().iter().map(|s| s.transport_count()).sum()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Reset the readiness gate for a new wait, unless a teardown is
    /// already queued behind the control lock.
    fn arm_gate(&self) -> Result<()> {
        self.gate.reset();
        if self.pending_teardowns.load(Ordering::Acquire) > 0 {
            return Err(PrepareError::Cancelled.into());
        }
        Ok(())
    }

    fn listener(&self) -> Option<Arc<dyn SessionListener>> {
        self.listener.read().clone()
    }

    pub(crate) fn signal_ready(&self, generation: u64) {
        if self.is_current(generation) {
            tracing::debug!(generation, "producer ready");
            self.gate.open();
        }
    }

    pub(crate) fn fail_ready(&self, generation: u64, reason: &str) {
        if self.is_current(generation) {
            self.gate.fail(reason);
        }
    }

    pub(crate) fn announce_caps(&self, generation: u64, index: usize, caps: StreamCaps) {
        if !self.is_current(generation) {
            return;
        }
        match self.streams.read().get(index) {
            Some(stream) => {
                stream.set_caps(caps);
            }
            None => tracing::warn!(stream = index, "caps for unknown stream"),
        }
    }

    pub(crate) fn route(&self, generation: u64, index: usize, kind: PacketKind, packet: &[u8]) -> usize {
        if self.lifecycle() != LifecycleState::Prepared || !self.is_current(generation) {
            tracing::trace!(stream = index, ?kind, "packet dropped, media not prepared");
            return 0;
        }
        let stream = self.streams.read().get(index).cloned();
        match stream {
            Some(stream) => stream.deliver(kind, packet),
            None => {
                tracing::trace!(stream = index, "packet for unknown stream");
                0
            }
        }
    }

    fn teardown(&self) {
        self.pending_teardowns.fetch_add(1, Ordering::AcqRel);
        self.gate.cancel();
        let pump = {
            let mut control = self.control.lock();
            self.pending_teardowns.fetch_sub(1, Ordering::AcqRel);
            self.unprepare(&mut control)
        };
        join_pump(pump);
    }

    /// Return to `Unprepared`, releasing every transport. The caller must
    /// join the returned pump after dropping the control lock.
    fn unprepare(&self, control: &mut Control) -> Option<MessagePump> {
        let from = self.lifecycle();
        if from == LifecycleState::Unprepared && control.pump.is_none() && !control.producer_started {
            tracing::trace!("media already unprepared");
            return None;
        }

        self.generation.fetch_add(1, Ordering::AcqRel);
        self.set_lifecycle(LifecycleState::Unprepared);

        if control.producer_started {
            self.producer.stop();
            control.producer_started = false;
        }

        let streams = std::mem::take(&mut *self.streams.write());
        let mut released = 0;
        for stream in &streams {
            stream.set_prepared(false);
            released += stream.release_all();
        }
        *self.status.lock() = Status::default();

        let pump = control.pump.take();
        if let Some(pump) = &pump {
            pump.stop();
        }

        tracing::info!(?from, streams = streams.len(), released, "media unprepared");
        pump
    }

    fn dispatch(&self, generation: u64, event: ProducerEvent) {
        {
            let _control = self.control.lock();
            if !self.is_current(generation) {
                tracing::trace!(generation, ?event, "stale event ignored");
                return;
            }
            match &event {
                ProducerEvent::Error(reason) => {
                    tracing::error!(%reason, "producer error");
                    self.set_lifecycle(LifecycleState::Error);
                }
                ProducerEvent::EndOfStream => tracing::info!("end of stream"),
                ProducerEvent::BufferingLevel(percent) => self.update_buffering(*percent),
                ProducerEvent::LivenessChanged(live) => self.update_liveness(*live),
            }
        }

        let listener = self.listener();
        if let Some(listener) = &listener {
            listener.on_event(&event);
        }

        if let ProducerEvent::Error(reason) = event {
            if let Some(listener) = &listener {
                listener.on_session_ended(&MediaError::FatalProducer(reason));
            }
            self.teardown_generation(generation);
        }
    }

    /// Teardown on behalf of a pump event. Skipped when the session was
    /// torn down or prepared again since the event's generation.
    fn teardown_generation(&self, generation: u64) {
        let pump = {
            let mut control = self.control.lock();
            if !self.is_current(generation) {
                tracing::debug!(generation, "session restarted, skipping teardown");
                return;
            }
            self.unprepare(&mut control)
        };
        join_pump(pump);
    }

    fn update_buffering(&self, percent: u8) {
        let request = {
            let mut status = self.status.lock();
            if status.is_live {
                tracing::trace!(percent, "buffering ignored for live media");
                return;
            }
            if percent >= 100 {
                if !status.is_buffering {
                    return;
                }
                status.is_buffering = false;
                tracing::debug!("buffering done");
                if status.deferred_play {
                    status.deferred_play = false;
                    Some(PlaybackState::Playing)
                } else {
                    None
                }
            } else {
                if status.is_buffering {
                    return;
                }
                status.is_buffering = true;
                tracing::debug!(percent, "buffering");
                if status.target == PlaybackState::Playing {
                    status.deferred_play = true;
                    Some(PlaybackState::Paused)
                } else {
                    None
                }
            }
        };

        if let Some(state) = request {
            self.request_producer_state(state);
        }
    }

    fn update_liveness(&self, live: bool) {
        let resume = {
            let mut status = self.status.lock();
            status.is_live = live;
            tracing::debug!(live, "liveness changed");
            if live && status.is_buffering {
                status.is_buffering = false;
                std::mem::take(&mut status.deferred_play)
            } else {
                false
            }
        };
        if resume {
            self.request_producer_state(PlaybackState::Playing);
        }
    }

    fn request_producer_state(&self, state: PlaybackState) {
        match self.producer.request_state(state) {
            Ok(()) => tracing::debug!(?state, "producer state requested"),
            Err(e) => tracing::warn!(?state, error = %e, "producer refused state"),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let control = self.control.get_mut();
        if control.producer_started {
            self.producer.stop();
        }
        for stream in self.streams.get_mut().drain(..) {
            stream.release_all();
        }
        // Dropping the pump stops it; it only holds a weak reference to us.
        control.pump.take();
    }
}

struct SessionHandler {
    session: Weak<SessionInner>,
    generation: u64,
}

impl MessageHandler for SessionHandler {
    fn handle_message(&self, event: ProducerEvent) {
        match self.session.upgrade() {
            Some(session) => session.dispatch(self.generation, event),
            None => tracing::trace!(?event, "session gone, event dropped"),
        }
    }
}
