//! Ordered, asynchronous dispatch of producer lifecycle events.
//!
//! Producers post events from whatever thread they run on; a dedicated
//! pump thread drains them strictly in posting order and hands each to a
//! single [`MessageHandler`]. Handler code may therefore call back into the
//! session (taking its control lock) without ever running on a media path.
//!
//! ```text
//! producer thread(s) ──post──▶ [ crossbeam channel ] ──▶ pump thread ──▶ handler
//! ```
//!
//! Stopping is deterministic: [`MessagePump::stop`] closes the pump to new
//! events, everything already queued is still dispatched, then the thread
//! exits. Events posted after `stop` are discarded.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::producer::ProducerEvent;

/// Receives every event dispatched by a [`MessagePump`], on the pump thread.
pub trait MessageHandler: Send + 'static {
    fn handle_message(&self, event: ProducerEvent);
}

impl<F> MessageHandler for F
where
    F: Fn(ProducerEvent) + Send + 'static,
{
    fn handle_message(&self, event: ProducerEvent) {
        self(event)
    }
}

enum Envelope {
    Event(ProducerEvent),
    Stop,
}

/// Cloneable posting side of a [`MessagePump`].
#[derive(Clone)]
pub struct EventPoster {
    tx: Sender<Envelope>,
    accepting: Arc<AtomicBool>,
}

impl EventPoster {
    /// Queue an event. Returns false if the pump has been stopped.
    pub fn post(&self, event: ProducerEvent) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            tracing::trace!(?event, "pump stopped, event discarded");
            return false;
        }
        self.tx.send(Envelope::Event(event)).is_ok()
    }
}

/// A running event loop bound to one handler.
pub struct MessagePump {
    name: String,
    poster: EventPoster,
    thread: Option<JoinHandle<()>>,
}

impl MessagePump {
    /// Spawn the pump thread.
    pub fn start<H: MessageHandler>(name: &str, handler: H) -> io::Result<Self> {
        let (tx, rx) = unbounded();
        let accepting = Arc::new(AtomicBool::new(true));

        let loop_name = name.to_string();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&loop_name, rx, handler))?;

        tracing::debug!(pump = name, "message pump started");

        Ok(Self {
            name: name.to_string(),
            poster: EventPoster { tx, accepting },
            thread: Some(thread),
        })
    }

    pub fn poster(&self) -> EventPoster {
        self.poster.clone()
    }

    pub fn post(&self, event: ProducerEvent) -> bool {
        self.poster.post(event)
    }

    /// Stop accepting events and ask the loop to exit once drained.
    ///
    /// Does not wait; see [`join`](Self::join).
    pub fn stop(&self) {
        if self.poster.accepting.swap(false, Ordering::AcqRel) {
            // The receiver lives as long as the thread; a send error only
            // means the loop is already gone.
            let _ = self.poster.tx.send(Envelope::Stop);
            tracing::debug!(pump = %self.name, "message pump stopping");
        }
    }

    /// Wait for the loop to exit. A no-op when called from the pump thread
    /// itself (a handler tearing its own session down).
    pub fn join(mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!(pump = %self.name, "message pump thread panicked");
        }
    }

    /// [`stop`](Self::stop) followed by [`join`](Self::join).
    pub fn shutdown(self) {
        self.stop();
        self.join();
    }
}

impl Drop for MessagePump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<H: MessageHandler>(name: &str, rx: Receiver<Envelope>, handler: H) {
    let mut dispatched = 0u64;
    for envelope in rx.iter() {
        match envelope {
            Envelope::Event(event) => {
                tracing::trace!(pump = name, ?event, "dispatching");
                handler.handle_message(event);
                dispatched += 1;
            }
            Envelope::Stop => break,
        }
    }
    tracing::debug!(pump = name, dispatched, "message pump exited");
}
