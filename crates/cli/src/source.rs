//! A live test source: produces timestamped RTP with dummy payloads and a
//! sender report per second, on one worker thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rtsp_media::{
    PlaybackState, Producer, ProducerError, ProducerEvent, ProducerHandle, StreamCaps,
};

use crate::rtp::RtpHeader;

struct Worker {
    thread: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

pub struct SyntheticSource {
    streams: Vec<StreamCaps>,
    fps: u32,
    payload_size: usize,
    playing: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl SyntheticSource {
    pub fn new(streams: Vec<StreamCaps>, fps: u32, payload_size: usize) -> Self {
        Self {
            streams,
            fps: fps.max(1),
            payload_size,
            playing: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }
}

impl Producer for SyntheticSource {
    fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn start(&self, handle: ProducerHandle) -> Result<(), ProducerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(ProducerError::Failed("already started".into()));
        }

        for (index, caps) in self.streams.iter().enumerate() {
            handle.set_caps(index, caps.clone());
        }
        handle.post(ProducerEvent::LivenessChanged(true));

        let running = Arc::new(AtomicBool::new(true));
        let generator = Generator {
            headers: self
                .streams
                .iter()
                .map(|caps| RtpHeader::with_random_ssrc(caps.payload_type))
                .collect(),
            increments: self
                .streams
                .iter()
                .map(|caps| caps.clock_rate / self.fps)
                .collect(),
            fps: self.fps,
            payload: vec![0u8; self.payload_size],
            handle,
            running: running.clone(),
            playing: self.playing.clone(),
        };
        let thread = thread::Builder::new()
            .name("synthetic-source".into())
            .spawn(move || generator.run())
            .map_err(|e| ProducerError::Failed(e.to_string()))?;

        *worker = Some(Worker { thread, running });
        Ok(())
    }

    fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.running.store(false, Ordering::Release);
        // The session may be dropped from inside a push on the worker itself.
        if worker.thread.thread().id() == thread::current().id() {
            return;
        }
        if worker.thread.join().is_err() {
            tracing::error!("synthetic source thread panicked");
        }
        self.playing.store(false, Ordering::Release);
    }

    fn request_state(&self, state: PlaybackState) -> Result<(), ProducerError> {
        self.playing
            .store(state == PlaybackState::Playing, Ordering::Release);
        tracing::debug!(?state, "synthetic source state");
        Ok(())
    }
}

struct Generator {
    headers: Vec<RtpHeader>,
    increments: Vec<u32>,
    fps: u32,
    payload: Vec<u8>,
    handle: ProducerHandle,
    running: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
}

impl Generator {
    fn run(mut self) {
        let frame = Duration::from_secs(1) / self.fps;
        let mut frames = 0u64;

        // Live sources preroll immediately.
        self.handle.ready();

        while self.running.load(Ordering::Acquire) {
            if self.playing.load(Ordering::Acquire) {
                for (index, header) in self.headers.iter_mut().enumerate() {
                    let packet = header.packet(true, &self.payload);
                    self.handle.push_rtp(index, &packet);
                    header.advance_timestamp(self.increments[index]);

                    if frames % u64::from(self.fps) == 0 {
                        let report = header.sender_report(SystemTime::now());
                        self.handle.push_rtcp(index, &report);
                    }
                }
                frames += 1;
            }
            thread::sleep(frame);
        }

        tracing::debug!(frames, "synthetic source stopped");
    }
}
