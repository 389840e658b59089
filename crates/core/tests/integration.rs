//! Integration tests: a scripted stub producer driven through a full
//! prepare → attach → play → teardown cycle, plus the concurrency cases.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use rtsp_media::{
    LifecycleState, MediaError, MediaKind, MediaSession, PlaybackState, PrepareError, Producer,
    ProducerError, ProducerEvent, ProducerHandle, SeekOutcome, Sender, SessionConfig,
    SessionListener, StreamCaps, TimeRange, Transport, TransportError, TransportKey, TransportRef,
};

// ---------------------------------------------------------------------------
// Stub producer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StubLog {
    handle: Option<ProducerHandle>,
    requests: Vec<PlaybackState>,
    seeks: Vec<TimeRange>,
    starts: usize,
    stops: usize,
}

#[derive(Clone)]
struct Stub {
    log: Arc<Mutex<StubLog>>,
    streams: usize,
    ready_after: Option<Duration>,
    fail_start: bool,
    seekable: bool,
    seek_pending: bool,
    /// Whether a pending seek ever re-prerolls.
    seek_ready: bool,
    duration: Option<Duration>,
}

impl Stub {
    fn new(streams: usize) -> Self {
        Self {
            log: Arc::new(Mutex::new(StubLog::default())),
            streams,
            ready_after: Some(Duration::from_millis(10)),
            fail_start: false,
            seekable: false,
            seek_pending: false,
            seek_ready: true,
            duration: None,
        }
    }

    fn never_ready(mut self) -> Self {
        self.ready_after = None;
        self
    }

    fn seekable(mut self, pending: bool) -> Self {
        self.seekable = true;
        self.seek_pending = pending;
        self.duration = Some(Duration::from_secs(60));
        self
    }

    fn stalled_seek(mut self) -> Self {
        self = self.seekable(true);
        self.seek_ready = false;
        self
    }

    fn handle(&self) -> ProducerHandle {
        self.log.lock().handle.clone().expect("producer started")
    }

    fn requests(&self) -> Vec<PlaybackState> {
        self.log.lock().requests.clone()
    }
}

impl Producer for Stub {
    fn stream_count(&self) -> usize {
        self.streams
    }

    fn start(&self, handle: ProducerHandle) -> Result<(), ProducerError> {
        if self.fail_start {
            return Err(ProducerError::Failed("no decoder".into()));
        }
        let mut log = self.log.lock();
        log.starts += 1;
        log.handle = Some(handle.clone());

        if let Some(delay) = self.ready_after {
            let streams = self.streams;
            thread::spawn(move || {
                thread::sleep(delay);
                for index in 0..streams {
                    handle.set_caps(index, StreamCaps::new(MediaKind::Video, 96, "H264", 90000));
                }
                handle.ready();
            });
        }
        Ok(())
    }

    fn stop(&self) {
        let mut log = self.log.lock();
        log.stops += 1;
        log.handle = None;
    }

    fn request_state(&self, state: PlaybackState) -> Result<(), ProducerError> {
        self.log.lock().requests.push(state);
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn seek(&self, range: &TimeRange) -> Result<SeekOutcome, ProducerError> {
        let mut log = self.log.lock();
        log.seeks.push(range.clone());
        if self.seek_pending {
            if let Some(handle) = log.handle.clone().filter(|_| self.seek_ready) {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(10));
                    handle.ready();
                });
            }
            Ok(SeekOutcome::Pending)
        } else {
            Ok(SeekOutcome::Applied)
        }
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

// ---------------------------------------------------------------------------
// Recording sender
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Received {
    rtp: Mutex<Vec<Vec<u8>>>,
    rtcp: Mutex<Vec<Vec<u8>>>,
    synced: Mutex<Vec<PlaybackState>>,
    released: AtomicUsize,
    sent_after_release: AtomicBool,
}

impl Received {
    fn rtp_count(&self) -> usize {
        self.rtp.lock().len()
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct Recorder {
    received: Arc<Received>,
    fail: bool,
}

impl Recorder {
    fn check_live(&self) {
        if self.received.released.load(Ordering::SeqCst) > 0 {
            self.received.sent_after_release.store(true, Ordering::SeqCst);
        }
    }
}

impl Sender for Recorder {
    fn send_rtp(&self, packet: &[u8]) -> Result<(), TransportError> {
        self.check_live();
        if self.fail {
            return Err(TransportError::Closed);
        }
        self.received.rtp.lock().push(packet.to_vec());
        Ok(())
    }

    fn send_rtcp(&self, packet: &[u8]) -> Result<(), TransportError> {
        self.check_live();
        if self.fail {
            return Err(TransportError::Closed);
        }
        self.received.rtcp.lock().push(packet.to_vec());
        Ok(())
    }

    fn sync_state(&self, state: PlaybackState) {
        self.received.synced.lock().push(state);
    }

    fn release(self: Box<Self>) {
        self.received.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn recorder(key: &str) -> (Transport, Arc<Received>) {
    recorder_with(key, false)
}

fn recorder_with(key: &str, fail: bool) -> (Transport, Arc<Received>) {
    let received = Arc::new(Received::default());
    let sender = Recorder {
        received: received.clone(),
        fail,
    };
    (Transport::new(key, Box::new(sender)), received)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn shared_config() -> SessionConfig {
    SessionConfig {
        shared: true,
        ..SessionConfig::default()
    }
}

fn prepared(stub: &Stub) -> MediaSession {
    let session = MediaSession::with_config(stub.clone(), shared_config());
    session.prepare().expect("prepare");
    session
}

// ---------------------------------------------------------------------------
// Prepare
// ---------------------------------------------------------------------------

#[test]
fn prepare_reaches_prepared_when_producer_signals_ready() {
    let stub = Stub::new(2);
    let session = MediaSession::new(stub.clone());

    session.prepare().unwrap();

    assert_eq!(session.lifecycle(), LifecycleState::Prepared);
    assert_eq!(session.stream_count(), 2);
    assert_eq!(session.stream_caps(1).unwrap().encoding_name, "H264");
    assert!(matches!(
        session.stream_caps(2),
        Err(MediaError::StreamNotFound(2))
    ));
    assert_eq!(session.active_range(), TimeRange::until(None));

    // A second client of a prepared session just proceeds.
    session.prepare().unwrap();
    assert_eq!(stub.log.lock().starts, 1);
}

#[test]
fn prepare_times_out_without_ready_signal() {
    let stub = Stub::new(2).never_ready();
    let config = SessionConfig {
        prepare_timeout: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let session = MediaSession::with_config(stub.clone(), config);

    let err = session.prepare().unwrap_err();

    assert!(matches!(err, MediaError::Prepare(PrepareError::Timeout(_))));
    assert_eq!(session.lifecycle(), LifecycleState::Unprepared);
    assert_eq!(session.stream_count(), 0);
    assert_eq!(stub.log.lock().stops, 1);
}

#[test]
fn prepare_reports_producer_start_failure() {
    let mut stub = Stub::new(1);
    stub.fail_start = true;
    let session = MediaSession::new(stub.clone());

    assert!(matches!(
        session.prepare(),
        Err(MediaError::Prepare(PrepareError::Construction(_)))
    ));
    assert_eq!(session.lifecycle(), LifecycleState::Unprepared);
    assert_eq!(session.stream_count(), 0);
    assert_eq!(stub.log.lock().stops, 0);
}

#[test]
fn producer_error_while_preparing_fails_fast() {
    let stub = Stub::new(1).never_ready();
    let session = MediaSession::new(stub.clone());

    let s = stub.clone();
    let poster = thread::spawn(move || {
        wait_for("producer start", || s.log.lock().handle.is_some());
        s.handle().post(ProducerEvent::Error("caps negotiation failed".into()));
    });

    let started = Instant::now();
    let err = session.prepare().unwrap_err();
    poster.join().unwrap();

    assert!(matches!(err, MediaError::Prepare(PrepareError::Failed(_))));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.lifecycle(), LifecycleState::Unprepared);
}

#[test]
fn teardown_cancels_pending_prepare() {
    let stub = Stub::new(1).never_ready();
    let session = MediaSession::new(stub.clone());

    let s = session.clone();
    let preparing = thread::spawn(move || s.prepare());
    wait_for("preparing", || session.lifecycle() == LifecycleState::Preparing);

    let started = Instant::now();
    session.teardown();
    let result = preparing.join().unwrap();

    assert!(matches!(
        result,
        Err(MediaError::Prepare(PrepareError::Cancelled))
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.lifecycle(), LifecycleState::Unprepared);
}

// ---------------------------------------------------------------------------
// Attach / detach / teardown
// ---------------------------------------------------------------------------

#[test]
fn attach_rejected_unless_prepared() {
    let session = MediaSession::new(Stub::new(1));
    let (transport, received) = recorder("client-a");

    assert!(matches!(
        session.attach_transport(0, transport),
        Err(MediaError::InvalidState {
            state: LifecycleState::Unprepared,
            ..
        })
    ));
    assert_eq!(received.released(), 0);
}

#[test]
fn attach_to_unknown_stream_fails() {
    let session = prepared(&Stub::new(1));
    let (transport, _) = recorder("client-a");
    assert!(matches!(
        session.attach_transport(3, transport),
        Err(MediaError::StreamNotFound(3))
    ));
}

#[test]
fn teardown_releases_every_transport_once_and_is_idempotent() {
    let stub = Stub::new(2);
    let session = prepared(&stub);

    let mut all = Vec::new();
    for (stream, key) in [(0, "a"), (0, "b"), (1, "a")] {
        let (transport, received) = recorder(key);
        session.attach_transport(stream, transport).unwrap();
        all.push(received);
    }

    session.teardown();
    session.teardown();

    assert_eq!(session.lifecycle(), LifecycleState::Unprepared);
    assert_eq!(session.stream_count(), 0);
    assert!(all.iter().all(|r| r.released() == 1));
    assert_eq!(stub.log.lock().stops, 1);

    // Teardown of a session that never prepared is a no-op too.
    MediaSession::new(Stub::new(1)).teardown();
}

#[test]
fn session_can_be_prepared_again_after_teardown() {
    let stub = Stub::new(1);
    let session = prepared(&stub);
    let old_handle = stub.handle();
    session.teardown();

    session.prepare().unwrap();
    let (transport, received) = recorder("a");
    session.attach_transport(0, transport).unwrap();

    assert_eq!(old_handle.push_rtp(0, b"stale"), 0);
    assert_eq!(stub.handle().push_rtp(0, b"fresh"), 1);
    assert_eq!(*received.rtp.lock(), vec![b"fresh".to_vec()]);
}

#[test]
fn packets_reach_exactly_the_attached_transports() {
    let stub = Stub::new(1);
    let session = prepared(&stub);
    let handle = stub.handle();

    let (a, ra) = recorder("a");
    session.attach_transport(0, a).unwrap();
    for _ in 0..3 {
        handle.push_rtp(0, b"x");
    }

    let (b, rb) = recorder("b");
    session.attach_transport(0, b).unwrap();
    handle.push_rtp(0, b"x");
    handle.push_rtcp(0, b"r");

    session.detach_transport(0, &TransportKey::from("a")).unwrap();
    for _ in 0..4 {
        assert_eq!(handle.push_rtp(0, b"x"), 1);
    }

    assert_eq!(ra.rtp_count(), 4);
    assert_eq!(ra.rtcp.lock().len(), 1);
    assert_eq!(ra.released(), 1);
    assert_eq!(rb.rtp_count(), 5);
    assert_eq!(rb.released(), 0);
    assert!(!ra.sent_after_release.load(Ordering::SeqCst));
}

#[test]
fn concurrent_detach_never_delivers_after_release() {
    let stub = Stub::new(1);
    let session = prepared(&stub);
    let handle = stub.handle();
    // Attached throughout, so it must see every packet.
    let (anchor, anchor_rx) = recorder("anchor");
    session.attach_transport(0, anchor).unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let producer = thread::spawn(move || {
        let mut seq = 0u32;
        while r.load(Ordering::SeqCst) {
            handle.push_rtp(0, &seq.to_be_bytes());
            seq += 1;
            thread::sleep(Duration::from_micros(20));
        }
        seq
    });

    let mut clients = Vec::new();
    for i in 0..50 {
        let key = format!("client-{i}");
        let (transport, received) = recorder(&key);
        session.attach_transport(0, transport).unwrap();
        thread::sleep(Duration::from_micros(200));
        session
            .detach_transport(0, &TransportKey::from(key))
            .unwrap();
        clients.push(received);
    }
    running.store(false, Ordering::SeqCst);
    let produced = producer.join().unwrap();

    assert_eq!(anchor_rx.rtp_count(), produced as usize);
    for received in &clients {
        assert_eq!(received.released(), 1);
        assert!(!received.sent_after_release.load(Ordering::SeqCst));
        // Contiguous: every packet produced while attached, none skipped.
        let seqs: Vec<u32> = received
            .rtp
            .lock()
            .iter()
            .map(|p| u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
            .collect();
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    }
}

#[test]
fn fifty_parallel_attaches_all_land() {
    let session = prepared(&Stub::new(1));

    let workers: Vec<_> = (0..50)
        .map(|i| {
            let session = session.clone();
            thread::spawn(move || {
                let (transport, _) = recorder(&format!("receiver-{i}"));
                session.attach_transport(0, transport)
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    assert_eq!(session.transport_count(0).unwrap(), 50);
}

#[test]
fn failing_transport_is_auto_detached_once() {
    let stub = Stub::new(1);
    let config = SessionConfig {
        max_send_failures: 3,
        shared: true,
        ..SessionConfig::default()
    };
    let session = MediaSession::with_config(stub.clone(), config);
    session.prepare().unwrap();
    let handle = stub.handle();

    let (bad, bad_rx) = recorder_with("bad", true);
    let (good, good_rx) = recorder("good");
    session.attach_transport(0, bad).unwrap();
    session.attach_transport(0, good).unwrap();

    for _ in 0..5 {
        assert_eq!(handle.push_rtp(0, b"x"), 1);
    }

    assert_eq!(session.transport_count(0).unwrap(), 1);
    assert_eq!(bad_rx.released(), 1);
    assert_eq!(good_rx.rtp_count(), 5);
    assert!(matches!(
        session.detach_transport(0, &TransportKey::from("bad")),
        Err(MediaError::TransportNotFound { index: 0, .. })
    ));

    session.teardown();
    assert_eq!(bad_rx.released(), 1);
    assert_eq!(good_rx.released(), 1);
}

#[test]
fn unshared_session_ends_with_its_last_transport() {
    let stub = Stub::new(2);
    let session = MediaSession::new(stub.clone());
    session.prepare().unwrap();
    assert!(!session.is_shared());

    let (video, _) = recorder("client");
    let (audio, _) = recorder("client");
    session.attach_transport(0, video).unwrap();
    session.attach_transport(1, audio).unwrap();

    session.detach_transport(0, &"client".into()).unwrap();
    assert_eq!(session.lifecycle(), LifecycleState::Prepared);

    session.detach_transport(1, &"client".into()).unwrap();
    assert_eq!(session.lifecycle(), LifecycleState::Unprepared);
    assert_eq!(stub.log.lock().stops, 1);
}

// ---------------------------------------------------------------------------
// Playback state
// ---------------------------------------------------------------------------

#[test]
fn set_state_requests_producer_and_syncs_transports() {
    let stub = Stub::new(1);
    let session = prepared(&stub);
    let (transport, received) = recorder("a");
    session.attach_transport(0, transport).unwrap();

    let sync = [TransportRef::new(0, "a"), TransportRef::new(0, "missing")];
    session.set_state(PlaybackState::Playing, &sync).unwrap();
    session.set_state(PlaybackState::Paused, &sync).unwrap();

    assert_eq!(
        stub.requests(),
        vec![PlaybackState::Playing, PlaybackState::Paused]
    );
    assert_eq!(
        *received.synced.lock(),
        vec![PlaybackState::Playing, PlaybackState::Paused]
    );
    assert_eq!(session.target_state(), PlaybackState::Paused);
}

#[test]
fn set_state_rejected_before_prepare() {
    let session = MediaSession::new(Stub::new(1));
    assert!(matches!(
        session.set_state(PlaybackState::Playing, &[]),
        Err(MediaError::InvalidState { .. })
    ));
}

#[test]
fn playing_is_deferred_until_buffering_clears() {
    let stub = Stub::new(1);
    let session = prepared(&stub);
    let handle = stub.handle();

    handle.post(ProducerEvent::BufferingLevel(20));
    wait_for("buffering", || session.is_buffering());

    session.set_state(PlaybackState::Playing, &[]).unwrap();
    assert_eq!(session.target_state(), PlaybackState::Playing);
    assert_eq!(stub.requests(), vec![PlaybackState::Paused]);

    handle.post(ProducerEvent::BufferingLevel(60));
    handle.post(ProducerEvent::BufferingLevel(100));
    wait_for("resume", || stub.requests().len() == 2);

    assert_eq!(
        stub.requests(),
        vec![PlaybackState::Paused, PlaybackState::Playing]
    );
    assert!(!session.is_buffering());
}

#[test]
fn buffering_while_playing_pauses_producer() {
    let stub = Stub::new(1);
    let session = prepared(&stub);
    let handle = stub.handle();
    session.set_state(PlaybackState::Playing, &[]).unwrap();

    handle.post(ProducerEvent::BufferingLevel(10));
    handle.post(ProducerEvent::BufferingLevel(100));
    wait_for("resume", || stub.requests().len() == 3);

    assert_eq!(
        stub.requests(),
        vec![
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Playing
        ]
    );
}

#[test]
fn live_sources_ignore_buffering() {
    let stub = Stub::new(1);
    let session = prepared(&stub);
    let listener = Arc::new(Listener::default());
    session.set_listener(listener.clone());
    let handle = stub.handle();

    handle.post(ProducerEvent::LivenessChanged(true));
    handle.post(ProducerEvent::BufferingLevel(10));
    wait_for("dispatch", || listener.events.lock().len() == 2);

    assert!(session.is_live());
    assert!(!session.is_buffering());
    session.set_state(PlaybackState::Playing, &[]).unwrap();
    assert_eq!(stub.requests(), vec![PlaybackState::Playing]);
}

// ---------------------------------------------------------------------------
// Seek
// ---------------------------------------------------------------------------

#[test]
fn seek_on_non_seekable_media_leaves_range() {
    let session = prepared(&Stub::new(1));
    let before = session.active_range();

    let range = TimeRange::new(Duration::from_secs(5), None).unwrap();
    assert!(matches!(session.seek(range), Err(MediaError::NotSeekable)));
    assert_eq!(session.active_range(), before);
}

#[test]
fn seek_updates_active_range() {
    let stub = Stub::new(1).seekable(false);
    let session = prepared(&stub);
    assert_eq!(
        session.active_range().stop(),
        Some(Duration::from_secs(60))
    );

    let range: TimeRange = "npt=10-20".parse().unwrap();
    session.seek(range.clone()).unwrap();

    assert_eq!(session.active_range(), range);
    assert_eq!(stub.log.lock().seeks, vec![range]);
}

#[test]
fn pending_seek_waits_for_preroll() {
    let stub = Stub::new(1).seekable(true);
    let session = prepared(&stub);

    let range: TimeRange = "npt=30-".parse().unwrap();
    session.seek(range.clone()).unwrap();
    assert_eq!(session.active_range(), range);
}

#[test]
fn teardown_cancels_seek_waiting_for_preroll() {
    let stub = Stub::new(1).stalled_seek();
    let session = prepared(&stub);

    let s = session.clone();
    let seeking = thread::spawn(move || s.seek("npt=30-".parse().unwrap()));
    wait_for("seek issued", || !stub.log.lock().seeks.is_empty());

    let started = Instant::now();
    session.teardown();
    let result = seeking.join().unwrap();

    assert!(matches!(
        result,
        Err(MediaError::Prepare(PrepareError::Cancelled))
    ));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(session.lifecycle(), LifecycleState::Unprepared);
    // The cancelled seek never became the active range.
    assert_eq!(session.active_range(), TimeRange::default());
}

// ---------------------------------------------------------------------------
// Asynchronous errors
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Listener {
    events: Mutex<Vec<ProducerEvent>>,
    ended: Mutex<Vec<String>>,
}

impl SessionListener for Listener {
    fn on_event(&self, event: &ProducerEvent) {
        self.events.lock().push(event.clone());
    }

    fn on_session_ended(&self, reason: &MediaError) {
        self.ended.lock().push(reason.to_string());
    }
}

#[test]
fn fatal_producer_error_ends_the_session() {
    let stub = Stub::new(1);
    let session = prepared(&stub);
    let listener = Arc::new(Listener::default());
    session.set_listener(listener.clone());
    let (transport, received) = recorder("a");
    session.attach_transport(0, transport).unwrap();

    stub.handle().post(ProducerEvent::EndOfStream);
    stub.handle().post(ProducerEvent::Error("decoder crashed".into()));

    wait_for("teardown", || received.released() == 1 && stub.log.lock().stops == 1);
    assert_eq!(session.lifecycle(), LifecycleState::Unprepared);
    assert_eq!(
        *listener.events.lock(),
        vec![
            ProducerEvent::EndOfStream,
            ProducerEvent::Error("decoder crashed".into())
        ]
    );
    assert_eq!(
        *listener.ended.lock(),
        vec!["fatal producer error: decoder crashed".to_string()]
    );

    // Ends where a fresh session starts.
    session.prepare().unwrap();
    assert_eq!(session.lifecycle(), LifecycleState::Prepared);
}

/// Restarts the session from inside the fatal-error callback.
#[derive(Default)]
struct Restarter {
    session: Mutex<Option<MediaSession>>,
    restarted: AtomicBool,
}

impl SessionListener for Restarter {
    fn on_session_ended(&self, _reason: &MediaError) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.teardown();
        if session.prepare().is_ok() {
            self.restarted.store(true, Ordering::Release);
        }
    }
}

#[test]
fn restart_from_error_callback_survives_the_stale_teardown() {
    let stub = Stub::new(1);
    let session = prepared(&stub);
    let restarter = Arc::new(Restarter::default());
    *restarter.session.lock() = Some(session.clone());
    session.set_listener(restarter.clone());

    stub.handle().post(ProducerEvent::Error("decoder crashed".into()));
    wait_for("restart", || restarter.restarted.load(Ordering::Acquire));

    // Give the old pump time to finish handling the error.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(session.lifecycle(), LifecycleState::Prepared);
    assert_eq!(stub.log.lock().stops, 1);
    assert_eq!(stub.log.lock().starts, 2);
}
