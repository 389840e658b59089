use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use rtsp_media::transport::UdpSender;
use rtsp_media::{
    MediaError, MediaKind, MediaSession, PlaybackState, ProducerEvent, SessionConfig,
    SessionListener, StreamCaps, Transport, TransportRef,
};

mod rtp;
mod source;

use source::SyntheticSource;

#[derive(Parser)]
#[command(
    name = "rtsp-media-demo",
    about = "Stream a synthetic live source to a UDP receiver through a media session"
)]
struct Args {
    /// Receiver address
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// First RTP port; stream N uses port + 2N, RTCP one above
    #[arg(long, short, default_value_t = 5000)]
    port: u16,

    /// Number of elementary streams (the first is video, the rest audio)
    #[arg(long, default_value_t = 2)]
    streams: usize,

    /// Packets per second per stream
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Dummy payload size in bytes
    #[arg(long, default_value_t = 1000)]
    payload_size: usize,

    /// Seconds to stream before tearing down
    #[arg(long, short, default_value_t = 10)]
    duration: u64,

    /// Seconds to wait for the source to become ready
    #[arg(long, default_value_t = 10)]
    prepare_timeout: u64,

    /// Consecutive send failures before a receiver is dropped (0 = never)
    #[arg(long, default_value_t = 16)]
    max_send_failures: u32,
}

struct LogListener;

impl SessionListener for LogListener {
    fn on_event(&self, event: &ProducerEvent) {
        tracing::info!(?event, "media event");
    }

    fn on_session_ended(&self, reason: &MediaError) {
        tracing::warn!(%reason, "media session ended");
    }
}

fn stream_caps(count: usize) -> Vec<StreamCaps> {
    (0..count)
        .map(|index| {
            if index == 0 {
                StreamCaps::new(MediaKind::Video, 96, "H264", 90000)
                    .with_format_params("packetization-mode=1")
            } else {
                StreamCaps::new(MediaKind::Audio, 96 + index as u8, "opus", 48000).with_channels(2)
            }
        })
        .collect()
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let config = SessionConfig {
        prepare_timeout: Duration::from_secs(args.prepare_timeout),
        max_send_failures: args.max_send_failures,
        ..SessionConfig::default()
    };
    let source = SyntheticSource::new(stream_caps(args.streams), args.fps, args.payload_size);
    let session = MediaSession::with_config(source, config);
    session.set_listener(Arc::new(LogListener));

    session.prepare()?;
    for index in 0..session.stream_count() {
        let caps = session.stream_caps(index)?;
        tracing::info!(stream = index, rtpmap = %caps.rtpmap(), "stream ready");
    }

    let socket = UdpSender::bind_socket()?;
    let mut sync = Vec::new();
    for index in 0..session.stream_count() {
        let rtp_port = args.port + 2 * index as u16;
        let rtp = SocketAddr::new(args.host, rtp_port);
        let rtcp = SocketAddr::new(args.host, rtp_port + 1);
        let sender = UdpSender::unicast(socket.clone(), rtp, rtcp);
        session.attach_transport(index, Transport::new(rtp, Box::new(sender)))?;
        sync.push(TransportRef::new(index, rtp));
    }

    session.set_state(PlaybackState::Playing, &sync)?;
    println!(
        "Streaming {} stream(s) to {}:{} for {}s",
        args.streams, args.host, args.port, args.duration
    );
    thread::sleep(Duration::from_secs(args.duration));

    session.teardown();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Demo failed: {}", e);
        std::process::exit(1);
    }
}
