use std::process;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use framecast::protocol::FrameLayout;
use framecast::{OutgoingFrame, Receiver, ReceiverConfig, Sender, SenderConfig, TransportError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "framecast", about = "Send or monitor low-latency UDP preview streams")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a synthetic test pattern with a tone on the audio track
    Send(SendArgs),
    /// Receive a stream and log per-frame statistics
    Monitor(MonitorArgs),
}

#[derive(Args)]
struct StreamArgs {
    /// Destination or group address (IPv4 or IPv6 literal)
    #[arg(long, short, default_value = "239.255.0.1")]
    address: String,

    #[arg(long, short, default_value_t = 5004)]
    port: u16,

    /// Ring slots; sender and receivers must agree
    #[arg(long, default_value_t = framecast::config::DEFAULT_RING_SLOTS)]
    ring_slots: usize,
}

#[derive(Args)]
struct SendArgs {
    #[command(flatten)]
    stream: StreamArgs,

    #[arg(long, default_value_t = 320)]
    width: u16,

    #[arg(long, default_value_t = 180)]
    height: u16,

    #[arg(long, default_value_t = 25)]
    fps: u16,

    /// Stop after this many frames (runs until killed when omitted)
    #[arg(long)]
    count: Option<u32>,

    /// Source name carried in every frame header
    #[arg(long, default_value = "framecast test pattern")]
    source: String,

    /// Multicast TTL / hop limit
    #[arg(long, default_value_t = 1)]
    hops: u32,
}

#[derive(Args)]
struct MonitorArgs {
    #[command(flatten)]
    stream: StreamArgs,

    /// Per-frame wait in milliseconds
    #[arg(long, default_value_t = 200)]
    timeout_ms: u64,

    /// Stop after this many delivered frames (runs until killed when omitted)
    #[arg(long)]
    count: Option<u32>,

    /// Largest expected frame size, WIDTHxHEIGHT
    #[arg(long, default_value = "1280x720", value_parser = parse_resolution)]
    max_resolution: (u16, u16),
}

const AUDIO_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u8 = 2;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Send(args) => run_send(args),
        Command::Monitor(args) => run_monitor(args),
    };

    if let Err(e) = result {
        eprintln!("framecast: {e}");
        process::exit(1);
    }
}

fn run_send(args: SendArgs) -> framecast::Result<()> {
    if args.fps == 0 {
        return Err(TransportError::Config("fps must be non-zero".into()));
    }
    let config = SenderConfig {
        ring_slots: args.stream.ring_slots,
        multicast_hops: args.hops,
        ..Default::default()
    };
    let mut sender = Sender::with_config(&args.stream.address, args.stream.port, config)?;

    let interval = Duration::from_secs(1) / u32::from(args.fps);
    let samples = (AUDIO_RATE / u32::from(args.fps)) as usize;
    let mut video = vec![0u8; framecast::protocol::video_size(args.width, args.height)];
    let mut audio = vec![0u8; samples * usize::from(AUDIO_CHANNELS) * 2];

    tracing::info!(
        dest = ?sender.peer_addr(),
        width = args.width,
        height = args.height,
        fps = args.fps,
        "sending test pattern"
    );

    let start = Instant::now();
    let mut frame_seq: u32 = 0;
    while args.count.is_none_or(|count| frame_seq < count) {
        test_pattern(&mut video, args.width, args.height, frame_seq);
        tone(&mut audio, frame_seq as usize * samples);

        let frame = OutgoingFrame::new(frame_seq, args.width, args.height, &video, &audio)
            .with_framerate(args.fps, 1)
            .with_audio_channels(AUDIO_CHANNELS)
            .with_timecode(frame_seq, frame_seq)
            .with_source_name(&args.source);
        sender.send_frame(&frame)?;

        frame_seq = frame_seq.wrapping_add(1);
        let due = start + interval * frame_seq;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    tracing::info!(frames = frame_seq, "sender finished");
    Ok(())
}

fn run_monitor(args: MonitorArgs) -> framecast::Result<()> {
    let (width, height) = args.max_resolution;
    let config = ReceiverConfig {
        ring_slots: args.stream.ring_slots,
        ..Default::default()
    }
    .with_max_resolution(width, height);
    let mut receiver = Receiver::with_config(&args.stream.address, args.stream.port, config)?;
    receiver.start()?;

    let timeout = Duration::from_millis(args.timeout_ms);
    let mut frame = framecast::Frame::default();
    let mut delivered: u32 = 0;
    let mut partial: u32 = 0;
    let mut timeouts: u32 = 0;

    while args.count.is_none_or(|count| delivered < count) {
        match receiver.next_frame_into(timeout, &mut frame) {
            Ok(()) => {
                delivered += 1;
                if !frame.complete {
                    partial += 1;
                }
                tracing::info!(
                    frame_seq = frame.header.frame_seq,
                    width = frame.header.width,
                    height = frame.header.height,
                    audio = frame.audio.len(),
                    packets = frame.packets_received,
                    expected = FrameLayout::for_header(&frame.header).packets,
                    complete = frame.complete,
                    assembly_us = frame.assembly_time().map(|t| t.as_micros()),
                    source = %frame.header.source_name,
                    "frame"
                );
            }
            Err(TransportError::Timeout { packets }) => {
                timeouts += 1;
                tracing::debug!(packets, "no frame");
            }
            Err(e) => return Err(e),
        }
    }

    let stats = receiver.stop()?;
    tracing::info!(
        delivered,
        partial,
        timeouts,
        datagrams = stats.datagrams,
        completed = stats.frames_completed,
        dropped = stats.dropped(),
        duplicate = stats.duplicate,
        rewritten = stats.rewritten,
        out_of_bounds = stats.out_of_bounds,
        "monitor finished"
    );
    Ok(())
}

/// Moving diagonal luma bars over flat chroma.
fn test_pattern(video: &mut [u8], width: u16, height: u16, frame_seq: u32) {
    let (w, h) = (usize::from(width), usize::from(height));
    let (luma, chroma) = video.split_at_mut(w * h);
    let shift = frame_seq as usize * 4;
    for y in 0..h {
        for x in 0..w {
            luma[y * w + x] = (((x + y + shift) / 16) % 2 * 160 + 48) as u8;
        }
    }
    chroma.fill(128);
}

/// 1 kHz sine, interleaved signed 16-bit little-endian.
fn tone(audio: &mut [u8], first_sample: usize) {
    let frame_bytes = usize::from(AUDIO_CHANNELS) * 2;
    for (i, sample) in audio.chunks_exact_mut(frame_bytes).enumerate() {
        let t = ((first_sample + i) % AUDIO_RATE as usize) as f32 / AUDIO_RATE as f32;
        let value = ((t * 1000.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
        for channel in sample.chunks_exact_mut(2) {
            channel.copy_from_slice(&value.to_le_bytes());
        }
    }
}

fn parse_resolution(s: &str) -> Result<(u16, u16), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
    let w = w.trim().parse().map_err(|e| format!("width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("height: {e}"))?;
    Ok((w, h))
}
