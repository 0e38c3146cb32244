//! Command-line entry point wiring schema load, capture dispatch, and the
//! replay driver together (spec §6's CLI surface, documented there as an
//! external collaborator to the core).
//!
//! No real libpcap binding ships here (kernel capability, OS-specific,
//! explicitly out of scope per spec §1): capture mode reads framed packets
//! from a file of raw TCP payload blobs via [`FilePayloadSource`] instead,
//! so the binary is runnable end-to-end without root or a NIC.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wiretrace::capture::{Dispatcher, PayloadSource};
use wiretrace::formatter::{Direction, Formatter};
use wiretrace::reassembly::FourTuple;
use wiretrace::replay::{parse_log, Driver as ReplayDriver, Mode as ReplayMode, TcpTransport};
use wiretrace::schema::Schema;

/// Schema-driven TCP protocol capture, decode, and replay.
#[derive(Parser, Debug)]
#[command(name = "wiretrace", version, about)]
struct Cli {
    /// Path to the JSON protocol schema.
    #[arg(short = 'p', long = "schema")]
    schema: PathBuf,

    /// Path to a prior decoded-message log to replay. When absent, the
    /// binary runs in capture mode instead.
    #[arg(short = 'r', long = "replay-log")]
    replay_log: Option<PathBuf>,

    /// Replay target, `host:port`. Required when `--replay-log` is given.
    #[arg(short = 't', long = "target")]
    target: Option<String>,

    /// Capture filter port: the port that decides SEND vs. RECV direction
    /// (glossary's filter-port heuristic). Also the source of truth for
    /// which side of a captured 4-tuple is "us" in capture mode.
    #[arg(long, default_value_t = 7172)]
    port: u16,

    /// Replay pacing policy.
    #[arg(long, value_enum, default_value_t = ModeArg::Timing)]
    mode: ModeArg,

    /// Replay response-wait timeout, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout: u64,

    /// Replay pacing speed multiplier (2.0 replays twice as fast).
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Capture-mode connection idle-expiry, in milliseconds (spec §5's
    /// sweep semantics; an ambient knob the core doesn't hardcode).
    #[arg(long, default_value_t = 30_000)]
    expire_after: u64,

    /// Capture mode's payload source: a file of length-prefixed
    /// `(four-tuple-header, payload)` records, written by an out-of-band
    /// link-layer reader. Required in capture mode.
    #[arg(long)]
    capture_file: Option<PathBuf>,

    /// Where the file-format log rendering is appended. Defaults to
    /// stdout-only console rendering when absent.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum ModeArg {
    Timing,
    Response,
    Hybrid,
}

impl From<ModeArg> for ReplayMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Timing => ReplayMode::Timing,
            ModeArg::Response => ReplayMode::Response,
            ModeArg::Hybrid => ReplayMode::Hybrid,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let schema = Schema::load(&cli.schema)?;

    match &cli.replay_log {
        Some(log_path) => run_replay(&cli, &schema, log_path),
        None => run_capture(&cli, &schema),
    }
}

fn run_replay(cli: &Cli, schema: &Schema, log_path: &PathBuf) -> anyhow::Result<()> {
    let target = cli
        .target
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--target is required in replay mode"))?;

    let text = std::fs::read_to_string(log_path)?;
    let records = parse_log(&text)?;
    tracing::info!(records = records.len(), "loaded replay log");

    let mut transport = TcpTransport::connect(target)?;
    let driver = ReplayDriver::new(
        schema,
        ReplayMode::from(cli.mode),
        Duration::from_millis(cli.timeout),
        cli.speed,
    );
    let summary = driver.run(&records, &mut transport, std::thread::sleep)?;
    println!(
        "replay complete: {} sent, {} received",
        summary.sent, summary.received
    );
    Ok(())
}

fn run_capture(cli: &Cli, schema: &Schema) -> anyhow::Result<()> {
    let capture_file = cli
        .capture_file
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("--capture-file is required in capture mode"))?;

    let mut source = FilePayloadSource::open(capture_file)?;
    let mut dispatcher = Dispatcher::new(schema);
    let formatter = Formatter::new(schema);
    let mut sink: Option<File> = match &cli.log_file {
        Some(path) => Some(File::create(path)?),
        None => None,
    };

    let mut last_swept = std::time::Instant::now();
    let expire_after = Duration::from_millis(cli.expire_after);

    while let Some((tuple, payload)) = source.next_payload() {
        let direction = Direction::from_filter_port(&tuple, cli.port);
        for msg in dispatcher.on_payload(tuple, &payload, schema) {
            let now = chrono::Utc::now();
            print!("{}", formatter.console(&msg, direction, &tuple, now));
            if let Some(file) = sink.as_mut() {
                file.write_all(formatter.file(&msg, direction, &tuple, now).as_bytes())?;
            }
        }

        let now = std::time::Instant::now();
        if now.duration_since(last_swept) >= expire_after {
            dispatcher.sweep_idle(now, expire_after);
            last_swept = now;
        }
    }

    Ok(())
}

/// Reads capture-mode input from a simple line-oriented text format: each
/// line is `srcIP:srcPort dstIP:dstPort <hex payload>`. Stands in for the
/// real link-layer reader (kernel capability, explicitly out of scope per
/// spec §1) so the binary can run end-to-end against a recorded capture.
struct FilePayloadSource {
    lines: std::io::Lines<BufReader<File>>,
}

impl FilePayloadSource {
    fn open(path: &PathBuf) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        Ok(FilePayloadSource {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl PayloadSource for FilePayloadSource {
    fn next_payload(&mut self) -> Option<(FourTuple, Vec<u8>)> {
        loop {
            let line = self.lines.next()?.ok()?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let src = parts.next()?;
            let dst = parts.next()?;
            let hex_payload = parts.next()?;
            let (src_ip, src_port) = parse_endpoint(src)?;
            let (dst_ip, dst_port) = parse_endpoint(dst)?;
            let payload = hex::decode(hex_payload).ok()?;
            return Some((
                FourTuple {
                    src_ip,
                    src_port,
                    dst_ip,
                    dst_port,
                },
                payload,
            ));
        }
    }
}

fn parse_endpoint(s: &str) -> Option<(Ipv4Addr, u16)> {
    let (ip, port) = s.rsplit_once(':')?;
    Some((ip.parse().ok()?, port.parse().ok()?))
}
