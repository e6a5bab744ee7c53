mod sinks;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use frames::protocol::Role;
use serde_json::{Value, json};
use syncroom_client::clock::{self, LocalClock, ServerClock, SystemClock};
use syncroom_client::playback::{HostPublisher, LocalEvent, Synchronizer};
use syncroom_client::relay::{ChunkAccumulator, HostStream, RelayError, RelayPipeline, drive};
use syncroom_client::{ClientConfig, ClientError, RoomClient, RoomEvent};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::sinks::{ConsolePlayer, FileSink};

/// Guest re-applies the room state at least this often.
const RESYNC_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{context}: {source}")]
    Io { context: String, source: std::io::Error },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("server returned error for {syscall}: {message}")]
    ServerError { syscall: String, message: String },
}

#[derive(Parser, Debug)]
#[command(name = "syncroom", about = "Synchronized playback room CLI")]
struct Cli {
    #[arg(long, env = "SYNCROOM_URL", default_value = "http://127.0.0.1:3000")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check `/healthz`.
    Ping,
    /// Estimate the local-to-server clock offset.
    Time,
    /// Host a room and stream a media file into it.
    Host(HostArgs),
    /// Join a room, follow its playback, and record the relayed stream.
    Guest(GuestArgs),
}

#[derive(Args, Debug)]
struct HostArgs {
    #[arg(long)]
    room: String,

    #[arg(long, help = "Encoded audio file to stream")]
    file: PathBuf,

    #[arg(long, default_value = "audio/webm;codecs=opus")]
    mime: String,

    #[arg(long, default_value_t = 4096, help = "Bytes read from the file per slice")]
    slice_bytes: usize,
}

#[derive(Args, Debug)]
struct GuestArgs {
    #[arg(long)]
    room: String,

    #[arg(long, help = "Where relayed fragments are written")]
    out: PathBuf,

    #[arg(long, default_value_t = false, help = "Exit when the host stops streaming")]
    exit_on_stop: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Ping => run_ping(&cli.url).await,
        Command::Time => run_time(&cli.url).await,
        Command::Host(args) => run_host(&cli.url, args).await,
        Command::Guest(args) => run_guest(&cli.url, args).await,
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerError {
            syscall: format!("HTTP {}", status.as_u16()),
            message: "health check failed".to_owned(),
        });
    }
    println!("ok");
    Ok(())
}

async fn run_time(base_url: &str) -> Result<(), CliError> {
    let (client, _events) = RoomClient::connect(base_url, ClientConfig::default()).await?;
    let local = SystemClock;
    let server_clock = clock::calibrate(&client, &local, client.config().request_timeout).await;
    let local_now = local.now_ms();
    print_json(&json!({
        "connectionId": client.connection_id(),
        "offsetMs": server_clock.offset_ms(),
        "localNow": local_now,
        "serverNow": server_clock.server_now(local_now),
    }))
}

// =============================================================================
// HOST
// =============================================================================

async fn run_host(base_url: &str, args: HostArgs) -> Result<(), CliError> {
    let mut file = tokio::fs::File::open(&args.file)
        .await
        .map_err(|source| CliError::Io { context: format!("open {}", args.file.display()), source })?;

    let (client, _events) = RoomClient::connect(base_url, ClientConfig::default()).await?;
    let local = SystemClock;
    let server_clock = clock::calibrate(&client, &local, client.config().request_timeout).await;
    let server_now = || server_clock.server_now(local.now_ms());

    let joined = client.join(&args.room, Role::Host).await?;
    info!(room = %joined.room_id, "host: joined");

    let mut stream = HostStream::new();
    let mime_type = stream.start(&args.mime)?;
    client.start_stream(&mime_type)?;

    let mut publisher = HostPublisher::new(client.config());
    let lead_ms = client.config().start_lead_ms;
    let state = publisher.on_local_event(LocalEvent::Play { position: 0.0 }, server_now());
    client.send_host_state(&state)?;
    let play_clock = Instant::now();

    let mut accumulator = ChunkAccumulator::new();
    let mut ticker = tokio::time::interval(client.config().slice);
    let mut buf = vec![0_u8; args.slice_bytes.max(1)];
    loop {
        ticker.tick().await;
        let read = file
            .read(&mut buf)
            .await
            .map_err(|source| CliError::Io { context: "read input".to_owned(), source })?;
        if read > 0 {
            accumulator.push(&buf[..read]);
        }
        if let Some(bytes) = accumulator.tick() {
            if let Some(chunk) = stream.chunk(bytes)? {
                client.send_chunk(chunk)?;
            }
        }
        if let Some(state) = publisher.heartbeat(playhead(play_clock, lead_ms), server_now()) {
            debug!(position = state.position, "host: heartbeat");
            client.send_host_state(&state)?;
        }
        if read == 0 {
            break;
        }
    }

    stream.stop();
    client.stop_stream()?;
    let state = publisher.on_local_event(LocalEvent::Pause { position: playhead(play_clock, lead_ms) }, server_now());
    client.send_host_state(&state)?;

    // Frames leave in order; one reply means everything before it was sent.
    client.server_time().await?;
    info!(chunks = stream.chunks_sent(), "host: stream complete");
    Ok(())
}

/// Seconds of playback since the scheduled start.
#[allow(clippy::cast_precision_loss)]
fn playhead(play_clock: Instant, lead_ms: i64) -> f64 {
    let elapsed_ms = i64::try_from(play_clock.elapsed().as_millis()).unwrap_or(i64::MAX);
    (elapsed_ms - lead_ms).max(0) as f64 / 1000.0
}

// =============================================================================
// GUEST
// =============================================================================

async fn run_guest(base_url: &str, args: GuestArgs) -> Result<(), CliError> {
    let (client, mut events) = RoomClient::connect(base_url, ClientConfig::default()).await?;
    let local = SystemClock;
    let server_clock = clock::calibrate(&client, &local, client.config().request_timeout).await;

    let joined = client.join(&args.room, Role::Guest).await?;
    info!(room = %joined.room_id, has_host = joined.has_host, "guest: joined");

    let mut sync = Synchronizer::new();
    let mut player = ConsolePlayer::new();
    let mut pipeline = RelayPipeline::new();
    let mut sink = FileSink::new(args.out);

    // A terminal has no autoplay gate.
    sync.unlock(&mut player, now(server_clock, &local));
    let mut retry = None;
    if let Some(state) = joined.state {
        retry = sync.receive(state, &mut player, now(server_clock, &local)).retry_after();
    }
    if let Some(mime_type) = joined.stream.mime_type.filter(|_| joined.stream.active) {
        let actions = pipeline.stream_started(&mime_type);
        drive(&mut pipeline, &mut sink, actions);
    }

    loop {
        let wait = retry.unwrap_or(RESYNC_INTERVAL);
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("guest: connection closed");
                    break;
                };
                match event {
                    RoomEvent::RoomState(state) => {
                        retry = sync.receive(state, &mut player, now(server_clock, &local)).retry_after();
                    }
                    RoomEvent::StreamStart { mime_type } => {
                        let actions = pipeline.stream_started(&mime_type);
                        drive(&mut pipeline, &mut sink, actions);
                    }
                    RoomEvent::Chunk(bytes) => {
                        let actions = pipeline.chunk_arrived(bytes);
                        drive(&mut pipeline, &mut sink, actions);
                    }
                    RoomEvent::StreamStop => {
                        let actions = pipeline.reset();
                        drive(&mut pipeline, &mut sink, actions);
                        if args.exit_on_stop {
                            break;
                        }
                    }
                }
            }
            () = tokio::time::sleep(wait) => {
                retry = sync
                    .resync(&mut player, now(server_clock, &local))
                    .and_then(|report| report.retry_after());
            }
        }
    }

    let actions = pipeline.reset();
    drive(&mut pipeline, &mut sink, actions);
    info!(path = %sink.path().display(), "guest: done");
    Ok(())
}

fn now(server_clock: ServerClock, local: &dyn LocalClock) -> i64 {
    server_clock.server_now(local.now_ms())
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
