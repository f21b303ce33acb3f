//! frame_publisher - publish still JPEG frames to the frame queue.
//!
//! Reads every `.jpg`/`.jpeg` file in a directory (sorted by name) and
//! publishes each one as `{"frame": "<base64 jpeg>"}` at a fixed interval.
//! Useful for driving `scooperd` without a camera.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scooper_watch::frame::{decode_jpeg, FramePayload};
use scooper_watch::transport::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};

const PUBLISHER_NAME: &str = "frame_publisher";
const CONNECT_RETRY: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_PACKET_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish JPEG stills to the scooper frame queue")]
struct Args {
    /// Directory of JPEG frames.
    #[arg(long)]
    frames_dir: PathBuf,

    /// Broker address (host:port, mqtt:// or mqtts://).
    #[arg(long, env = "SCOOPER_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    broker_addr: String,

    /// Frame topic.
    #[arg(long, env = "SCOOPER_FRAME_TOPIC", default_value = "frames")]
    topic: String,

    #[arg(long, env = "SCOOPER_BROKER_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "SCOOPER_BROKER_PASSWORD")]
    password: Option<String>,

    /// Enable TLS (implied by mqtts://).
    #[arg(long)]
    use_tls: bool,

    /// PEM CA certificate for TLS.
    #[arg(long)]
    tls_ca_path: Option<PathBuf>,

    /// Delay between frames in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Start over from the first frame after the last one.
    #[arg(long = "loop")]
    repeat: bool,

    #[arg(long, default_value = PUBLISHER_NAME)]
    client_id: String,
}

/// Client plus a thread driving its event loop.
struct MqttRuntime {
    client: Client,
    alive: Arc<AtomicBool>,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttRuntime {
    fn new(client: Client, mut connection: Connection) -> Self {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = alive.clone();
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                if let Err(e) = event {
                    log::warn!("broker connection error: {}", e);
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
        });
        Self {
            client,
            alive,
            connection_handle: Some(handle),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn disconnect(mut self) -> Result<()> {
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let endpoint = parse_mqtt_endpoint(&args.broker_addr, args.use_tls)?;
    let tls = TlsMaterials::load(args.tls_ca_path.as_deref(), None, None)?;
    let frames = list_frames(&args.frames_dir)?;
    if frames.is_empty() {
        return Err(anyhow!(
            "no .jpg/.jpeg files found in {}",
            args.frames_dir.display()
        ));
    }
    log::info!(
        "publishing {} frames from {} to '{}' every {} ms{}",
        frames.len(),
        args.frames_dir.display(),
        args.topic,
        args.interval_ms,
        if args.repeat { " (looping)" } else { "" }
    );

    let mut runtime = connect_with_retry(&args, &endpoint, &tls);
    let interval = Duration::from_millis(args.interval_ms);
    let mut published = 0u64;
    loop {
        for path in &frames {
            if !runtime.is_alive() {
                log::warn!("broker connection lost, reconnecting...");
                runtime = connect_with_retry(&args, &endpoint, &tls);
            }
            let payload = match load_payload(path) {
                Ok(payload) => payload,
                Err(e) => {
                    log::warn!("skipping {}: {:#}", path.display(), e);
                    continue;
                }
            };
            if let Err(e) = runtime
                .client
                .publish(args.topic.as_str(), QoS::AtLeastOnce, false, payload)
            {
                log::warn!("failed to publish {}: {}", path.display(), e);
            } else {
                published += 1;
                log::debug!("published {}", path.display());
            }
            std::thread::sleep(interval);
        }
        if !args.repeat {
            break;
        }
    }

    log::info!("all frames sent ({} published), exiting", published);
    runtime.disconnect()?;
    Ok(())
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read frames directory {}", dir.display()))?
    {
        let path = entry?.path();
        let is_jpeg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg"))
            .unwrap_or(false);
        if is_jpeg && path.is_file() {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

fn load_payload(path: &Path) -> Result<Vec<u8>> {
    let jpeg = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    decode_jpeg(&jpeg)?;
    FramePayload::from_jpeg(&jpeg).to_json()
}

/// Block until the broker accepts the connection, retrying like the consumer.
fn connect_with_retry(args: &Args, endpoint: &MqttEndpoint, tls: &TlsMaterials) -> MqttRuntime {
    loop {
        match connect_mqtt(args, endpoint, tls) {
            Ok(runtime) => return runtime,
            Err(e) => {
                log::warn!("waiting for broker ({:#})", e);
                std::thread::sleep(CONNECT_RETRY);
            }
        }
    }
}

fn connect_mqtt(args: &Args, endpoint: &MqttEndpoint, tls: &TlsMaterials) -> Result<MqttRuntime> {
    let mut options = MqttOptions::new(&args.client_id, &endpoint.host, endpoint.port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_start(true);
    options.set_max_packet_size(Some(MAX_PACKET_BYTES));
    if let Some(user) = args.username.as_deref() {
        options.set_credentials(user, args.password.as_deref().unwrap_or_default());
    }
    options.set_transport(tls.build_transport(endpoint)?);

    let (client, mut connection) = Client::new(options, 10);
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(anyhow!("broker connect timed out"));
        }
        match connection.recv_timeout(remaining) {
            Ok(Ok(Event::Incoming(Incoming::ConnAck(_)))) => break,
            Ok(Ok(_)) | Err(_) => {}
            Ok(Err(e)) => return Err(anyhow!("broker connection failed: {}", e)),
        }
    }
    log::info!(
        "connected to broker {}:{} (TLS: {}, auth: {})",
        endpoint.host,
        endpoint.port,
        endpoint.use_tls,
        args.username.is_some()
    );
    Ok(MqttRuntime::new(client, connection))
}
