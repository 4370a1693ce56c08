//! locker-kiosk — the room-level kiosk binary: drains the command queue
//! for one `kiosk_id`, reads the attached RFID reader, and sends periodic
//! heartbeats, all pulsing the same RS-485 bus through one shared
//! [`PulseEngine`] (§5: "the port has a single-consumer mailbox internally").

mod health_server;
mod heartbeat;
mod rfid_loop;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use locker_client::GatewayClient;
use locker_core::config::Config;
use locker_core::constants::DEFAULT_DEBOUNCE_MS;
use locker_core::types::KioskId;
use locker_executor::{Executor, PulseEngine};
use locker_intake::{FakeRfidReader, RfidReader, SerialRfidReader};
use locker_modbus::{serial_parity, SerialTransport};

#[derive(Parser, Debug)]
#[command(
    name = "locker-kiosk",
    version,
    about = "Locker facility Kiosk — command execution, RS-485 actuation and RFID intake for one room"
)]
struct Args {
    /// This kiosk's identity, as registered with the Gateway.
    #[arg(long, env = "LOCKER_KIOSK_ID")]
    kiosk_id: String,

    #[arg(long, env = "LOCKER_CONFIG", default_value = "config/facility.json")]
    config: PathBuf,

    /// Override the Gateway base URL instead of deriving it from config.
    #[arg(long, env = "LOCKER_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Override the listen address for this kiosk's `/healthz` instead of
    /// `services.kiosk_port`.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Serial device the RFID reader is attached to. Omit to run with a
    /// scripted fake reader (local development, no hardware attached).
    #[arg(long, env = "LOCKER_RFID_DEVICE")]
    rfid_device: Option<String>,

    #[arg(long, env = "LOCKER_RFID_BAUD", default_value_t = 9600)]
    rfid_baud: u32,

    /// Optional zone label reported in heartbeats.
    #[arg(long, env = "LOCKER_ZONE")]
    zone: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,locker=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!(kiosk_id = %args.kiosk_id, "locker-kiosk starting");

    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    let kiosk_id = KioskId::new(args.kiosk_id);

    let gateway_url = args
        .gateway_url
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.services.gateway_port));
    let client = Arc::new(GatewayClient::new(gateway_url.clone()));
    info!(%gateway_url, "talking to gateway");

    let transport = Arc::new(SerialTransport::open(
        &config.modbus.port,
        config.modbus.baudrate,
        serial_parity(config.modbus.parity),
        Duration::from_millis(config.modbus.timeout_ms),
    )?);

    let engine = Arc::new(PulseEngine::new(
        transport,
        config.modbus.clone(),
        &config.hardware,
        config.queue.bulk_interval.clone(),
    ));

    let executor = Arc::new(Executor::new(
        kiosk_id.clone(),
        Arc::clone(&client),
        Arc::clone(&engine),
        Duration::from_millis(500),
    ));
    let executor_handle = tokio::spawn(Arc::clone(&executor).run());

    let reader: Box<dyn RfidReader> = match &args.rfid_device {
        Some(device) => {
            info!(%device, baud = args.rfid_baud, "opening rfid reader");
            Box::new(SerialRfidReader::open(
                device,
                args.rfid_baud,
                Duration::from_millis(config.modbus.timeout_ms),
            )?)
        }
        None => {
            tracing::warn!("no --rfid-device configured; running with an empty fake reader");
            Box::new(FakeRfidReader::default())
        }
    };
    let rfid_handle = rfid_loop::spawn(
        reader,
        kiosk_id.clone(),
        Arc::clone(&client),
        Arc::clone(&engine),
        DEFAULT_DEBOUNCE_MS,
    );

    let channel_count: u32 = config
        .hardware
        .relay_cards
        .iter()
        .filter(|c| c.enabled)
        .map(|c| c.channels)
        .sum();
    let heartbeat_handle = heartbeat::spawn(
        kiosk_id.clone(),
        Arc::clone(&client),
        engine.health_counters(),
        Duration::from_secs(locker_core::constants::DEFAULT_HEARTBEAT_INTERVAL_SECS),
        args.zone,
        channel_count,
    );

    let listen = args
        .listen
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], config.services.kiosk_port)));

    tokio::select! {
        result = health_server::serve(listen, engine.health_counters()) => {
            result.context("kiosk health server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    executor_handle.abort();
    rfid_handle.abort();
    heartbeat_handle.abort();

    Ok(())
}
