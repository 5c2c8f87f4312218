//! Waveshare gateway diagnostic: sends frames given on the command line and
//! prints everything the gateway delivers.
//!
//! Build with `cargo run --features cli --bin waveshare_cli -- 192.168.1.200`.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};

use waveshare_bridge::logging::{init_file_logging, stop_file_logging};
use waveshare_bridge::{
    tlog, BridgeEvent, BridgeSettings, CanDevice, CanFrame, IoError, WaveshareClient,
};

/// Bridge a Waveshare CAN-to-Ethernet gateway to stdout
///
/// Frames are printed in candump syntax (`123#0102`) or, with --json, as one
/// JSON object per line. Frames to send use the same syntax; an `R` data
/// field sends a remote frame (`7DF#R`).
#[derive(Debug, Parser)]
#[clap(version, verbatim_doc_comment)]
struct Args {
    /// Gateway hostname or IP. Required unless given by --config
    host: Option<String>,

    /// Gateway TCP port
    #[clap(short, long)]
    port: Option<u16>,

    /// TOML settings file; command-line options override it
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Stop instead of reconnecting when the connection drops
    #[clap(long)]
    no_reconnect: bool,

    /// Delay between reconnect attempts
    #[clap(long)]
    backoff_ms: Option<u64>,

    /// Connect timeout
    #[clap(long)]
    timeout_ms: Option<u64>,

    /// Frame to send after connecting (repeatable), e.g. 123#0102
    #[clap(short, long = "send", value_parser = parse_frame)]
    send: Vec<CanFrame>,

    /// Print frames as JSON lines
    #[clap(long)]
    json: bool,

    /// Exit after this many frames have been received
    #[clap(short = 'n', long)]
    count: Option<usize>,

    /// Also write logs to a timestamped file in this directory
    #[clap(long)]
    log_dir: Option<PathBuf>,
}

fn parse_frame(s: &str) -> Result<CanFrame, String> {
    s.parse::<CanFrame>().map_err(String::from)
}

fn build_settings(args: &Args) -> Result<BridgeSettings, IoError> {
    let mut settings = match (&args.config, &args.host) {
        (Some(path), _) => BridgeSettings::load(path)?,
        (None, Some(host)) => BridgeSettings::new(host.clone()),
        (None, None) => {
            return Err(IoError::configuration(
                "a gateway host or --config is required",
            ))
        }
    };

    if let Some(host) = &args.host {
        settings.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if args.no_reconnect {
        settings.reconnect = false;
    }
    if let Some(backoff_ms) = args.backoff_ms {
        settings.backoff_ms = backoff_ms;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        settings.connect_timeout_ms = timeout_ms;
    }
    if let Some(log_dir) = &args.log_dir {
        settings.log_dir = Some(log_dir.clone());
    }

    settings.validate()?;
    Ok(settings)
}

fn print_frame(frame: &CanFrame, json: bool) {
    if json {
        match serde_json::to_string(frame) {
            Ok(line) => println!("{}", line),
            Err(e) => tlog!("[waveshare_cli] Failed to serialize frame: {}", e),
        }
    } else {
        println!("{}", frame);
    }
}

/// Receive until Ctrl-C, `count` frames, or the connection is gone for good.
/// Returns the number of frames printed.
async fn pump(
    device: &dyn CanDevice,
    mut frames: broadcast::Receiver<CanFrame>,
    reconnect: bool,
    json: bool,
    count: Option<usize>,
) -> usize {
    let mut events = device.events();
    let mut received = 0usize;
    if count == Some(0) {
        return received;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tlog!("[waveshare_cli] Interrupted");
                return received;
            }
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    print_frame(&frame, json);
                    received += 1;
                    if count.is_some_and(|n| received >= n) {
                        return received;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tlog!("[waveshare_cli] Output fell behind, skipped {} frames", skipped);
                }
                Err(RecvError::Closed) => return received,
            },
            event = events.recv() => match event {
                Ok(BridgeEvent::Disconnected { reason }) if !reconnect => {
                    tlog!("[waveshare_cli] Disconnected: {}", reason);
                    return received;
                }
                Ok(BridgeEvent::GaveUp { attempts }) => {
                    tlog!("[waveshare_cli] Giving up after {} reconnect attempts", attempts);
                    return received;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return received,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), IoError> {
    let args = Args::parse();
    let settings = build_settings(&args)?;

    if let Some(log_dir) = &settings.log_dir {
        init_file_logging(log_dir).map_err(IoError::configuration)?;
    }

    let client = WaveshareClient::new(
        settings.host.clone(),
        settings.port,
        settings.to_connect_options(),
    );
    // Subscribe before any frame can arrive
    let device: &dyn CanDevice = &client;
    let frames = device.subscribe();
    client.connect().await?;

    for frame in &args.send {
        device.send(frame).await?;
        tlog!("[waveshare_cli] Sent {}", frame);
    }

    let received = pump(device, frames, settings.reconnect, args.json, args.count).await;
    tlog!("[waveshare_cli] Received {} frames", received);

    device.close().await;
    stop_file_logging();
    Ok(())
}
