//! Camera Snapshot Tool
//!
//! Finds a VC0706-class camera on a serial port, prints its settings and saves
//! one JPEG.
//!
//! Usage:
//!   cargo run --example snapshot -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port (default: first port found)
//!   --config FILE     Load settings from a JSON config file
//!   --out FILE        Output file (default: snapshot.jpg)
//!   --size WxH        Image size: 640x480, 320x240 or 160x120
//!   --chunk BYTES     Bytes per frame buffer read
//!   --demo            Use the simulated camera instead of a serial port
//!   --list            List serial ports and exit
//!
//! Set RUST_LOG=camlink_core=debug to see the protocol traffic.

use anyhow::{bail, Context, Result};
use camlink_core::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut out_path = "snapshot.jpg".to_string();
    let mut image_size: Option<ImageSize> = None;
    let mut chunk_size: Option<u32> = None;
    let mut demo = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                port_name = args.get(i).cloned();
            }
            "--config" | "-c" => {
                i += 1;
                config_path = args.get(i).cloned();
            }
            "--out" | "-o" => {
                i += 1;
                if let Some(path) = args.get(i) {
                    out_path = path.clone();
                }
            }
            "--size" | "-s" => {
                i += 1;
                image_size = match args.get(i).map(String::as_str) {
                    Some("640x480") => Some(ImageSize::Res640x480),
                    Some("320x240") => Some(ImageSize::Res320x240),
                    Some("160x120") => Some(ImageSize::Res160x120),
                    other => bail!("unknown image size {:?}", other),
                };
            }
            "--chunk" => {
                i += 1;
                let value = args.get(i).context("--chunk needs a value")?;
                chunk_size = Some(value.parse().context("invalid chunk size")?);
            }
            "--demo" => demo = true,
            "--list" => {
                for port in list_ports() {
                    println!("{}  {}", port.name, port.product.unwrap_or_default());
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other if !other.starts_with('-') => port_name = Some(other.to_string()),
            other => bail!("unknown option {}", other),
        }
        i += 1;
    }

    let mut config = match &config_path {
        Some(path) => CameraConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => CameraConfig::default(),
    };
    if let Some(size) = image_size {
        config.image_size = size;
    }
    if let Some(chunk) = chunk_size {
        config.chunk_size = chunk;
    }

    let mut camera = if demo {
        println!("Using simulated camera");
        Camera::new(
            Box::new(SimulatedCamera::new(SimulatorConfig {
                image_len: 12_000,
                ..SimulatorConfig::default()
            })),
            config,
        )
    } else {
        if let Some(port) = port_name {
            config.port_name = port;
        }
        if config.port_name.is_empty() {
            config.port_name = list_ports()
                .into_iter()
                .next()
                .map(|p| p.name)
                .context("no serial ports found; pass --port")?;
        }
        println!("Using port {}", config.port_name);
        Camera::open(config)?
    };

    let speed = camera.initialize().context("camera did not answer")?;
    println!("Connected at {} baud", speed);
    println!("Firmware:    {}", camera.version()?);
    println!("Image size:  {}", camera.image_size()?);
    println!("Compression: {:#04x}", camera.compression()?);
    println!("Color mode:  {:?}", camera.color_mode()?);

    let report = camera.capture_to_file(&out_path)?;
    println!(
        "Saved {} bytes in {} chunks to {} ({:.2}s)",
        report.bytes,
        report.chunks,
        out_path,
        report.elapsed.as_secs_f64()
    );

    let counters = camera.counters();
    println!(
        "Link: {} bytes out, {} bytes in, {} frames",
        counters.tx_bytes, counters.rx_bytes, counters.tx_frames
    );
    Ok(())
}

fn print_help() {
    println!("Camera Snapshot Tool");
    println!();
    println!("Usage: snapshot [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port PORT       Serial port (default: first port found)");
    println!("  --config FILE     Load settings from a JSON config file");
    println!("  --out FILE        Output file (default: snapshot.jpg)");
    println!("  --size WxH        Image size: 640x480, 320x240 or 160x120");
    println!("  --chunk BYTES     Bytes per frame buffer read");
    println!("  --demo            Use the simulated camera");
    println!("  --list            List serial ports and exit");
}
