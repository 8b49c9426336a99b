//! lumascope CLI
//!
//! Command line front end for the Lumascope camera driver: device listing,
//! full bring-up (firmware load, GPIF and sensor initialization), single
//! frame snapshots, and timed streaming with throughput reporting.

mod config;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::setup_logging;
use driver::rusb_backend::RusbBackend;
use driver::{CameraError, Lumascope};
use tracing::{info, warn};

use config::CameraConfig;

/// How long to wait for the camera to renumerate after firmware load.
const RENUMERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the first complete frame when snapping.
const SNAP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "lumascope")]
#[command(author, version, about = "Lumascope camera control and capture")]
#[command(long_about = "
Control a Lumascope USB microscopy camera: load firmware, configure the
sensor, and capture frames.

EXAMPLES:
    # List attached cameras in either boot state
    lumascope --list-devices

    # Bring the camera up and save one raw RGB frame
    lumascope --snap frame.raw

    # Stream for ten seconds and report throughput
    lumascope --stream 10

    # Override the firmware image and gain for this run
    lumascope --hex ./lumascope.hex --gain 64 --snap frame.raw

CONFIGURATION:
    The tool looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/lumascope/config.toml
    3. /etc/lumascope/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List attached cameras and exit
    #[arg(long)]
    list_devices: bool,

    /// Capture one complete frame and write raw RGB bytes to PATH
    #[arg(long, value_name = "PATH")]
    snap: Option<PathBuf>,

    /// Stream for SECS seconds and report throughput
    #[arg(long, value_name = "SECS")]
    stream: Option<u64>,

    /// Firmware hex image path (overrides configuration)
    #[arg(long, value_name = "PATH")]
    hex: Option<PathBuf>,

    /// Global gain to apply after bring-up
    #[arg(long, value_name = "VALUE")]
    gain: Option<u16>,

    /// Exposure in row periods to apply after bring-up
    #[arg(long, value_name = "ROWS")]
    exposure: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CameraConfig::default();
        let path = CameraConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        CameraConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CameraConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("lumascope v{}", env!("CARGO_PKG_VERSION"));

    let backend = RusbBackend::new().context("Failed to create USB context")?;
    let mut camera = Lumascope::new(backend, config.identity(), config.format());

    if let Some(hex) = args.hex.clone().or_else(|| config.hex_path()) {
        camera.set_hex_path(hex);
    }

    if args.list_devices {
        return list_devices(&camera);
    }

    if args.snap.is_none() && args.stream.is_none() {
        return Err(anyhow!(
            "nothing to do; pass --list-devices, --snap or --stream (see --help)"
        ));
    }

    bring_up(&mut camera).context("Camera bring-up failed")?;

    if let Some(gain) = args.gain {
        let applied = camera.set_global_gain(gain)?;
        info!("global gain set to {}", applied);
    }
    if let Some(rows) = args.exposure {
        let applied = camera.set_exposure(rows)?;
        info!("exposure set to {} rows", applied);
    }

    if let Some(path) = args.snap {
        snap(&mut camera, &path)?;
    }

    if let Some(secs) = args.stream {
        stream(&mut camera, secs)?;
    }

    camera.stop_streaming();
    Ok(())
}

fn list_devices(camera: &Lumascope<RusbBackend>) -> Result<()> {
    let descriptions = camera
        .device_description_list()
        .context("Device enumeration failed")?;

    if descriptions.is_empty() {
        println!("No Lumascope cameras attached.");
    } else {
        for desc in descriptions {
            println!("{}", desc);
        }
    }
    Ok(())
}

/// Run the full bring-up: enumerate in either boot state, load firmware if
/// the camera still sits in its bootloader, then GPIF and sensor setup.
fn bring_up(camera: &mut Lumascope<RusbBackend>) -> Result<()> {
    if camera.find_uninitialized_camera()? {
        info!("found camera in bootloader state, loading firmware");
        camera.load_firmware().context("Firmware load failed")?;

        let deadline = Instant::now() + RENUMERATION_TIMEOUT;
        while !camera.find_initialized_camera()? {
            if Instant::now() >= deadline {
                return Err(anyhow!("camera did not renumerate after firmware load"));
            }
            std::thread::sleep(Duration::from_millis(250));
        }
    } else if !camera.find_initialized_camera()? {
        return Err(CameraError::NotFound.into());
    }

    info!("bound {}", camera.product_name());
    camera.initialize_gpif().context("GPIF setup failed")?;
    camera
        .init_image_sensor()
        .context("Sensor initialization failed")?;

    if let Some(caps) = camera.capabilities() {
        info!(
            "capabilities: gain {}..={}, exposure <= {} rows",
            caps.recommended_min_global_gain, caps.max_global_gain, caps.max_exposure_rows
        );
    }
    for i in 0..camera.pixel_clock_description_count() {
        if let Some(desc) = camera.pixel_clock_description(i) {
            info!("pixel clock [{}]: {}", i, desc);
        }
    }

    Ok(())
}

/// Capture one complete frame and write it as raw RGB bytes.
fn snap(camera: &mut Lumascope<RusbBackend>, path: &std::path::Path) -> Result<()> {
    camera.start_streaming()?;

    let deadline = Instant::now() + SNAP_TIMEOUT;
    let frame = loop {
        let frame = camera.latest_24bpp_buffer();
        if frame.complete {
            break frame;
        }
        if Instant::now() >= deadline {
            camera.stop_streaming();
            return Err(anyhow!("no complete frame within {:?}", SNAP_TIMEOUT));
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    camera.stop_streaming();

    std::fs::write(path, &frame.data)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    let format = camera.frame_format();
    println!(
        "wrote {} ({}x{}, {} bytes)",
        path.display(),
        format.width,
        format.height,
        frame.len()
    );
    Ok(())
}

/// Stream for a fixed duration, reporting throughput once per second.
fn stream(camera: &mut Lumascope<RusbBackend>, secs: u64) -> Result<()> {
    camera.reset_bytes_received();
    camera.start_streaming()?;
    let started = Instant::now();

    let mut last_bytes = 0u64;
    for _ in 0..secs {
        std::thread::sleep(Duration::from_secs(1));

        let bytes = camera.bytes_received();
        info!(
            "received {:.2} MiB total, {:.2} MiB/s",
            bytes as f64 / (1024.0 * 1024.0),
            (bytes - last_bytes) as f64 / (1024.0 * 1024.0)
        );
        last_bytes = bytes;

        for event in camera.stream_events() {
            if let common::channel::StreamEvent::TransferError { error } = event {
                warn!("transfer error: {}", error);
                if error.is_fatal() {
                    camera.stop_streaming();
                    return Err(anyhow!("device lost during streaming"));
                }
            }
        }
    }

    camera.stop_streaming();

    let elapsed = started.elapsed().as_secs_f64();
    let bytes = camera.bytes_received();
    println!(
        "received {} bytes in {:.1}s ({:.2} MiB/s)",
        bytes,
        elapsed,
        bytes as f64 / (1024.0 * 1024.0) / elapsed
    );
    Ok(())
}
