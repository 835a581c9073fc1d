mod bluetooth;
mod bridge;
mod config;
mod error;
mod indicator;
mod models;
mod sensors;
mod utils;

use log::{error, info, warn};
use time::OffsetDateTime;
use tokio::time::Duration;

use bluetooth::{scan_for_bridges, BluerAdvertiser};
use bridge::PollLoop;
use config::DeviceConfig;
use indicator::StatusLed;
use sensors::{IioBus, SensorSource};
use utils::format_datetime;

const DEFAULT_SCAN_SECS: u64 = 10;
const USAGE: &str = "usage: signalk-ble-bridge [scan [seconds]]";

async fn run_bridge(config: DeviceConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("{}", "=".repeat(50));
    info!("SignalK BLE Bridge (Advertisement Mode)");
    info!("{}", "=".repeat(50));
    config.log_summary();

    let mut led = StatusLed::new(config.led_name.as_deref());
    led.blink(3, Duration::from_millis(200)).await;

    let source = SensorSource::new(&config, IioBus::new(&config.iio_root));
    let mut bridge = PollLoop::new(&config, source, BluerAdvertiser::new(), led);

    if let Err(e) = bridge.start().await {
        error!("Failed to start advertising: {}", e);
        return Err(e.into());
    }

    info!(
        "System ready at {}! Broadcasting sensor data...",
        format_datetime(&OffsetDateTime::now_utc())
    );

    bridge.run(shutdown_signal()).await;

    info!(
        "Bridge stopped at {}",
        format_datetime(&OffsetDateTime::now_utc())
    );
    Ok(())
}

async fn run_scan(secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    info!("Scanning for bridges for {} seconds...", secs);
    let bridges = scan_for_bridges(Duration::from_secs(secs)).await?;

    if bridges.is_empty() {
        warn!("No bridges found");
    }

    for (addr, bridge) in bridges.iter() {
        info!(
            "{} ({}), RSSI {} dBm",
            bridge.name.as_deref().unwrap_or("Unknown"),
            addr,
            bridge
                .rssi
                .map(|rssi| rssi.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        info!("  Format version: {}", bridge.data.version);
        info!("  Temperature: {:.2}°C", bridge.data.temperature);
        info!("  Humidity: {:.2}%", bridge.data.humidity);
        info!("  Pressure: {:.1} hPa", bridge.data.pressure / 100.0);
        info!("  Battery: {}%", bridge.data.battery);
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Keyboard interrupt - shutting down..."),
        _ = terminate => info!("Terminated - shutting down..."),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => {}
        Some("scan") => {
            let secs = match args.next() {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| format!("invalid scan duration '{}'", raw))?,
                None => DEFAULT_SCAN_SECS,
            };
            return run_scan(secs).await;
        }
        Some(other) => {
            error!("Unknown command '{}'", other);
            return Err(USAGE.into());
        }
    }

    // Load configuration
    let config = match DeviceConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = run_bridge(config).await {
        error!("Fatal error: {}", e);
        return Err(e);
    }

    Ok(())
}
