/// Bluetooth Low Energy scanning for nearby bridges
use futures_util::StreamExt;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::pin::pin;
use tokio::time::{sleep, Duration};

use crate::bluetooth::default_adapter;
use crate::bluetooth::payload::{decode_sensor_data, COMPANY_ID};
use crate::models::BridgeData;

/// A bridge seen during a scan
#[derive(Debug, Clone)]
pub struct DiscoveredBridge {
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub data: BridgeData,
}

/// Scan for bridges and decode their advertised sensor data
///
/// Runs a passive Low Energy discovery for `duration`, then inspects the
/// manufacturer data of every device BlueZ has seen. Devices advertising
/// the bridge company id with a well-formed record are returned.
///
/// # Arguments
/// * `duration` - How long to let discovery run
///
/// # Returns
/// Result containing HashMap of device address -> DiscoveredBridge, or error if scan fails
pub async fn scan_for_bridges(
    duration: Duration,
) -> Result<HashMap<String, DiscoveredBridge>, Box<dyn std::error::Error>> {
    let mut found = HashMap::new();

    let (_session, adapter) = default_adapter().await?;

    // Configure discovery filter for Low Energy devices only
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: false,
        ..Default::default()
    };

    // Apply the discovery filter (warn if it fails, but continue)
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    // Start device discovery in background
    let discovery_handle = match adapter.discover_devices().await {
        Ok(discovery_stream) => tokio::spawn(async move {
            let mut stream = pin!(discovery_stream);
            while let Some(event) = stream.next().await {
                debug!("Discovery event: {:?}", event);
            }
        }),
        Err(e) => {
            error!("Failed to start device discovery: {}", e);
            return Err(e.into());
        }
    };

    sleep(duration).await;
    discovery_handle.abort();

    let devices = match adapter.device_addresses().await {
        Ok(devices) => devices,
        Err(e) => {
            error!("Failed to get device addresses: {}", e);
            return Err(e.into());
        }
    };

    for addr in devices {
        let device = match adapter.device(addr) {
            Ok(device) => device,
            Err(_) => continue,
        };

        let addr_str = device.address().to_string().to_uppercase();

        match device.manufacturer_data().await {
            Ok(Some(manufacturer_data)) => {
                let Some(body) = manufacturer_data.get(&COMPANY_ID) else {
                    continue;
                };
                if let Some(data) = decode_sensor_data(body) {
                    let bridge = DiscoveredBridge {
                        name: device.name().await.ok().flatten(),
                        rssi: device.rssi().await.ok().flatten(),
                        data,
                    };
                    debug!(
                        "Received data from {}: temp={:.2}°C, humidity={:.2}%, pressure={:.1} Pa",
                        addr_str,
                        bridge.data.temperature,
                        bridge.data.humidity,
                        bridge.data.pressure
                    );
                    found.insert(addr_str, bridge);
                }
            }
            Ok(None) => {
                debug!("No manufacturer data for {}", addr_str);
            }
            Err(e) => {
                debug!("Failed to get manufacturer data for {}: {}", addr_str, e);
            }
        }
    }

    Ok(found)
}
