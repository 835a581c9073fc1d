/// Broadcasting the sensor payload through the BlueZ advertising manager
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::{Adapter, AdapterEvent, Device, DeviceEvent, DeviceProperty, Session};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};

use crate::bluetooth::default_adapter;
use crate::bluetooth::payload::{
    AdvertisementPayload, AD_TYPE_COMPLETE_NAME, AD_TYPE_FLAGS, AD_TYPE_MANUFACTURER,
};
use crate::error::BroadcastError;

/// The radio side of the bridge
///
/// Only the poll loop calls `set_payload`; every call replaces whatever was
/// being advertised before.
#[allow(async_fn_in_trait)]
pub trait BroadcastDriver {
    async fn begin(&mut self) -> Result<(), BroadcastError>;

    async fn set_payload(
        &mut self,
        payload: &AdvertisementPayload,
        interval: Duration,
    ) -> Result<(), BroadcastError>;

    async fn stop(&mut self) -> Result<(), BroadcastError>;

    /// Whether a central is currently connected; never blocks
    fn connection_state(&self) -> bool;
}

/// Number of centrals currently connected, shared with the radio event tasks
#[derive(Debug, Clone, Default)]
struct ConnectedDevices(Arc<AtomicUsize>);

impl ConnectedDevices {
    fn any(&self) -> bool {
        self.0.load(Ordering::Relaxed) > 0
    }

    fn tracker(&self) -> DeviceTracker {
        DeviceTracker {
            count: self.clone(),
            connected: false,
        }
    }
}

/// Contribution of one device to the connected count
///
/// Dropping the tracker withdraws its contribution.
struct DeviceTracker {
    count: ConnectedDevices,
    connected: bool,
}

impl DeviceTracker {
    fn update(&mut self, connected: bool) {
        if connected == self.connected {
            return;
        }
        self.connected = connected;
        // Each tracker only withdraws what it added, so the count cannot underflow
        if connected {
            self.count.0.fetch_add(1, Ordering::Relaxed);
        } else {
            self.count.0.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl Drop for DeviceTracker {
    fn drop(&mut self) {
        self.update(false);
    }
}

/// BlueZ-backed broadcaster
#[derive(Default)]
pub struct BluerAdvertiser {
    session: Option<Session>,
    adapter: Option<Adapter>,
    handle: Option<AdvertisementHandle>,
    monitor: Option<JoinHandle<()>>,
    connected: ConnectedDevices,
}

impl BluerAdvertiser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BroadcastDriver for BluerAdvertiser {
    async fn begin(&mut self) -> Result<(), BroadcastError> {
        let (session, adapter) = default_adapter().await?;

        // Connection tracking is informational only, so failures here are not fatal
        match adapter.events().await {
            Ok(events) => {
                let connected = self.connected.clone();
                let watched = adapter.clone();
                self.monitor = Some(tokio::spawn(async move {
                    monitor_connections(watched, events, connected).await;
                }));
            }
            Err(e) => warn!("Failed to subscribe to adapter events: {}", e),
        }

        info!("Advertiser initialized on adapter {}", adapter.name());
        self.session = Some(session);
        self.adapter = Some(adapter);
        Ok(())
    }

    async fn set_payload(
        &mut self,
        payload: &AdvertisementPayload,
        interval: Duration,
    ) -> Result<(), BroadcastError> {
        let adapter = self.adapter.as_ref().ok_or(BroadcastError::NotStarted)?;
        let advertisement = to_advertisement(payload, interval)?;

        // Unregister the previous advertisement before registering its replacement
        self.handle.take();
        let handle = adapter.advertise(advertisement).await?;
        self.handle = Some(handle);

        let bytes = payload.as_bytes();
        debug!("Advertising {} bytes: {:02X?}", bytes.len(), bytes);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BroadcastError> {
        if self.handle.take().is_some() {
            info!("Advertising stopped");
        }
        // Aborting the monitor drops every device tracker, clearing the count
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
        self.adapter = None;
        self.session = None;
        Ok(())
    }

    fn connection_state(&self) -> bool {
        self.connected.any()
    }
}

/// Map an encoded payload onto a BlueZ advertisement
///
/// BlueZ builds the flags element itself and keys manufacturer data by
/// company id, so the flags element is skipped and the first two record
/// bytes become the map key.
pub fn to_advertisement(
    payload: &AdvertisementPayload,
    interval: Duration,
) -> Result<Advertisement, BroadcastError> {
    let mut advertisement = Advertisement {
        advertisement_type: Type::Broadcast,
        min_interval: Some(interval),
        max_interval: Some(interval),
        ..Default::default()
    };

    for element in payload.elements() {
        match element.ad_type {
            AD_TYPE_FLAGS => {}
            AD_TYPE_COMPLETE_NAME => {
                let name = String::from_utf8(element.data.to_vec())
                    .map_err(|_| BroadcastError::MalformedPayload("device name is not UTF-8"))?;
                advertisement.local_name = Some(name);
            }
            AD_TYPE_MANUFACTURER => {
                if element.data.len() < 2 {
                    return Err(BroadcastError::MalformedPayload(
                        "manufacturer data shorter than company id",
                    ));
                }
                let company_id = u16::from_le_bytes([element.data[0], element.data[1]]);
                advertisement
                    .manufacturer_data
                    .insert(company_id, element.data[2..].to_vec());
            }
            other => debug!("Ignoring advertisement element type {:#04x}", other),
        }
    }

    if advertisement.manufacturer_data.is_empty() {
        return Err(BroadcastError::MalformedPayload("missing manufacturer data"));
    }

    Ok(advertisement)
}

async fn monitor_connections<S>(adapter: Adapter, events: S, connected: ConnectedDevices)
where
    S: futures_util::Stream<Item = AdapterEvent>,
{
    let mut events = pin!(events);

    // Dropping the set aborts the per-device watchers with the monitor
    let mut watchers = JoinSet::new();

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(AdapterEvent::DeviceAdded(addr)) => match adapter.device(addr) {
                    Ok(device) => {
                        watchers.spawn(watch_device(device, connected.tracker()));
                    }
                    Err(e) => debug!("Cannot watch device {}: {}", addr, e),
                },
                Some(other) => debug!("Adapter event: {:?}", other),
                None => break,
            },
            Some(finished) = watchers.join_next(), if !watchers.is_empty() => {
                if let Err(e) = finished {
                    debug!("Device watcher ended abnormally: {}", e);
                }
            }
        }
    }
}

async fn watch_device(device: Device, mut tracker: DeviceTracker) {
    if let Ok(true) = device.is_connected().await {
        tracker.update(true);
    }

    let events = match device.events().await {
        Ok(events) => events,
        Err(e) => {
            debug!("Failed to watch {}: {}", device.address(), e);
            return;
        }
    };

    let mut events = pin!(events);
    while let Some(event) = events.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(state)) = event {
            debug!("Device {} connected={}", device.address(), state);
            tracker.update(state);
        }
    }
}
