pub mod advertiser;
pub mod payload;
pub mod scanner;

use log::error;

pub use advertiser::{BluerAdvertiser, BroadcastDriver};
pub use payload::{encode, AdvertisementPayload};
pub use scanner::scan_for_bridges;

/// Open a BlueZ session and power on its default adapter
///
/// The session is returned alongside the adapter so callers can keep it alive
/// for as long as they use the adapter.
pub async fn default_adapter() -> bluer::Result<(bluer::Session, bluer::Adapter)> {
    let session = bluer::Session::new()
        .await
        .inspect_err(|e| error!("Failed to create Bluetooth session: {}", e))?;

    let adapter = session
        .default_adapter()
        .await
        .inspect_err(|e| error!("Failed to get default Bluetooth adapter: {}", e))?;

    adapter
        .set_powered(true)
        .await
        .inspect_err(|e| error!("Failed to power on adapter {}: {}", adapter.name(), e))?;

    Ok((session, adapter))
}
