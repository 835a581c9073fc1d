/// The sample → validate → encode → broadcast loop
use futures_util::FutureExt;
use log::{debug, error, info, log_enabled, warn, Level};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::bluetooth::{encode, AdvertisementPayload, BroadcastDriver};
use crate::config::DeviceConfig;
use crate::error::{BroadcastError, CycleError};
use crate::indicator::StatusLed;
use crate::models::SensorKind;
use crate::sensors::{validate_all, SensorBus, SensorMode, SensorSource};
use crate::utils::resident_pages;

const TICK_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Idle,
    Broadcasting,
}

pub struct PollLoop<'a, B, D> {
    config: &'a DeviceConfig,
    source: SensorSource<B>,
    driver: D,
    led: StatusLed,
    state: LoopState,
    last_cycle: Option<Instant>,
    current_payload: Option<AdvertisementPayload>,
    connection_reported: bool,
    cycles: u64,
}

impl<'a, B, D> PollLoop<'a, B, D>
where
    B: SensorBus,
    D: BroadcastDriver,
{
    pub fn new(
        config: &'a DeviceConfig,
        source: SensorSource<B>,
        driver: D,
        led: StatusLed,
    ) -> Self {
        PollLoop {
            config,
            source,
            driver,
            led,
            state: LoopState::Uninitialized,
            last_cycle: None,
            current_payload: None,
            connection_reported: false,
            cycles: 0,
        }
    }

    /// Bring up the radio and the sensors
    ///
    /// Only a radio failure is fatal; sensor problems end in mock mode.
    pub async fn start(&mut self) -> Result<SensorMode, BroadcastError> {
        self.driver.begin().await?;
        let mode = self.source.initialize().await;
        self.state = LoopState::Idle;
        self.last_cycle = None;
        Ok(mode)
    }

    /// Run a cycle if the update interval has elapsed since the last one
    ///
    /// Returns whether a cycle ran. Failures inside the cycle, including
    /// panics, are logged and the loop stays usable.
    pub async fn tick(&mut self, now: Instant) -> bool {
        if self.state == LoopState::Uninitialized {
            return false;
        }

        self.check_connection();

        let due = match self.last_cycle {
            Some(last) => now.saturating_duration_since(last) >= self.config.update_interval,
            None => true,
        };
        if !due {
            return false;
        }
        self.last_cycle = Some(now);

        let outcome = match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(CycleError::Panic(panic_message(panic))),
        };
        if let Err(e) = outcome {
            error!("Cycle {} failed: {}", self.cycles, e);
        }

        self.state = LoopState::Idle;
        true
    }

    async fn run_cycle(&mut self) -> Result<(), CycleError> {
        let readings = self.source.read_all(self.config).await;

        if !validate_all(&readings) {
            warn!("Some sensor readings are out of range");
        }

        let payload = encode(&readings, self.config);
        self.driver
            .set_payload(&payload, self.config.advertising_interval)
            .await?;
        self.state = LoopState::Broadcasting;

        info!(
            "Advertising: T={:?}°C H={:?}% P={:?}Pa",
            readings.get(SensorKind::Temperature),
            readings.get(SensorKind::Humidity),
            readings.get(SensorKind::Pressure)
        );

        self.led.pulse().await;
        self.housekeeping(payload);
        Ok(())
    }

    /// Drop the superseded payload and report memory use
    fn housekeeping(&mut self, payload: AdvertisementPayload) {
        if let Some(previous) = self.current_payload.replace(payload) {
            let len = previous.as_bytes().len();
            debug!("Released previous {}-byte payload", len);
        }
        self.cycles += 1;

        if log_enabled!(Level::Debug) {
            match resident_pages() {
                Some(pages) => debug!("Cycle {}: resident memory {} pages", self.cycles, pages),
                None => debug!("Cycle {} complete", self.cycles),
            }
        }
    }

    fn check_connection(&mut self) {
        let connected = self.driver.connection_state();
        if connected && !self.connection_reported {
            info!("BLE client connected");
            self.connection_reported = true;
        } else if !connected && self.connection_reported {
            info!("BLE client disconnected");
            self.connection_reported = false;
        }
    }

    /// Tick until `shutdown` resolves, then stop broadcasting
    ///
    /// A cycle that has started always completes before shutdown is handled.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        let mut ticker = interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                now = ticker.tick() => {
                    self.tick(now).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Stop the radio and return to the uninitialized state
    pub async fn shutdown(&mut self) {
        if self.state == LoopState::Uninitialized {
            return;
        }

        info!("Cleaning up...");
        if let Err(e) = self.driver.stop().await {
            error!("Failed to stop broadcasting: {}", e);
        }
        self.led.set(false).await;
        self.current_payload = None;
        self.state = LoopState::Uninitialized;
        info!("Shutdown complete after {} cycles", self.cycles);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
