/// Optional status LED driven through the Linux LED class interface
use log::{debug, warn};
use std::path::PathBuf;
use tokio::time::{sleep, Duration};

const LED_CLASS_ROOT: &str = "/sys/class/leds";
const ACTIVITY_PULSE: Duration = Duration::from_millis(50);

pub struct StatusLed {
    brightness: Option<PathBuf>,
}

impl StatusLed {
    /// LED named `led_name` under `/sys/class/leds`, or a no-op indicator
    pub fn new(led_name: Option<&str>) -> Self {
        Self::at(led_name.map(|name| PathBuf::from(LED_CLASS_ROOT).join(name).join("brightness")))
    }

    pub fn at(brightness: Option<PathBuf>) -> Self {
        StatusLed { brightness }
    }

    pub fn is_enabled(&self) -> bool {
        self.brightness.is_some()
    }

    /// Switch the LED; the first write failure disables the indicator
    pub async fn set(&mut self, on: bool) {
        let Some(path) = &self.brightness else {
            return;
        };

        if let Err(e) = tokio::fs::write(path, if on { "1" } else { "0" }).await {
            warn!("LED not available at {}: {}", path.display(), e);
            self.brightness = None;
        }
    }

    pub async fn blink(&mut self, times: u32, delay: Duration) {
        for _ in 0..times {
            self.set(true).await;
            sleep(delay).await;
            self.set(false).await;
            sleep(delay).await;
        }
    }

    /// Short flash marking a broadcast update
    pub async fn pulse(&mut self) {
        if self.is_enabled() {
            debug!("Activity pulse");
            self.set(true).await;
            sleep(ACTIVITY_PULSE).await;
            self.set(false).await;
        }
    }
}
