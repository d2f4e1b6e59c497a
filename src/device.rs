//! CPAL device discovery.
//!
//! ```no_run
//! use kilobeat::{CpalDevice, Router};
//!
//! for device in CpalDevice::list_outputs() {
//!     println!("{} ({} Hz, {} ch)", device.name(), device.sample_rate(), device.channels());
//! }
//!
//! let device = CpalDevice::default_output()?;
//! let router = Router::new(device.sample_rate()).with_output(device.create_sink()?);
//! # Ok::<(), kilobeat::AudioDeviceError>(())
//! ```

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::{debug, warn};

use crate::error::AudioDeviceError;
use crate::nodes::CpalSink;

/// A discovered audio output device together with its default stream config.
pub struct CpalDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,

    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalDevice {
    /// The system's default output device.
    pub fn default_output() -> Result<Self, AudioDeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioDeviceError::NoDevice)?;
        let config = device.default_output_config()?;
        Ok(Self::from_parts(device, config))
    }

    /// Every output device that reports a default config.
    ///
    /// Devices that fail to report one are skipped.
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        let devices = match host.output_devices() {
            Ok(devices) => devices,
            Err(err) => {
                warn!(%err, "could not enumerate output devices");
                return Vec::new();
            }
        };
        devices
            .filter_map(|device| {
                let config = device.default_output_config().ok()?;
                Some(Self::from_parts(device, config))
            })
            .collect()
    }

    fn from_parts(device: cpal::Device, config: cpal::SupportedStreamConfig) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        debug!(%name, rate = config.sample_rate().0, "found output device");
        Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            name,
            device,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Open a stream on this device and return the sink node that feeds it.
    pub fn create_sink(&self) -> Result<CpalSink, AudioDeviceError> {
        CpalSink::new(&self.device, &self.config)
    }
}
