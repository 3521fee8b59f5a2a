//! Configuration types
//!
//! Plain serde structs; the host owns loading and persistence.

use serde::{Deserialize, Serialize};

use crate::audio::VOLUME_MAX;

/// RAOP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaopConfig {
    /// Advertised device name
    #[serde(default = "default_name")]
    pub name: String,
    /// RTSP listen port; the server retries upwards when taken
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional password enforcing RTSP digest auth
    #[serde(default)]
    pub password: Option<String>,
    /// Hardware address used in the mDNS service name and the
    /// Apple-Challenge response
    #[serde(default = "default_hw_addr")]
    pub hw_addr: [u8; 6],
    /// Maximum simultaneous RTSP clients
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

fn default_name() -> String {
    "AirCat".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_hw_addr() -> [u8; 6] {
    [0x00, 0x51, 0x52, 0x53, 0x54, 0x55]
}

fn default_max_clients() -> usize {
    2
}

impl Default for RaopConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            password: None,
            hw_addr: default_hw_addr(),
            max_clients: default_max_clients(),
        }
    }
}

/// Output device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output module id ("alsa" or "null")
    #[serde(default = "default_module")]
    pub module: String,
    /// Device sample rate
    #[serde(default = "default_samplerate")]
    pub samplerate: u32,
    /// Device channel count
    #[serde(default = "default_channels")]
    pub channels: u8,
    /// Master volume, `0..=VOLUME_MAX`
    #[serde(default = "default_volume")]
    pub volume: u32,
}

fn default_module() -> String {
    if cfg!(feature = "audio-alsa") {
        "alsa".to_string()
    } else {
        "null".to_string()
    }
}

fn default_samplerate() -> u32 {
    44100
}

fn default_channels() -> u8 {
    2
}

fn default_volume() -> u32 {
    VOLUME_MAX
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            module: default_module(),
            samplerate: default_samplerate(),
            channels: default_channels(),
            volume: default_volume(),
        }
    }
}

impl OutputConfig {
    /// Clamp out-of-range values to usable defaults.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if self.samplerate == 0 {
            self.samplerate = default_samplerate();
        }
        if self.channels == 0 {
            self.channels = default_channels();
        }
        if self.volume > VOLUME_MAX {
            self.volume = VOLUME_MAX;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raop_defaults() {
        let cfg: RaopConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.name, "AirCat");
        assert_eq!(cfg.port, 5000);
        assert!(cfg.password.is_none());
    }

    #[test]
    fn output_sanitize_clamps() {
        let cfg = OutputConfig {
            samplerate: 0,
            channels: 0,
            volume: VOLUME_MAX + 1,
            ..OutputConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.samplerate, 44100);
        assert_eq!(cfg.channels, 2);
        assert_eq!(cfg.volume, VOLUME_MAX);
    }
}
