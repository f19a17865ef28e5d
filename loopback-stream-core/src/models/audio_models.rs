use std::fmt;

use serde::{Deserialize, Serialize};

/// Sample encoding reported by an endpoint's native mix format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleEncoding {
    Pcm,
    IeeeFloat,
    Extensible,
    Unknown,
}

impl SampleEncoding {
    pub const WAVE_FORMAT_PCM: u16 = 0x0001;
    pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
    pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

    /// Map a RIFF `wFormatTag` to an encoding.
    pub fn from_format_tag(tag: u16) -> Self {
        match tag {
            Self::WAVE_FORMAT_PCM => Self::Pcm,
            Self::WAVE_FORMAT_IEEE_FLOAT => Self::IeeeFloat,
            Self::WAVE_FORMAT_EXTENSIBLE => Self::Extensible,
            _ => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pcm => "Pcm",
            Self::IeeeFloat => "IeeeFloat",
            Self::Extensible => "Extensible",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Native wave format of a capture endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaveFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

impl WaveFormat {
    /// Bytes per frame: one sample instant across all channels.
    pub fn frame_size_bytes(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }
}

impl fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit, {} ch, {}",
            self.sample_rate, self.bits_per_sample, self.channels, self.encoding
        )
    }
}

/// Direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointFlow {
    Render,
    Capture,
}

/// Device state as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointState {
    Active,
    Disabled,
    NotPresent,
    Unplugged,
}

/// One entry of a device listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    pub index: usize,
    pub name: String,
    pub id: String,
    pub state: EndpointState,
    pub is_default: bool,
}

/// Render and capture endpoints known to a device directory.
///
/// Enumeration failures produce empty sets with `error` populated instead of
/// failing the call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointListing {
    pub render_devices: Vec<EndpointInfo>,
    pub capture_devices: Vec<EndpointInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EndpointListing {
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_stereo_16bit() {
        let format = WaveFormat {
            sample_rate: 48000,
            bits_per_sample: 16,
            channels: 2,
            encoding: SampleEncoding::Pcm,
        };
        assert_eq!(format.frame_size_bytes(), 4);
    }

    #[test]
    fn frame_size_float_surround() {
        let format = WaveFormat {
            sample_rate: 48000,
            bits_per_sample: 32,
            channels: 6,
            encoding: SampleEncoding::IeeeFloat,
        };
        assert_eq!(format.frame_size_bytes(), 24);
    }

    #[test]
    fn format_tags() {
        assert_eq!(SampleEncoding::from_format_tag(1), SampleEncoding::Pcm);
        assert_eq!(SampleEncoding::from_format_tag(3), SampleEncoding::IeeeFloat);
        assert_eq!(SampleEncoding::from_format_tag(0xFFFE), SampleEncoding::Extensible);
        assert_eq!(SampleEncoding::from_format_tag(0x55), SampleEncoding::Unknown);
    }

    #[test]
    fn degraded_listing_serializes_error() {
        let listing = EndpointListing::degraded("enumeration failed");
        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["renderDevices"].as_array().unwrap().len(), 0);
        assert_eq!(json["captureDevices"].as_array().unwrap().len(), 0);
        assert_eq!(json["error"], "enumeration failed");
    }

    #[test]
    fn healthy_listing_omits_error() {
        let listing = EndpointListing::default();
        let json = serde_json::to_value(&listing).unwrap();
        assert!(json.get("error").is_none());
    }
}
