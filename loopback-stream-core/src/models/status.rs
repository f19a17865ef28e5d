use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audio_models::WaveFormat;
use super::state::CaptureState;

/// Format handshake sent to a subscriber before any audio of a capture run.
///
/// `sample_rate` is the effective (post-decimation) rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub encoding: String,
    pub downsample_factor: u32,
    pub original_sample_rate: u32,
}

impl StreamFormat {
    pub fn new(format: &WaveFormat, downsample_factor: u32) -> Self {
        Self {
            sample_rate: format.sample_rate / downsample_factor.max(1),
            bits_per_sample: format.bits_per_sample,
            channels: format.channels,
            encoding: format.encoding.label().to_string(),
            downsample_factor,
            original_sample_rate: format.sample_rate,
        }
    }
}

/// Active wave format as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveFormatStatus {
    pub original_sample_rate: u32,
    pub effective_sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub encoding: String,
    pub downsample_factor: u32,
}

impl From<&StreamFormat> for WaveFormatStatus {
    fn from(format: &StreamFormat) -> Self {
        Self {
            original_sample_rate: format.original_sample_rate,
            effective_sample_rate: format.sample_rate,
            bits_per_sample: format.bits_per_sample,
            channels: format.channels,
            encoding: format.encoding.clone(),
            downsample_factor: format.downsample_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub name: String,
    pub id: String,
}

/// Pipeline counters since process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub buffers_delivered: u64,
    pub bytes_captured: u64,
    pub bytes_broadcast: u64,
    pub frames_dropped: u64,
}

/// Consistent snapshot of the capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub is_capturing: bool,
    pub phase: CaptureState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_device: Option<DeviceSummary>,
    pub connected_clients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_format: Option<WaveFormatStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_started_at: Option<DateTime<Utc>>,
    pub diagnostics: DiagnosticsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::SampleEncoding;

    #[test]
    fn handshake_reports_effective_rate() {
        let format = WaveFormat {
            sample_rate: 48000,
            bits_per_sample: 16,
            channels: 2,
            encoding: SampleEncoding::Pcm,
        };
        let handshake = StreamFormat::new(&format, 4);
        assert_eq!(handshake.sample_rate, 12000);
        assert_eq!(handshake.original_sample_rate, 48000);
        assert_eq!(handshake.downsample_factor, 4);

        let json = serde_json::to_value(&handshake).unwrap();
        assert_eq!(json["sampleRate"], 12000);
        assert_eq!(json["bitsPerSample"], 16);
        assert_eq!(json["channels"], 2);
        assert_eq!(json["encoding"], "Pcm");
        assert_eq!(json["downsampleFactor"], 4);
        assert_eq!(json["originalSampleRate"], 48000);
    }

    #[test]
    fn odd_rates_truncate() {
        let format = WaveFormat {
            sample_rate: 44100,
            bits_per_sample: 32,
            channels: 2,
            encoding: SampleEncoding::IeeeFloat,
        };
        let status = WaveFormatStatus::from(&StreamFormat::new(&format, 4));
        assert_eq!(status.effective_sample_rate, 11025);

        let status = WaveFormatStatus::from(&StreamFormat::new(&format, 3));
        assert_eq!(status.effective_sample_rate, 14700);
    }

    #[test]
    fn idle_status_omits_optional_fields() {
        let status = SessionStatus {
            is_capturing: false,
            phase: CaptureState::Idle,
            selected_device: None,
            connected_clients: 0,
            wave_format: None,
            capture_started_at: None,
            diagnostics: DiagnosticsSnapshot::default(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["isCapturing"], false);
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["connectedClients"], 0);
        assert!(json.get("selectedDevice").is_none());
        assert!(json.get("waveFormat").is_none());
    }
}
