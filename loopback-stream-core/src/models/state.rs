use serde::{Deserialize, Serialize};

/// Capture session lifecycle phase.
///
/// State transitions:
/// ```text
/// idle ─select→ device_selected ─start→ capturing
///                 ↑   ↑ select/stop/         │
///                 │   └──── primitive stop ──┘
///                 └─ select (re-select)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureState {
    Idle,
    DeviceSelected,
    Capturing,
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn has_device(&self) -> bool {
        !self.is_idle()
    }
}
