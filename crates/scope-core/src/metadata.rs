//! Capture metadata published alongside each windowed capture.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{HardwareConfig, HorizontalSettings, TriggerSettings};

/// Metadata stored with a completed capture slot.
///
/// The hardware and processing snapshots are taken at publish time so a
/// consumer can interpret the raw channel bytes (width, channel order,
/// sample rate, trigger alignment) without racing configuration changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// Whether a real trigger produced this capture (`false` for forced,
    /// auto-timeout and stream captures)
    pub triggered: bool,
    /// Hardware channel index the trigger engine was scanning
    pub trigger_channel: usize,
    /// Monotonic capture sequence number within this engine run
    pub sequence: u64,
    /// Absolute sample index at which the capture window ends
    pub end_index: u64,
    /// Wall-clock publish time
    pub timestamp: DateTime<Utc>,
    /// Hardware geometry in effect when the window was extracted
    pub hardware: HardwareConfig,
    /// Window geometry in effect when the window was extracted
    pub horizontal: HorizontalSettings,
    /// Trigger configuration in effect when the window was extracted
    pub trigger: TriggerSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_serializes() {
        let meta = CaptureMetadata {
            triggered: true,
            trigger_channel: 0,
            sequence: 7,
            end_index: 123_456,
            timestamp: Utc::now(),
            hardware: HardwareConfig::default(),
            horizontal: HorizontalSettings::default(),
            trigger: TriggerSettings::default(),
        };
        let json = serde_json::to_string(&meta).expect("serialize");
        assert!(json.contains("\"sequence\":7"));
    }
}
