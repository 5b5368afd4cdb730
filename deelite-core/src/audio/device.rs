//! Audio device enumeration and input selection heuristics.

use serde::{Deserialize, Serialize};

/// Whether a device records or plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
    /// Input that most likely records system output rather than a voice.
    pub is_loopback_like: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "wave out",
];

/// Best-effort check for capture devices that mirror system audio.
///
/// These would feed the assistant's own voice back to the model.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Pick the input to open when no preference matched and there is no
/// system default: the first name that is not loopback-like.
pub fn pick_fallback_input<'a, I>(names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    names
        .iter()
        .copied()
        .find(|n| !is_loopback_like_name(n))
        .or_else(|| names.first().copied())
}

/// List input and output devices, inputs first, defaults first within each.
///
/// Returns an empty `Vec` if enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let mut list = Vec::new();

    match host.input_devices() {
        Ok(devices) => {
            for (idx, device) in devices.enumerate() {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                list.push(DeviceInfo {
                    is_default: default_in.as_deref() == Some(name.as_str()),
                    is_loopback_like: is_loopback_like_name(&name),
                    direction: DeviceDirection::Input,
                    name,
                });
            }
        }
        Err(e) => tracing::warn!("failed to enumerate input devices: {e}"),
    }

    match host.output_devices() {
        Ok(devices) => {
            for (idx, device) in devices.enumerate() {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                list.push(DeviceInfo {
                    is_default: default_out.as_deref() == Some(name.as_str()),
                    is_loopback_like: false,
                    direction: DeviceDirection::Output,
                    name,
                });
            }
        }
        Err(e) => tracing::warn!("failed to enumerate output devices: {e}"),
    }

    list.sort_by_key(|d| {
        (
            d.direction == DeviceDirection::Output,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio"));
        assert!(!is_loopback_like_name("MacBook Pro Microphone"));
    }

    #[test]
    fn fallback_skips_loopback_inputs() {
        let names = ["Stereo Mix", "USB Headset Mic"];
        assert_eq!(pick_fallback_input(names), Some("USB Headset Mic"));
    }

    #[test]
    fn fallback_uses_loopback_when_nothing_else_exists() {
        assert_eq!(pick_fallback_input(["Stereo Mix"]), Some("Stereo Mix"));
        assert_eq!(pick_fallback_input(Vec::<&str>::new()), None);
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let info = DeviceInfo {
            name: "Mic".into(),
            direction: DeviceDirection::Input,
            is_default: true,
            is_loopback_like: false,
        };
        let json = serde_json::to_value(&info).expect("serialize device");
        assert_eq!(json["direction"], "input");
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["isLoopbackLike"], false);
    }
}
