//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub kind: DeviceKind,
    /// Whether this is the system default for its kind.
    pub is_default: bool,
}

/// Sort the default first, then alphabetically (case-insensitive).
pub fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

/// Normalise a user-supplied device preference: blank means "use default".
pub fn normalize_preference(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// List the available devices of `kind`.
///
/// Returns an empty `Vec` if the host cannot enumerate devices.
#[cfg(feature = "audio-cpal")]
pub fn list_devices(kind: DeviceKind) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let (default_name, devices) = match kind {
        DeviceKind::Input => (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.input_devices().map(|d| d.collect::<Vec<_>>()),
        ),
        DeviceKind::Output => (
            host.default_output_device().and_then(|d| d.name().ok()),
            host.output_devices().map(|d| d.collect::<Vec<_>>()),
        ),
    };

    match devices {
        Ok(devices) => {
            let mut list = devices
                .iter()
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("{kind:?} Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        name,
                        kind,
                    }
                })
                .collect::<Vec<_>>();
            sort_devices(&mut list);
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate {kind:?} devices: {e}");
            default_name
                .map(|name| {
                    vec![DeviceInfo {
                        name,
                        kind,
                        is_default: true,
                    }]
                })
                .unwrap_or_default()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices(_kind: DeviceKind) -> Vec<DeviceInfo> {
    vec![]
}

/// Resolve a cpal device by exact name, falling back to the host default and
/// then the first device of that kind.
#[cfg(feature = "audio-cpal")]
pub(crate) fn select_device(
    kind: DeviceKind,
    preferred: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use crate::error::TalkbackError;
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    let host = cpal::default_host();
    let enumerate = || match kind {
        DeviceKind::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
        DeviceKind::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
    };

    if let Some(preferred) = preferred {
        match enumerate() {
            Ok(devices) => {
                if let Some(device) = devices
                    .into_iter()
                    .find(|d| d.name().map(|n| n == preferred).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!("preferred {kind:?} device '{preferred}' not found, falling back");
            }
            Err(e) => warn!("failed to list {kind:?} devices while resolving preference: {e}"),
        }
    }

    let default = match kind {
        DeviceKind::Input => host.default_input_device(),
        DeviceKind::Output => host.default_output_device(),
    };
    if let Some(device) = default {
        return Ok(device);
    }

    let missing = match kind {
        DeviceKind::Input => TalkbackError::NoDefaultInputDevice,
        DeviceKind::Output => TalkbackError::NoDefaultOutputDevice,
    };
    let fallback = enumerate()
        .map_err(|e| TalkbackError::AudioDevice(e.to_string()))?
        .into_iter()
        .next()
        .ok_or(missing)?;
    warn!("no default {kind:?} device, falling back to first available");
    Ok(fallback)
}
