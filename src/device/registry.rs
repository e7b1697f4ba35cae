//! Device registry: enumeration snapshots and device resolution.
//!
//! Descriptors are immutable snapshots re-enumerated on demand, never
//! mutated in place. Enumeration tolerates backend errors per role by
//! returning a partial list — a missing loopback capability is common and
//! not fatal.

use crate::error::{CallscribeError, Result};
use crate::pipeline::types::ChannelId;
use log::warn;
use std::sync::Arc;
use std::time::Instant;

/// Which kind of capture a device provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// A physical input such as a microphone.
    Input,
    /// A loopback endpoint yielding the audio the system is playing.
    Loopback,
}

impl DeviceRole {
    /// The role that feeds a given pipeline channel.
    pub fn for_channel(channel: ChannelId) -> Self {
        match channel {
            ChannelId::Microphone => DeviceRole::Input,
            ChannelId::Loopback => DeviceRole::Loopback,
        }
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRole::Input => write!(f, "input"),
            DeviceRole::Loopback => write!(f, "loopback"),
        }
    }
}

/// Sample encoding a device delivers natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
    I16,
    U16,
}

/// Immutable snapshot of one device's identity and native capabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Backend-stable identifier, used for preference matching.
    pub id: String,
    pub display_name: String,
    pub role: DeviceRole,
    pub native_sample_rate: u32,
    pub native_channel_count: u16,
    pub native_sample_format: SampleFormat,
    pub is_default: bool,
}

/// Control over one opened native stream.
///
/// The stream handle is exclusively owned by its capture session; only this
/// revocable start/stop capability is exposed upward.
pub trait StreamHandle: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// OS audio subsystem boundary: enumeration plus native stream open.
///
/// The pipeline depends only on the ability to list devices per role and
/// receive periodic blocks of native-format samples. Blocks arrive as
/// interleaved f32 regardless of the device's wire format; integer formats
/// are rescaled in the driver callback before delivery.
pub trait AudioBackend: Send + Sync {
    /// Enumerates devices for one role. Backend/driver errors for the role
    /// surface here; the registry degrades them to a partial list.
    fn devices(&self, role: DeviceRole) -> Result<Vec<DeviceDescriptor>>;

    /// Opens a native stream on `device`. `on_block` runs on the driver's
    /// callback thread with each interleaved block and the capture
    /// timestamp; `on_error` reports mid-stream driver failures.
    fn open_stream(
        &self,
        device: &DeviceDescriptor,
        on_block: Box<dyn FnMut(&[f32], Instant) + Send>,
        on_error: Box<dyn FnMut(String) + Send>,
    ) -> Result<Box<dyn StreamHandle>>;
}

/// Enumerates and resolves devices over an [`AudioBackend`].
#[derive(Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn AudioBackend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn AudioBackend> {
        Arc::clone(&self.backend)
    }

    /// Takes a fresh snapshot of all known devices.
    ///
    /// A failing role contributes nothing rather than failing the whole
    /// enumeration.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let mut all = Vec::new();
        for role in [DeviceRole::Input, DeviceRole::Loopback] {
            match self.backend.devices(role) {
                Ok(devices) => all.extend(devices),
                Err(e) => warn!("device enumeration failed for {} role: {}", role, e),
            }
        }
        all
    }

    /// Resolves the device to capture for a role.
    ///
    /// Prefers `preferred_id` when it is still present; otherwise falls back
    /// to the backend's default for the role, then to the first available
    /// device. Fails with `DeviceNotFound` only when zero devices of the
    /// role exist.
    pub fn resolve(&self, role: DeviceRole, preferred_id: Option<&str>) -> Result<DeviceDescriptor> {
        let devices = self.backend.devices(role).unwrap_or_default();
        if devices.is_empty() {
            return Err(CallscribeError::DeviceNotFound {
                role: role.to_string(),
            });
        }

        if let Some(id) = preferred_id {
            if let Some(found) = devices.iter().find(|d| d.id == id) {
                return Ok(found.clone());
            }
            warn!(
                "preferred {} device '{}' no longer present, using default",
                role, id
            );
        }

        let default = devices
            .iter()
            .find(|d| d.is_default)
            .or_else(|| devices.first());
        default.cloned().ok_or(CallscribeError::DeviceNotFound {
            role: role.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn descriptor(id: &str, role: DeviceRole, is_default: bool) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            display_name: id.to_string(),
            role,
            native_sample_rate: 48_000,
            native_channel_count: 2,
            native_sample_format: SampleFormat::F32,
            is_default,
        }
    }

    #[test]
    fn resolve_prefers_requested_id() {
        let backend = MockBackend::new().with_devices(vec![
            descriptor("mic-a", DeviceRole::Input, true),
            descriptor("mic-b", DeviceRole::Input, false),
        ]);
        let registry = DeviceRegistry::new(Arc::new(backend));

        let resolved = registry.resolve(DeviceRole::Input, Some("mic-b")).unwrap();
        assert_eq!(resolved.id, "mic-b");
    }

    #[test]
    fn resolve_falls_back_to_default_when_preference_gone() {
        let backend = MockBackend::new().with_devices(vec![
            descriptor("mic-a", DeviceRole::Input, false),
            descriptor("mic-b", DeviceRole::Input, true),
        ]);
        let registry = DeviceRegistry::new(Arc::new(backend));

        let resolved = registry
            .resolve(DeviceRole::Input, Some("unplugged"))
            .unwrap();
        assert_eq!(resolved.id, "mic-b");
    }

    #[test]
    fn resolve_uses_first_device_when_no_default_flagged() {
        let backend = MockBackend::new().with_devices(vec![
            descriptor("mic-a", DeviceRole::Input, false),
            descriptor("mic-b", DeviceRole::Input, false),
        ]);
        let registry = DeviceRegistry::new(Arc::new(backend));

        let resolved = registry.resolve(DeviceRole::Input, None).unwrap();
        assert_eq!(resolved.id, "mic-a");
    }

    #[test]
    fn resolve_fails_only_when_role_is_empty() {
        let backend =
            MockBackend::new().with_devices(vec![descriptor("mic-a", DeviceRole::Input, true)]);
        let registry = DeviceRegistry::new(Arc::new(backend));

        let err = registry.resolve(DeviceRole::Loopback, None).unwrap_err();
        match err {
            CallscribeError::DeviceNotFound { role } => assert_eq!(role, "loopback"),
            other => panic!("expected DeviceNotFound, got {:?}", other),
        }
    }

    #[test]
    fn list_devices_survives_per_role_enumeration_failure() {
        let backend = MockBackend::new()
            .with_devices(vec![descriptor("mic-a", DeviceRole::Input, true)])
            .with_enumeration_failure(DeviceRole::Loopback);
        let registry = DeviceRegistry::new(Arc::new(backend));

        let devices = registry.list_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "mic-a");
    }

    #[test]
    fn role_for_channel_mapping() {
        assert_eq!(
            DeviceRole::for_channel(ChannelId::Microphone),
            DeviceRole::Input
        );
        assert_eq!(
            DeviceRole::for_channel(ChannelId::Loopback),
            DeviceRole::Loopback
        );
    }
}
