//! CPAL-backed audio backend.
//!
//! Streams are always opened at the device's native parameters — the
//! pipeline's format converter handles rate/channel/bit-depth conversion,
//! which keeps device negotiation simple and portable. Integer wire formats
//! are rescaled to f32 in the driver callback before delivery.

use crate::device::registry::{
    AudioBackend, DeviceDescriptor, DeviceRole, SampleFormat, StreamHandle,
};
use crate::error::{CallscribeError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::debug;
use std::time::Instant;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
#[cfg(unix)]
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

#[cfg(not(unix))]
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

/// Device name patterns identifying loopback/monitor endpoints.
///
/// PipeWire and PulseAudio expose the audio currently being played as
/// "Monitor of …" input devices; some drivers label them "loopback".
const LOOPBACK_PATTERNS: &[&str] = &["monitor", "loopback"];

/// Device name patterns to filter out (not useful for voice capture).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn is_loopback_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_PATTERNS.iter().any(|p| lower.contains(p))
}

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// [`AudioBackend`] over the default CPAL host.
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn descriptor_for(
        device: &cpal::Device,
        role: DeviceRole,
        default_name: Option<&str>,
    ) -> Option<DeviceDescriptor> {
        let name = device.name().ok()?;
        if should_filter_device(&name) {
            return None;
        }

        let config = device.default_input_config().ok()?;
        let format = match config.sample_format() {
            cpal::SampleFormat::F32 => SampleFormat::F32,
            cpal::SampleFormat::I16 => SampleFormat::I16,
            cpal::SampleFormat::U16 => SampleFormat::U16,
            _ => return None,
        };

        Some(DeviceDescriptor {
            id: name.clone(),
            display_name: name.clone(),
            role,
            native_sample_rate: config.sample_rate().0,
            native_channel_count: config.channels(),
            native_sample_format: format,
            is_default: default_name == Some(name.as_str()),
        })
    }

    fn find_device(&self, id: &str) -> Result<cpal::Device> {
        with_suppressed_stderr(|| {
            let host = cpal::default_host();
            let devices = host
                .input_devices()
                .map_err(|e| CallscribeError::StreamOpenFailed {
                    device: id.to_string(),
                    message: format!("failed to enumerate devices: {}", e),
                })?;

            for device in devices {
                if device.name().is_ok_and(|name| name == id) {
                    return Ok(device);
                }
            }
            Err(CallscribeError::DeviceNotFound {
                role: format!("device '{}'", id),
            })
        })
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn devices(&self, role: DeviceRole) -> Result<Vec<DeviceDescriptor>> {
        with_suppressed_stderr(|| {
            let host = cpal::default_host();
            let default_name = host.default_input_device().and_then(|d| d.name().ok());
            let devices = host.input_devices().map_err(|e| {
                CallscribeError::Other(format!("failed to enumerate input devices: {}", e))
            })?;

            let mut out = Vec::new();
            for device in devices {
                let Ok(name) = device.name() else { continue };
                let device_role = if is_loopback_name(&name) {
                    DeviceRole::Loopback
                } else {
                    DeviceRole::Input
                };
                if device_role != role {
                    continue;
                }
                if let Some(descriptor) =
                    Self::descriptor_for(&device, device_role, default_name.as_deref())
                {
                    out.push(descriptor);
                }
            }
            Ok(out)
        })
    }

    fn open_stream(
        &self,
        device: &DeviceDescriptor,
        mut on_block: Box<dyn FnMut(&[f32], Instant) + Send>,
        mut on_error: Box<dyn FnMut(String) + Send>,
    ) -> Result<Box<dyn StreamHandle>> {
        let cpal_device = self.find_device(&device.id)?;
        let config = cpal::StreamConfig {
            channels: device.native_channel_count,
            sample_rate: cpal::SampleRate(device.native_sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        debug!(
            "opening {} stream on '{}' at {}ch/{}Hz/{:?}",
            device.role,
            device.id,
            device.native_channel_count,
            device.native_sample_rate,
            device.native_sample_format,
        );

        let err_callback = move |err: cpal::StreamError| {
            on_error(err.to_string());
        };

        let stream = match device.native_sample_format {
            SampleFormat::F32 => cpal_device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    on_block(data, Instant::now());
                },
                err_callback,
                None,
            ),
            SampleFormat::I16 => {
                // Rescale in the callback; scratch is reused, not reallocated
                let mut scratch: Vec<f32> = Vec::new();
                cpal_device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(data.iter().map(|&s| s as f32 / 32_768.0));
                        on_block(&scratch, Instant::now());
                    },
                    err_callback,
                    None,
                )
            }
            SampleFormat::U16 => {
                let mut scratch: Vec<f32> = Vec::new();
                cpal_device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(data.iter().map(|&s| (s as f32 - 32_768.0) / 32_768.0));
                        on_block(&scratch, Instant::now());
                    },
                    err_callback,
                    None,
                )
            }
        }
        .map_err(|e| CallscribeError::StreamOpenFailed {
            device: device.id.clone(),
            message: e.to_string(),
        })?;

        Ok(Box::new(CpalStreamHandle {
            stream: Some(SendableStream(stream)),
            device_id: device.id.clone(),
        }))
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is exclusively owned by one capture session and its
/// start/stop methods are called from one thread at a time.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

struct CpalStreamHandle {
    stream: Option<SendableStream>,
    device_id: String,
}

impl StreamHandle for CpalStreamHandle {
    fn start(&mut self) -> Result<()> {
        match &self.stream {
            Some(stream) => stream
                .0
                .play()
                .map_err(|e| CallscribeError::StreamOpenFailed {
                    device: self.device_id.clone(),
                    message: format!("failed to start stream: {}", e),
                }),
            None => Ok(()),
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream
                .0
                .pause()
                .map_err(|e| CallscribeError::StreamOpenFailed {
                    device: self.device_id.clone(),
                    message: format!("failed to stop stream: {}", e),
                })?;
        }
        Ok(())
    }
}
