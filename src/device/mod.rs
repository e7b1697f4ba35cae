//! Device enumeration and native stream access.

pub mod registry;

#[cfg(feature = "cpal-audio")]
pub mod cpal_backend;

pub use registry::{
    AudioBackend, DeviceDescriptor, DeviceRegistry, DeviceRole, SampleFormat, StreamHandle,
};

#[cfg(feature = "cpal-audio")]
pub use cpal_backend::CpalBackend;
