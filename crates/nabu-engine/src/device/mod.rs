//! Headless GPU device acquisition.
//!
//! This module is responsible for:
//! - creating the wgpu Instance/Adapter/Device/Queue
//! - negotiating optional features (wireframe fill)
//! - handing the device to a [`WgpuBackend`](crate::WgpuBackend)
//!
//! Presentation is left to the caller; render targets are plain textures.

mod gpu;

pub use gpu::{Gpu, GpuInit};
