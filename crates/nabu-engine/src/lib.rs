//! Nabu engine crate.
//!
//! wgpu runtime for the submission engine: headless device acquisition,
//! logger setup, the built-in WGSL shaders and [`WgpuBackend`].

pub mod backend;
pub mod device;
pub mod logging;
pub mod shaders;

pub use nabu_submit as submit;

pub use backend::WgpuBackend;
pub use device::{Gpu, GpuInit};
