use anyhow::{Context, Result};

use crate::backend::WgpuBackend;

/// Initialization parameters for the GPU layer.
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Adapter selection preference.
    pub power_preference: wgpu::PowerPreference,

    /// Force a software adapter. Useful for CI machines without a GPU.
    pub force_fallback_adapter: bool,

    /// Required wgpu features.
    ///
    /// Favor an empty set for portability unless a feature is strictly necessary.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,

    /// Request `POLYGON_MODE_LINE` when the adapter offers it.
    ///
    /// Wireframe batches are rejected as invalid pipeline state without it.
    pub wireframe: bool,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            wireframe: false,
        }
    }
}

/// Owns wgpu core objects.
///
/// Device and queue are reference counted by wgpu, so backends created from
/// this context stay valid after it is dropped.
pub struct Gpu {
    /// Kept alive for the lifetime of the adapter.
    _instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    downlevel: wgpu::DownlevelFlags,
}

impl Gpu {
    /// Acquires an adapter and device without a surface.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: GpuInit) -> Result<Self> {
        // Use all backends to allow wgpu to select the optimal platform backend.
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        anyhow::ensure!(
            adapter.features().contains(init.required_features),
            "adapter lacks required features {:?}",
            init.required_features
        );

        let mut features = init.required_features;
        if init.wireframe {
            if adapter.features().contains(wgpu::Features::POLYGON_MODE_LINE) {
                features |= wgpu::Features::POLYGON_MODE_LINE;
            } else {
                log::warn!("wireframe requested but the adapter does not support line fill");
            }
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("nabu-engine device"),
                required_features: features,
                required_limits: init.required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let info = adapter.get_info();
        log::info!("using {} ({:?}, {:?})", info.name, info.device_type, info.backend);

        let downlevel = adapter.get_downlevel_capabilities().flags;
        if !downlevel.contains(wgpu::DownlevelFlags::VIEW_FORMATS) {
            log::debug!("adapter cannot reinterpret texture view formats");
        }

        Ok(Self {
            _instance: instance,
            adapter,
            device,
            queue,
            downlevel,
        })
    }

    /// Blocking variant of [`Gpu::new`] for callers without an executor.
    pub fn new_blocking(init: GpuInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Returns a reference to the logical device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a reference to the command queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Creates a submission backend sharing this device and queue.
    pub fn backend(&self) -> WgpuBackend {
        WgpuBackend::new(self.device.clone(), self.queue.clone(), self.downlevel)
    }
}
