// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan backend: device selection, swap chain lifecycle, fixed pipeline and
//! the per-frame acquire/submit/present loop.

use std::rc::Rc;

use anyhow::Result;
use lumen_render::{FrameOutcome, RenderOptions, RenderSize, Renderer, SceneAssets};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod allocator;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod frame_loop;
pub mod gpu;
pub mod owned;
pub mod pipeline;
pub mod selector;
pub mod surface;
pub mod swapchain;

#[cfg(test)]
mod testing;

pub use context::{tracing_sink, DiagnosticSeverity, DiagnosticSink, GraphicsApiContext};
pub use device::AshDevice;
pub use error::{RenderError, RenderResult, ShaderStage};
pub use frame_loop::FrameLoop;
pub use gpu::GpuDevice;
pub use selector::{DeviceCapabilityRecord, DeviceRequirements, QueueCapabilities};
pub use surface::PresentationSurface;

// STRICT TEARDOWN ORDER (field order):
// - frame loop: idle wait, then swap-chain-bound objects, frame resources and
//   finally the logical device (last Rc)
// - surface after the device
// - instance (and debug messenger) last
pub struct VkRenderer {
    core: FrameLoop<AshDevice>,
    _surface: PresentationSurface,
    context: GraphicsApiContext,
}

impl VkRenderer {
    /// Like `Renderer::new`, with validation messages routed to `sink`.
    pub fn with_sink(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        assets: &SceneAssets,
        options: RenderOptions,
        sink: DiagnosticSink,
    ) -> RenderResult<Self> {
        let display_raw = display.display_handle()?.as_raw();
        let window_raw = window.window_handle()?.as_raw();

        unsafe {
            let context = GraphicsApiContext::new(display_raw, options.validation, sink)?;
            let surface = PresentationSurface::new(&context, display_raw, window_raw)?;

            let req = DeviceRequirements::default();
            let (record, families) = selector::pick_device(context.instance(), &surface, &req)?;
            let device = Rc::new(AshDevice::new(&context, &surface, &record, families, &req)?);

            let core = FrameLoop::new(device, size, assets, options.clear_color)?;
            Ok(VkRenderer {
                core,
                _surface: surface,
                context,
            })
        }
    }

    pub fn validation_enabled(&self) -> bool {
        self.context.validation_enabled()
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        assets: &SceneAssets,
        options: RenderOptions,
    ) -> Result<Self> {
        Ok(Self::with_sink(
            window,
            display,
            size,
            assets,
            options,
            tracing_sink(),
        )?)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        Ok(self.core.resize(size)?)
    }

    fn update(&mut self, delta_ms: f64) -> Result<()> {
        Ok(self.core.update(delta_ms)?)
    }

    fn render(&mut self) -> Result<FrameOutcome> {
        Ok(self.core.render()?)
    }
}
