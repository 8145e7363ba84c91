// SPDX-License-Identifier: CEPL-1.0
//! Device-scoped renderer state and the acquire -> submit -> present protocol.
//!
//! Teardown order is carried by field order: every aggregate lists its parts
//! newest first, so dropping it unwinds init exactly in reverse.

use std::rc::Rc;

use ash::vk;
use lumen_render::{FrameOutcome, RenderSize, SceneAssets};
use tracing::{debug, info, warn};

use crate::allocator::ResourceAllocator;
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::frame::{CommandBuffers, FrameResources, FrameSync, UniformPayload};
use crate::gpu::GpuDevice;
use crate::owned::Owned;
use crate::pipeline::{create_descriptor_set_layout, create_framebuffers, PipelineState, ShaderStages};
use crate::swapchain::{choose_extent, SwapchainState};

/// Everything that depends on the swap chain's format or extent. Dropped as a
/// unit: command pool, framebuffers, pipeline, render pass, then the chain.
struct SwapchainBound<D: GpuDevice> {
    commands: CommandBuffers<D>,
    framebuffers: Vec<Owned<D, vk::Framebuffer>>,
    pipeline: PipelineState<D>,
    swapchain: SwapchainState<D>,
}

enum FrameError {
    OutOfDate(&'static str),
    /// Failed after a successful acquire: `image_available` is left signaled
    /// and the acquired image is never presented.
    Abandoned(RenderError),
    Failed(RenderError),
}

impl From<RenderError> for FrameError {
    fn from(e: RenderError) -> Self {
        FrameError::Failed(e)
    }
}

pub struct FrameLoop<D: GpuDevice> {
    /// `None` while absent: before the first build, after a failed rebuild, or
    /// while the surface has zero area.
    chain: Option<SwapchainBound<D>>,
    sync: FrameSync<D>,
    resources: FrameResources<D>,
    set_layout: Owned<D, vk::DescriptorSetLayout>,
    shaders: ShaderStages<D>,
    _allocator: ResourceAllocator<D>,
    device: Rc<D>,

    window_size: vk::Extent2D,
    stale: bool,
    /// Set when a rebuild found a zero-area surface. Frames are skipped
    /// without touching the device until a nonzero resize arrives.
    awaiting_area: bool,
    elapsed_ms: f64,
    clear_color: [f32; 4],
}

impl<D: GpuDevice> FrameLoop<D> {
    pub fn new(
        device: Rc<D>,
        size: RenderSize,
        assets: &SceneAssets,
        clear_color: [f32; 4],
    ) -> RenderResult<Self> {
        let allocator = ResourceAllocator::new(&device)?;
        let shaders = ShaderStages::new(&device, &assets.vertex_spv, &assets.fragment_spv)?;
        let set_layout = create_descriptor_set_layout(&device)?;
        let resources = FrameResources::new(&device, &allocator, set_layout.raw(), &assets.texture)?;
        let sync = FrameSync::new(&device)?;

        let mut this = FrameLoop {
            chain: None,
            sync,
            resources,
            set_layout,
            shaders,
            _allocator: allocator,
            device,
            window_size: vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            stale: true,
            awaiting_area: false,
            elapsed_ms: 0.0,
            clear_color,
        };
        this.chain = this.build_chain()?;
        this.stale = this.chain.is_none();
        Ok(this)
    }

    fn build_chain(&self) -> RenderResult<Option<SwapchainBound<D>>> {
        let surface = unsafe { self.device.surface_info() }.op("query surface")?;
        let extent = choose_extent(&surface.capabilities, self.window_size);
        if extent.width == 0 || extent.height == 0 {
            debug!("surface has zero area; swap chain stays absent");
            return Ok(None);
        }

        let swapchain = SwapchainState::new(&self.device, &surface, extent)?;
        let pipeline = PipelineState::new(
            &self.device,
            &self.shaders,
            self.set_layout.raw(),
            swapchain.format(),
            swapchain.extent(),
        )?;
        let framebuffers = create_framebuffers(
            &self.device,
            pipeline.render_pass(),
            swapchain.views(),
            swapchain.extent(),
        )?;
        let commands = CommandBuffers::record(
            &self.device,
            &pipeline,
            &framebuffers,
            swapchain.extent(),
            &self.resources,
            self.clear_color,
        )?;

        Ok(Some(SwapchainBound {
            commands,
            framebuffers,
            pipeline,
            swapchain,
        }))
    }

    /// Idle wait, drop the whole swap-chain-bound subset, build it again.
    fn rebuild(&mut self, reason: &'static str) -> RenderResult<()> {
        info!(reason, "rebuilding swap chain");
        unsafe { self.device.device_wait_idle() }.op("device_wait_idle")?;
        self.stale = true;
        self.chain = None;
        self.chain = self.build_chain()?;
        self.stale = self.chain.is_none();
        self.awaiting_area = self.chain.is_none();
        Ok(())
    }

    /// Zero-area sizes (minimised) are ignored; anything else rebuilds.
    pub fn resize(&mut self, size: RenderSize) -> RenderResult<()> {
        if size.is_zero() {
            debug!(width = size.width, height = size.height, "ignoring zero-size resize");
            return Ok(());
        }
        self.window_size = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        self.stale = true;
        self.rebuild("resize")
    }

    pub fn update(&mut self, delta_ms: f64) -> RenderResult<()> {
        self.elapsed_ms += delta_ms;
        self.resources.write_uniform(&UniformPayload {
            time: self.elapsed_ms as f32,
        })
    }

    pub fn render(&mut self) -> RenderResult<FrameOutcome> {
        if self.awaiting_area {
            return Ok(FrameOutcome::Skipped);
        }
        if self.stale || self.chain.is_none() {
            self.rebuild("stale")?;
        }
        let Some(chain) = self.chain.as_ref() else {
            return Ok(FrameOutcome::Skipped);
        };

        match unsafe { draw_frame(&*self.device, &self.sync, chain) } {
            Ok(()) => Ok(FrameOutcome::Presented),
            Err(FrameError::OutOfDate(at)) => {
                warn!(at, "swap chain out of date");
                self.stale = true;
                self.rebuild("out of date")?;
                Ok(FrameOutcome::Rebuilt)
            }
            Err(FrameError::Abandoned(e)) => {
                warn!(error = %e, "frame abandoned after acquire; replacing frame semaphores");
                // The acquired image is only released by recreating the chain.
                self.stale = true;
                unsafe { self.device.device_wait_idle() }.op("device_wait_idle")?;
                self.sync = FrameSync::new(&self.device)?;
                Err(e)
            }
            Err(FrameError::Failed(e)) => Err(e),
        }
    }

    #[cfg(test)]
    fn is_stale(&self) -> bool {
        self.stale
    }

    /// `(images, views, framebuffers, command buffers)` of the live chain.
    #[cfg(test)]
    fn chain_lengths(&self) -> Option<(usize, usize, usize, usize)> {
        self.chain.as_ref().map(|c| {
            (
                c.swapchain.images().len(),
                c.swapchain.views().len(),
                c.framebuffers.len(),
                c.commands.len(),
            )
        })
    }

    #[cfg(test)]
    fn extent(&self) -> Option<vk::Extent2D> {
        self.chain.as_ref().map(|c| c.swapchain.extent())
    }
}

/// # Safety
/// All handles must be alive and belong to `device`.
unsafe fn draw_frame<D: GpuDevice>(
    device: &D,
    sync: &FrameSync<D>,
    chain: &SwapchainBound<D>,
) -> Result<(), FrameError> {
    // One frame in flight: the previous present must have drained first.
    unsafe { device.present_queue_wait_idle() }.op("queue_wait_idle")?;

    let image_index = match unsafe {
        device.acquire_next_image(chain.swapchain.raw(), u64::MAX, sync.image_available())
    } {
        Ok((index, _suboptimal)) => index,
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(FrameError::OutOfDate("acquire")),
        Err(e) => return Err(RenderError::Acquire(e).into()),
    };
    let cmd = chain
        .commands
        .get(image_index)
        .ok_or(FrameError::Abandoned(RenderError::Acquire(vk::Result::ERROR_UNKNOWN)))?;

    let wait = [sync.image_available()];
    let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
    let cmds = [cmd];
    let signal = [sync.render_finished()];
    let submit = vk::SubmitInfo::default()
        .wait_semaphores(&wait)
        .wait_dst_stage_mask(&wait_stages)
        .command_buffers(&cmds)
        .signal_semaphores(&signal);
    unsafe { device.graphics_queue_submit(&[submit], vk::Fence::null()) }
        .op("queue_submit")
        .map_err(FrameError::Abandoned)?;

    let swapchains = [chain.swapchain.raw()];
    let indices = [image_index];
    let present = vk::PresentInfoKHR::default()
        .wait_semaphores(&signal)
        .swapchains(&swapchains)
        .image_indices(&indices);
    match unsafe { device.queue_present(&present) } {
        Ok(_suboptimal) => Ok(()),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameError::OutOfDate("present")),
        Err(e) => Err(RenderError::Present(e).into()),
    }
}

impl<D: GpuDevice> Drop for FrameLoop<D> {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU still reads it.
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            warn!(error = %e, "device_wait_idle failed during teardown");
        }
    }
}
