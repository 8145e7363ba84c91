// SPDX-License-Identifier: CEPL-1.0
//! Buffer/image creation with bound memory, and the transient command pattern
//! used for one-time uploads.
//!
//! Transient submissions block until the graphics queue is idle. That is only
//! acceptable because nothing here runs per frame.

use std::rc::Rc;

use ash::vk;
use lumen_render::TextureData;
use tracing::debug;

use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::gpu::GpuDevice;
use crate::owned::Owned;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// First memory type allowed by `type_bits` whose flags include all of `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(flags)
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The two transitions the texture upload needs. Anything else is a
/// configuration error.
pub fn transition_masks(
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> RenderResult<TransitionMasks> {
    match (from, to) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(RenderError::UnsupportedLayoutTransition { from, to }),
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// A 2D color view over `image`.
pub fn create_image_view<D: GpuDevice>(
    device: &Rc<D>,
    image: vk::Image,
    format: vk::Format,
) -> RenderResult<Owned<D, vk::ImageView>> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(color_range());
    let view = unsafe { device.create_image_view(&info) }.op("create_image_view")?;
    Ok(Owned::new(device, view))
}

/// A buffer and the memory bound to it. Freed together on drop.
pub struct GpuBuffer<D: GpuDevice> {
    device: Rc<D>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl<D: GpuDevice> GpuBuffer<D> {
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Map, copy, unmap. The buffer must live in host-visible coherent memory.
    pub fn write_bytes(&self, bytes: &[u8]) -> RenderResult<()> {
        debug_assert!(bytes.len() as vk::DeviceSize <= self.size);
        let len = bytes.len().min(self.size as usize);
        unsafe {
            let dst = self
                .device
                .map_memory(self.memory, 0, len as vk::DeviceSize)
                .op("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), len);
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl<D: GpuDevice> Drop for GpuBuffer<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer);
            self.device.free_memory(self.memory);
        }
    }
}

/// An image and its memory. Freed together on drop.
pub struct GpuImage<D: GpuDevice> {
    device: Rc<D>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl<D: GpuDevice> GpuImage<D> {
    pub fn raw(&self) -> vk::Image {
        self.image
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl<D: GpuDevice> std::fmt::Debug for GpuImage<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuImage")
            .field("image", &self.image)
            .field("memory", &self.memory)
            .field("extent", &self.extent)
            .field("format", &self.format)
            .finish()
    }
}

impl<D: GpuDevice> Drop for GpuImage<D> {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image);
            self.device.free_memory(self.memory);
        }
    }
}

/// Creates buffers and images and runs one-shot upload commands from a
/// dedicated transient pool. Lives for the device's lifetime, so swap chain
/// rebuilds never touch it.
pub struct ResourceAllocator<D: GpuDevice> {
    command_pool: Owned<D, vk::CommandPool>,
    device: Rc<D>,
}

impl<D: GpuDevice> ResourceAllocator<D> {
    pub fn new(device: &Rc<D>) -> RenderResult<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(device.queue_families().graphics);
        let pool = unsafe { device.create_command_pool(&info) }.op("create_command_pool")?;
        Ok(ResourceAllocator {
            command_pool: Owned::new(device, pool),
            device: Rc::clone(device),
        })
    }

    fn allocate(
        &self,
        reqs: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> RenderResult<vk::DeviceMemory> {
        let type_index = find_memory_type(self.device.memory_properties(), reqs.memory_type_bits, flags)
            .ok_or(RenderError::NoSuitableMemoryType {
                type_bits: reqs.memory_type_bits,
                flags,
            })?;
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(reqs.size)
            .memory_type_index(type_index);
        unsafe { self.device.allocate_memory(&info) }.op("allocate_memory")
    }

    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> RenderResult<GpuBuffer<D>> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info) }.op("create_buffer")?;
        let reqs = unsafe { self.device.buffer_memory_requirements(buffer) };
        let memory = match self.allocate(reqs, flags) {
            Ok(m) => m,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer) };
                return Err(e);
            }
        };
        let out = GpuBuffer {
            device: Rc::clone(&self.device),
            buffer,
            memory,
            size,
        };
        unsafe { self.device.bind_buffer_memory(buffer, memory) }.op("bind_buffer_memory")?;
        Ok(out)
    }

    pub fn create_image(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> RenderResult<GpuImage<D>> {
        let extent = vk::Extent2D { width, height };
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { self.device.create_image(&info) }.op("create_image")?;
        let reqs = unsafe { self.device.image_memory_requirements(image) };
        let memory = match self.allocate(reqs, flags) {
            Ok(m) => m,
            Err(e) => {
                unsafe { self.device.destroy_image(image) };
                return Err(e);
            }
        };
        let out = GpuImage {
            device: Rc::clone(&self.device),
            image,
            memory,
            extent,
            format,
        };
        unsafe { self.device.bind_image_memory(image, memory) }.op("bind_image_memory")?;
        Ok(out)
    }

    /// Allocates a one-shot primary command buffer and begins recording.
    pub fn begin_transient(&self) -> RenderResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool.raw())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&info) }
            .op("allocate_command_buffers")?
            .into_iter()
            .next()
            .ok_or(RenderError::Vulkan {
                op: "allocate_command_buffers",
                result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            })?;
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(e) = unsafe { self.device.begin_command_buffer(cmd, &begin) } {
            unsafe { self.free(cmd) };
            return Err(RenderError::Vulkan {
                op: "begin_command_buffer",
                result: e,
            });
        }
        Ok(cmd)
    }

    /// Ends, submits, waits for the graphics queue to drain, then frees `cmd`.
    /// The buffer is freed whether or not submission succeeded.
    pub fn end_transient(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        let result = unsafe { self.submit_and_wait(cmd) };
        unsafe { self.free(cmd) };
        result
    }

    unsafe fn submit_and_wait(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        unsafe {
            self.device.end_command_buffer(cmd).op("end_command_buffer")?;
            let cmds = [cmd];
            let submit = vk::SubmitInfo::default().command_buffers(&cmds);
            self.device
                .graphics_queue_submit(&[submit], vk::Fence::null())
                .op("queue_submit")?;
            self.device
                .graphics_queue_wait_idle()
                .op("queue_wait_idle")
        }
    }

    unsafe fn free(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .free_command_buffers(self.command_pool.raw(), &[cmd])
        }
    }

    /// Records through `f` into a transient buffer and runs it to completion.
    fn one_shot(&self, f: impl FnOnce(vk::CommandBuffer)) -> RenderResult<()> {
        let cmd = self.begin_transient()?;
        f(cmd);
        self.end_transient(cmd)
    }

    pub fn copy_buffer(
        &self,
        src: &GpuBuffer<D>,
        dst: &GpuBuffer<D>,
        size: vk::DeviceSize,
    ) -> RenderResult<()> {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        self.one_shot(|cmd| unsafe {
            self.device
                .cmd_copy_buffer(cmd, src.raw(), dst.raw(), &[region])
        })
    }

    /// Whole-image copy; `image` must be in TRANSFER_DST_OPTIMAL.
    pub fn copy_buffer_to_image(&self, src: &GpuBuffer<D>, image: &GpuImage<D>) -> RenderResult<()> {
        let extent = image.extent();
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        self.one_shot(|cmd| unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src.raw(),
                image.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        })
    }

    pub fn transition_image_layout(
        &self,
        image: &GpuImage<D>,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) -> RenderResult<()> {
        let masks = transition_masks(from, to)?;
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(from)
            .new_layout(to)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.raw())
            .subresource_range(color_range())
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);
        self.one_shot(|cmd| unsafe {
            self.device
                .cmd_pipeline_barrier(cmd, masks.src_stage, masks.dst_stage, &[barrier])
        })
    }

    /// Host-visible staging buffer pre-filled with `bytes`. Dropped by the caller
    /// once the copy out of it has completed.
    fn staging(&self, bytes: &[u8]) -> RenderResult<GpuBuffer<D>> {
        let staging = self.create_buffer(
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_bytes(bytes)?;
        Ok(staging)
    }

    /// Device-local buffer holding `bytes`, filled through a staging copy.
    pub fn upload_buffer(
        &self,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> RenderResult<GpuBuffer<D>> {
        let size = bytes.len() as vk::DeviceSize;
        let staging = self.staging(bytes)?;
        let buffer = self.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.copy_buffer(&staging, &buffer, size)?;
        debug!(size, ?usage, "uploaded buffer");
        Ok(buffer)
    }

    /// Sampled RGBA8 image left in SHADER_READ_ONLY_OPTIMAL.
    pub fn upload_texture(&self, texture: &TextureData) -> RenderResult<GpuImage<D>> {
        let expected = u64::from(texture.width) * u64::from(texture.height) * 4;
        if expected == 0 || texture.pixels.len() as u64 != expected {
            return Err(RenderError::InvalidTexture {
                width: texture.width,
                height: texture.height,
                len: texture.pixels.len(),
            });
        }
        let staging = self.staging(&texture.pixels)?;
        let image = self.create_image(
            texture.width,
            texture.height,
            TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.transition_image_layout(
            &image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        self.copy_buffer_to_image(&staging, &image)?;
        self.transition_image_layout(
            &image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        debug!(width = texture.width, height = texture.height, "uploaded texture");
        Ok(image)
    }
}
