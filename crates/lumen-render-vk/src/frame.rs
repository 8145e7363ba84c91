// SPDX-License-Identifier: CEPL-1.0
//! Device-lifetime frame resources, the semaphore pair and per-image command
//! buffers.

use std::mem::size_of;
use std::rc::Rc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use lumen_render::TextureData;

use crate::allocator::{create_image_view, GpuBuffer, GpuImage, ResourceAllocator};
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::gpu::GpuDevice;
use crate::owned::Owned;
use crate::pipeline::{PipelineState, QUAD_INDICES, QUAD_VERTICES};

/// Read by the fragment stage. Rewritten in place every frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformPayload {
    /// Milliseconds since start.
    pub time: f32,
}

const MAX_ANISOTROPY: f32 = 16.0;

/// Uniform buffer, texture, sampler, descriptor set and the static quad.
/// Created once; swap chain rebuilds leave it alone.
pub struct FrameResources<D: GpuDevice> {
    index_buffer: GpuBuffer<D>,
    vertex_buffer: GpuBuffer<D>,
    // Freed with the pool.
    descriptor_set: vk::DescriptorSet,
    descriptor_pool: Owned<D, vk::DescriptorPool>,
    sampler: Owned<D, vk::Sampler>,
    texture_view: Owned<D, vk::ImageView>,
    texture: GpuImage<D>,
    uniform: GpuBuffer<D>,
}

impl<D: GpuDevice> FrameResources<D> {
    pub fn new(
        device: &Rc<D>,
        allocator: &ResourceAllocator<D>,
        set_layout: vk::DescriptorSetLayout,
        texture: &TextureData,
    ) -> RenderResult<Self> {
        let uniform = allocator.create_buffer(
            size_of::<UniformPayload>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        uniform.write_bytes(bytemuck::bytes_of(&UniformPayload::default()))?;

        let texture = allocator.upload_texture(texture)?;
        let texture_view = create_image_view(device, texture.raw(), texture.format())?;
        let sampler = create_sampler(device)?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        let pool = unsafe { device.create_descriptor_pool(&pool_info) }
            .op("create_descriptor_pool")?;
        let descriptor_pool = Owned::new(device, pool);

        let layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool.raw())
            .set_layouts(&layouts);
        let descriptor_set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .op("allocate_descriptor_sets")?
            .into_iter()
            .next()
            .ok_or(RenderError::Vulkan {
                op: "allocate_descriptor_sets",
                result: vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            })?;

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: uniform.raw(),
            offset: 0,
            range: size_of::<UniformPayload>() as vk::DeviceSize,
        }];
        let image_info = [vk::DescriptorImageInfo {
            sampler: sampler.raw(),
            image_view: texture_view.raw(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info),
            vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&image_info),
        ];
        unsafe { device.update_descriptor_sets(&writes) };

        let vertex_buffer = allocator.upload_buffer(
            bytemuck::cast_slice(&QUAD_VERTICES),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = allocator.upload_buffer(
            bytemuck::cast_slice(&QUAD_INDICES),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        Ok(FrameResources {
            index_buffer,
            vertex_buffer,
            descriptor_set,
            descriptor_pool,
            sampler,
            texture_view,
            texture,
            uniform,
        })
    }

    /// Map, copy, unmap. No double buffering: safe only while a single frame
    /// is in flight.
    pub fn write_uniform(&self, payload: &UniformPayload) -> RenderResult<()> {
        self.uniform.write_bytes(bytemuck::bytes_of(payload))
    }

    pub fn uniform_memory(&self) -> vk::DeviceMemory {
        self.uniform.memory()
    }

    pub fn texture_extent(&self) -> vk::Extent2D {
        self.texture.extent()
    }
}

fn create_sampler<D: GpuDevice>(device: &Rc<D>) -> RenderResult<Owned<D, vk::Sampler>> {
    let anisotropy = device.enabled_features().sampler_anisotropy == vk::TRUE;
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(anisotropy)
        .max_anisotropy(if anisotropy { MAX_ANISOTROPY } else { 1.0 })
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);
    let sampler = unsafe { device.create_sampler(&info) }.op("create_sampler")?;
    Ok(Owned::new(device, sampler))
}

/// Binary semaphores reused by every frame. One pair means one frame in flight.
pub struct FrameSync<D: GpuDevice> {
    render_finished: Owned<D, vk::Semaphore>,
    image_available: Owned<D, vk::Semaphore>,
}

impl<D: GpuDevice> FrameSync<D> {
    pub fn new(device: &Rc<D>) -> RenderResult<Self> {
        let image_available =
            Owned::new(device, unsafe { device.create_semaphore() }.op("create_semaphore")?);
        let render_finished =
            Owned::new(device, unsafe { device.create_semaphore() }.op("create_semaphore")?);
        Ok(FrameSync {
            render_finished,
            image_available,
        })
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.raw()
    }

    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.raw()
    }
}

/// Command pool plus one pre-recorded buffer per swap image.
pub struct CommandBuffers<D: GpuDevice> {
    buffers: Vec<vk::CommandBuffer>,
    pool: Owned<D, vk::CommandPool>,
    device: Rc<D>,
}

impl<D: GpuDevice> CommandBuffers<D> {
    pub fn record(
        device: &Rc<D>,
        pipeline: &PipelineState<D>,
        framebuffers: &[Owned<D, vk::Framebuffer>],
        extent: vk::Extent2D,
        resources: &FrameResources<D>,
        clear_color: [f32; 4],
    ) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families().graphics);
        let pool = unsafe { device.create_command_pool(&pool_info) }.op("create_command_pool")?;
        let pool = Owned::new(device, pool);

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.raw())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.len() as u32);
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .op("allocate_command_buffers")?;
        let out = CommandBuffers {
            buffers,
            pool,
            device: Rc::clone(device),
        };

        let clears = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];
        for (&cmd, fb) in out.buffers.iter().zip(framebuffers) {
            unsafe {
                let begin = vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
                device
                    .begin_command_buffer(cmd, &begin)
                    .op("begin_command_buffer")?;

                let rp_begin = vk::RenderPassBeginInfo::default()
                    .render_pass(pipeline.render_pass())
                    .framebuffer(fb.raw())
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .clear_values(&clears);
                device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline());
                device.cmd_bind_vertex_buffers(cmd, 0, &[resources.vertex_buffer.raw()], &[0]);
                device.cmd_bind_index_buffer(
                    cmd,
                    resources.index_buffer.raw(),
                    0,
                    vk::IndexType::UINT16,
                );
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    pipeline.layout(),
                    0,
                    &[resources.descriptor_set],
                );
                device.cmd_draw_indexed(cmd, QUAD_INDICES.len() as u32);
                device.cmd_end_render_pass(cmd);

                device.end_command_buffer(cmd).op("end_command_buffer")?;
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index as usize).copied()
    }
}

impl<D: GpuDevice> Drop for CommandBuffers<D> {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe {
                self.device
                    .free_command_buffers(self.pool.raw(), &self.buffers)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::create_descriptor_set_layout;
    use crate::testing::{Kind, RecordingDevice};

    fn texture() -> TextureData {
        TextureData {
            width: 4,
            height: 4,
            pixels: vec![0x80; 64],
        }
    }

    #[test]
    fn uniform_payload_is_one_float() {
        assert_eq!(size_of::<UniformPayload>(), 4);
        let bytes = bytemuck::bytes_of(&UniformPayload { time: 1.5 });
        assert_eq!(bytes, &1.5f32.to_ne_bytes());
    }

    #[test]
    fn resources_release_everything_they_create() {
        let device = Rc::new(RecordingDevice::new());
        let allocator = ResourceAllocator::new(&device).unwrap();
        let layout = create_descriptor_set_layout(&device).unwrap();
        let before = device.live_count();

        let res = FrameResources::new(&device, &allocator, layout.raw(), &texture()).unwrap();
        // uniform + vertex + index buffers, one texture, one memory each.
        assert_eq!(device.live_of(Kind::Buffer), 3);
        assert_eq!(device.live_of(Kind::Image), 1);
        assert_eq!(device.live_of(Kind::Memory), 4);
        assert_eq!(device.live_of(Kind::Sampler), 1);
        assert_eq!(device.live_of(Kind::DescriptorPool), 1);
        assert_eq!(res.texture_extent(), vk::Extent2D { width: 4, height: 4 });

        res.write_uniform(&UniformPayload { time: 250.0 }).unwrap();
        assert_eq!(
            device.memory_bytes(res.uniform_memory()),
            250.0f32.to_ne_bytes().to_vec()
        );

        drop(res);
        assert_eq!(device.live_count(), before);
    }

    #[test]
    fn semaphores_are_distinct() {
        let device = Rc::new(RecordingDevice::new());
        let sync = FrameSync::new(&device).unwrap();
        assert_ne!(sync.image_available(), sync.render_finished());
        assert_eq!(device.live_of(Kind::Semaphore), 2);
        drop(sync);
        assert_eq!(device.live_of(Kind::Semaphore), 0);
    }
}
