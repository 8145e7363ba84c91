// SPDX-License-Identifier: CEPL-1.0
//! In-memory `GpuDevice` that records every object it hands out.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::gpu::{GpuDevice, QueueFamilies, SurfaceInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Swapchain,
    ImageView,
    Sampler,
    ShaderModule,
    RenderPass,
    Framebuffer,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    DescriptorPool,
    Semaphore,
    CommandPool,
    CommandBuffer,
    Buffer,
    Image,
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Create(Kind, u64),
    Destroy(Kind, u64),
    Submit {
        command_buffers: Vec<u64>,
        wait: Vec<u64>,
        wait_stages: Vec<vk::PipelineStageFlags>,
        signal: Vec<u64>,
    },
    Acquire {
        signal: u64,
        result: Result<u32, vk::Result>,
    },
    Present {
        image_index: u32,
        wait: Vec<u64>,
    },
    Barrier {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    DeviceWaitIdle,
    GraphicsQueueWaitIdle,
    PresentQueueWaitIdle,
}

/// Header-only SPIR-V module; enough for module creation against the fake.
pub fn spirv_stub() -> Vec<u8> {
    [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

pub struct RecordingDevice {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    features: vk::PhysicalDeviceFeatures,
    families: QueueFamilies,
    surface: RefCell<SurfaceInfo>,
    next_handle: Cell<u64>,
    next_image: Cell<u32>,
    events: RefCell<Vec<Event>>,
    live: RefCell<HashMap<u64, Kind>>,
    sizes: RefCell<HashMap<u64, vk::DeviceSize>>,
    memory: RefCell<HashMap<u64, Vec<u8>>>,
    chain_lengths: RefCell<HashMap<u64, u32>>,
    acquire_script: RefCell<VecDeque<vk::Result>>,
    present_script: RefCell<VecDeque<vk::Result>>,
    submit_script: RefCell<VecDeque<vk::Result>>,
}

pub const DEVICE_LOCAL_TYPE: u32 = 0;
pub const HOST_VISIBLE_TYPE: u32 = 1;
// Never handed out by the counter.
const SURFACE: u64 = u64::MAX;

impl RecordingDevice {
    pub fn new() -> Self {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 1,
            ..Default::default()
        };
        memory_properties.memory_types[DEVICE_LOCAL_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory_properties.memory_types[HOST_VISIBLE_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };

        RecordingDevice {
            memory_properties,
            features: vk::PhysicalDeviceFeatures {
                sampler_anisotropy: vk::TRUE,
                ..Default::default()
            },
            families: QueueFamilies {
                graphics: 0,
                present: 0,
            },
            surface: RefCell::new(SurfaceInfo {
                capabilities,
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            }),
            next_handle: Cell::new(1),
            next_image: Cell::new(0),
            events: RefCell::new(Vec::new()),
            live: RefCell::new(HashMap::new()),
            sizes: RefCell::new(HashMap::new()),
            memory: RefCell::new(HashMap::new()),
            chain_lengths: RefCell::new(HashMap::new()),
            acquire_script: RefCell::new(VecDeque::new()),
            present_script: RefCell::new(VecDeque::new()),
            submit_script: RefCell::new(VecDeque::new()),
        }
    }

    pub fn set_current_extent(&self, width: u32, height: u32) {
        self.surface.borrow_mut().capabilities.current_extent = vk::Extent2D { width, height };
    }

    /// The next acquire call fails with `result` instead of handing out an image.
    pub fn fail_next_acquire(&self, result: vk::Result) {
        self.acquire_script.borrow_mut().push_back(result);
    }

    pub fn fail_next_present(&self, result: vk::Result) {
        self.present_script.borrow_mut().push_back(result);
    }

    /// The next submit is rejected with `result` and records nothing.
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.submit_script.borrow_mut().push_back(result);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn mark(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn events_since(&self, mark: usize) -> Vec<Event> {
        self.events.borrow()[mark..].to_vec()
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn live_of(&self, kind: Kind) -> usize {
        self.live.borrow().values().filter(|&&k| k == kind).count()
    }

    pub fn memory_bytes(&self, memory: vk::DeviceMemory) -> Vec<u8> {
        self.memory
            .borrow()
            .get(&memory.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    fn push(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    fn next_raw(&self) -> u64 {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        raw
    }

    fn create<H: Handle>(&self, kind: Kind) -> H {
        let raw = self.next_raw();
        self.live.borrow_mut().insert(raw, kind);
        self.push(Event::Create(kind, raw));
        H::from_raw(raw)
    }

    fn destroy<H: Handle>(&self, kind: Kind, handle: H) {
        let raw = handle.as_raw();
        match self.live.borrow_mut().remove(&raw) {
            Some(k) if k == kind => {}
            other => panic!("destroy of {kind:?} {raw} which is {other:?}"),
        }
        self.push(Event::Destroy(kind, raw));
    }

    fn check_live<H: Handle>(&self, handle: H) {
        let raw = handle.as_raw();
        assert!(
            self.live.borrow().contains_key(&raw),
            "use of dead handle {raw}"
        );
    }
}

fn raw_slice<H: Handle + Copy>(ptr: *const H, count: u32) -> Vec<u64> {
    if count == 0 || ptr.is_null() {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(ptr, count as usize) }
        .iter()
        .map(|h| h.as_raw())
        .collect()
}

impl GpuDevice for RecordingDevice {
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn enabled_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(SURFACE)
    }

    unsafe fn surface_info(&self) -> VkResult<SurfaceInfo> {
        Ok(self.surface.borrow().clone())
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        self.push(Event::DeviceWaitIdle);
        Ok(())
    }

    unsafe fn graphics_queue_wait_idle(&self) -> VkResult<()> {
        self.push(Event::GraphicsQueueWaitIdle);
        Ok(())
    }

    unsafe fn present_queue_wait_idle(&self) -> VkResult<()> {
        self.push(Event::PresentQueueWaitIdle);
        Ok(())
    }

    unsafe fn graphics_queue_submit(
        &self,
        submits: &[vk::SubmitInfo<'_>],
        _fence: vk::Fence,
    ) -> VkResult<()> {
        if let Some(err) = self.submit_script.borrow_mut().pop_front() {
            return Err(err);
        }
        for s in submits {
            let wait_stages = if s.wait_semaphore_count == 0 {
                Vec::new()
            } else {
                unsafe {
                    std::slice::from_raw_parts(
                        s.p_wait_dst_stage_mask,
                        s.wait_semaphore_count as usize,
                    )
                }
                .to_vec()
            };
            let command_buffers = raw_slice(s.p_command_buffers, s.command_buffer_count);
            for &cb in &command_buffers {
                self.check_live(vk::CommandBuffer::from_raw(cb));
            }
            self.push(Event::Submit {
                command_buffers,
                wait: raw_slice(s.p_wait_semaphores, s.wait_semaphore_count),
                wait_stages,
                signal: raw_slice(s.p_signal_semaphores, s.signal_semaphore_count),
            });
        }
        Ok(())
    }

    unsafe fn queue_present(&self, info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        let image_index = unsafe { *info.p_image_indices };
        self.push(Event::Present {
            image_index,
            wait: raw_slice(info.p_wait_semaphores, info.wait_semaphore_count),
        });
        match self.present_script.borrow_mut().pop_front() {
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(err) => Err(err),
            None => Ok(false),
        }
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let swapchain: vk::SwapchainKHR = self.create(Kind::Swapchain);
        self.chain_lengths
            .borrow_mut()
            .insert(swapchain.as_raw(), info.min_image_count);
        Ok(swapchain)
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.destroy(Kind::Swapchain, swapchain);
    }

    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let count = self.chain_lengths.borrow()[&swapchain.as_raw()];
        Ok((0..count)
            .map(|_| vk::Image::from_raw(self.next_raw()))
            .collect())
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.check_live(swapchain);
        if let Some(err) = self.acquire_script.borrow_mut().pop_front() {
            self.push(Event::Acquire {
                signal: semaphore.as_raw(),
                result: Err(err),
            });
            return Err(err);
        }
        let count = self.chain_lengths.borrow()[&swapchain.as_raw()];
        let index = self.next_image.get() % count;
        self.next_image.set(index + 1);
        self.push(Event::Acquire {
            signal: semaphore.as_raw(),
            result: Ok(index),
        });
        Ok((index, false))
    }

    unsafe fn allocate_memory(
        &self,
        info: &vk::MemoryAllocateInfo<'_>,
    ) -> VkResult<vk::DeviceMemory> {
        let memory: vk::DeviceMemory = self.create(Kind::Memory);
        self.memory
            .borrow_mut()
            .insert(memory.as_raw(), vec![0; info.allocation_size as usize]);
        Ok(memory)
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        self.destroy(Kind::Memory, memory);
        self.memory.borrow_mut().remove(&memory.as_raw());
    }

    unsafe fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> VkResult<*mut std::ffi::c_void> {
        let mut all = self.memory.borrow_mut();
        let bytes = all
            .get_mut(&memory.as_raw())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        Ok(unsafe { bytes.as_mut_ptr().add(offset as usize) }.cast())
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        self.check_live(memory);
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        let buffer: vk::Buffer = self.create(Kind::Buffer);
        self.sizes.borrow_mut().insert(buffer.as_raw(), info.size);
        Ok(buffer)
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.destroy(Kind::Buffer, buffer);
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: self.sizes.borrow()[&buffer.as_raw()],
            alignment: 4,
            memory_type_bits: 0b11,
        }
    }

    unsafe fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
    ) -> VkResult<()> {
        self.check_live(buffer);
        self.check_live(memory);
        Ok(())
    }

    unsafe fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        let image: vk::Image = self.create(Kind::Image);
        let size = u64::from(info.extent.width) * u64::from(info.extent.height) * 4;
        self.sizes.borrow_mut().insert(image.as_raw(), size);
        Ok(image)
    }

    unsafe fn destroy_image(&self, image: vk::Image) {
        self.destroy(Kind::Image, image);
    }

    unsafe fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: self.sizes.borrow()[&image.as_raw()],
            alignment: 256,
            memory_type_bits: 1 << DEVICE_LOCAL_TYPE,
        }
    }

    unsafe fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        self.check_live(image);
        self.check_live(memory);
        Ok(())
    }

    unsafe fn create_image_view(
        &self,
        _info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        Ok(self.create(Kind::ImageView))
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy(Kind::ImageView, view);
    }

    unsafe fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler> {
        Ok(self.create(Kind::Sampler))
    }

    unsafe fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy(Kind::Sampler, sampler);
    }

    unsafe fn create_shader_module(
        &self,
        info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> VkResult<vk::ShaderModule> {
        assert!(info.code_size > 0, "empty shader module");
        Ok(self.create(Kind::ShaderModule))
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy(Kind::ShaderModule, module);
    }

    unsafe fn create_render_pass(
        &self,
        _info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        Ok(self.create(Kind::RenderPass))
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy(Kind::RenderPass, render_pass);
    }

    unsafe fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        self.check_live(info.render_pass);
        Ok(self.create(Kind::Framebuffer))
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy(Kind::Framebuffer, framebuffer);
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        Ok(self.create(Kind::DescriptorSetLayout))
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy(Kind::DescriptorSetLayout, layout);
    }

    unsafe fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        Ok(self.create(Kind::PipelineLayout))
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy(Kind::PipelineLayout, layout);
    }

    unsafe fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        self.check_live(info.render_pass);
        self.check_live(info.layout);
        Ok(self.create(Kind::Pipeline))
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy(Kind::Pipeline, pipeline);
    }

    unsafe fn create_descriptor_pool(
        &self,
        _info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorPool> {
        Ok(self.create(Kind::DescriptorPool))
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.destroy(Kind::DescriptorPool, pool);
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        self.check_live(info.descriptor_pool);
        Ok((0..info.descriptor_set_count)
            .map(|_| vk::DescriptorSet::from_raw(self.next_raw()))
            .collect())
    }

    unsafe fn update_descriptor_sets(&self, _writes: &[vk::WriteDescriptorSet<'_>]) {}

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.create(Kind::Semaphore))
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy(Kind::Semaphore, semaphore);
    }

    unsafe fn create_command_pool(
        &self,
        _info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        Ok(self.create(Kind::CommandPool))
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy(Kind::CommandPool, pool);
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        self.check_live(info.command_pool);
        Ok((0..info.command_buffer_count)
            .map(|_| self.create(Kind::CommandBuffer))
            .collect())
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.check_live(pool);
        for &cb in buffers {
            self.destroy(Kind::CommandBuffer, cb);
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        self.check_live(cmd);
        Ok(())
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.check_live(cmd);
        Ok(())
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
        _contents: vk::SubpassContents,
    ) {
        self.check_live(cmd);
        self.check_live(info.render_pass);
        self.check_live(info.framebuffer);
    }

    unsafe fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.check_live(cmd);
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.check_live(cmd);
        self.check_live(pipeline);
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        _first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.check_live(cmd);
        for &b in buffers {
            self.check_live(b);
        }
    }

    unsafe fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.check_live(cmd);
        self.check_live(buffer);
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        _first_set: u32,
        _sets: &[vk::DescriptorSet],
    ) {
        self.check_live(cmd);
        self.check_live(layout);
    }

    unsafe fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, _index_count: u32) {
        self.check_live(cmd);
    }

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        _regions: &[vk::BufferCopy],
    ) {
        self.check_live(cmd);
        self.check_live(src);
        self.check_live(dst);
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.check_live(cmd);
        self.check_live(src);
        self.check_live(dst);
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        self.check_live(cmd);
        for b in image_barriers {
            self.push(Event::Barrier {
                old: b.old_layout,
                new: b.new_layout,
            });
        }
    }
}
