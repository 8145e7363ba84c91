// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;

use ash::vk;

use crate::gpu::GpuDevice;

/// A device object that is released by a single destroy call.
pub trait DeviceObject: Copy {
    /// # Safety
    /// `self` must have been created by `device` and must no longer be in use by the GPU.
    unsafe fn destroy<D: GpuDevice>(self, device: &D);
}

macro_rules! device_object {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceObject for $ty {
                unsafe fn destroy<D: GpuDevice>(self, device: &D) {
                    unsafe { device.$destroy(self) }
                }
            }
        )*
    };
}

device_object! {
    vk::SwapchainKHR => destroy_swapchain,
    vk::ImageView => destroy_image_view,
    vk::Sampler => destroy_sampler,
    vk::ShaderModule => destroy_shader_module,
    vk::RenderPass => destroy_render_pass,
    vk::Framebuffer => destroy_framebuffer,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::Pipeline => destroy_pipeline,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::Semaphore => destroy_semaphore,
    vk::CommandPool => destroy_command_pool,
}

/// Owns one device object; destroys it on drop.
///
/// Holding an `Rc` of the device keeps the device alive for as long as any of
/// its objects, so the device is always the last thing to go.
pub struct Owned<D: GpuDevice, H: DeviceObject> {
    device: Rc<D>,
    handle: H,
}

impl<D: GpuDevice, H: DeviceObject> Owned<D, H> {
    /// Takes ownership of a handle freshly created by `device`.
    pub(crate) fn new(device: &Rc<D>, handle: H) -> Self {
        Owned {
            device: Rc::clone(device),
            handle,
        }
    }

    #[inline]
    pub fn raw(&self) -> H {
        self.handle
    }
}

impl<D: GpuDevice, H: DeviceObject> Drop for Owned<D, H> {
    fn drop(&mut self) {
        unsafe { self.handle.destroy(&*self.device) }
    }
}

impl<D: GpuDevice, H: DeviceObject + std::fmt::Debug> std::fmt::Debug for Owned<D, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}
