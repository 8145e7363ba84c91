// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::context::GraphicsApiContext;
use crate::error::{RenderResult, VkResultExt};
use crate::gpu::SurfaceInfo;

/// The platform window bound to the instance.
pub struct PresentationSurface {
    loader: surface::Instance,
    handle: vk::SurfaceKHR,
}

impl PresentationSurface {
    /// # Safety
    /// The window behind `window` must outlive the surface.
    pub unsafe fn new(
        context: &GraphicsApiContext,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> RenderResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(context.entry(), context.instance(), display, window, None)
        }
        .op("create_surface")?;
        let loader = surface::Instance::new(context.entry(), context.instance());
        Ok(PresentationSurface { loader, handle })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn loader(&self) -> &surface::Instance {
        &self.loader
    }

    /// # Safety
    /// `phys` must come from the instance that owns this surface.
    pub unsafe fn supports_present(&self, phys: vk::PhysicalDevice, family: u32) -> RenderResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(phys, family, self.handle)
        }
        .op("get_physical_device_surface_support")
    }

    /// # Safety
    /// `phys` must come from the instance that owns this surface.
    pub unsafe fn info(&self, phys: vk::PhysicalDevice) -> VkResult<SurfaceInfo> {
        unsafe { query_surface_info(&self.loader, phys, self.handle) }
    }
}

/// Fresh capability/format/present-mode snapshot.
///
/// # Safety
/// `phys` and `surface` must come from the instance `loader` was made for.
pub(crate) unsafe fn query_surface_info(
    loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> VkResult<SurfaceInfo> {
    unsafe {
        Ok(SurfaceInfo {
            capabilities: loader.get_physical_device_surface_capabilities(phys, surface)?,
            formats: loader.get_physical_device_surface_formats(phys, surface)?,
            present_modes: loader.get_physical_device_surface_present_modes(phys, surface)?,
        })
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) }
    }
}
