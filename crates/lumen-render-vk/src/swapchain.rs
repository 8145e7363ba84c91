// SPDX-License-Identifier: CEPL-1.0
//! Swap chain parameter selection and the chain + per-image views.

use std::rc::Rc;

use ash::vk;
use tracing::info;

use crate::allocator::create_image_view;
use crate::error::{RenderResult, VkResultExt};
use crate::gpu::{GpuDevice, SurfaceInfo};
use crate::owned::Owned;

pub const DESIRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Exact desired match, else the desired format when the surface is format
/// agnostic (a lone UNDEFINED entry), else the first candidate.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if formats.contains(&DESIRED_FORMAT) {
        return DESIRED_FORMAT;
    }
    match formats {
        [only] if only.format == vk::Format::UNDEFINED => DESIRED_FORMAT,
        [first, ..] => *first,
        [] => DESIRED_FORMAT,
    }
}

/// IMMEDIATE, then MAILBOX, then FIFO which every surface supports.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// The surface minimum, capped by the maximum when there is one (0 = unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count
    } else {
        caps.min_image_count.min(caps.max_image_count)
    }
}

/// The chain plus one view per image. Images belong to the chain and are never
/// destroyed individually; views are ours and go first.
pub struct SwapchainState<D: GpuDevice> {
    views: Vec<Owned<D, vk::ImageView>>,
    handle: Owned<D, vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl<D: GpuDevice> SwapchainState<D> {
    /// Builds a fresh chain for an already-chosen nonzero `extent`.
    pub fn new(device: &Rc<D>, surface: &SurfaceInfo, extent: vk::Extent2D) -> RenderResult<Self> {
        let caps = &surface.capabilities;
        let format = choose_surface_format(&surface.formats);
        let present_mode = choose_present_mode(&surface.present_modes);
        let image_count = choose_image_count(caps);

        let families = device.queue_families();
        let family_indices = [families.graphics, families.present];
        let mut info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());
        info = if families.shared() {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let handle = unsafe { device.create_swapchain(&info) }.op("create_swapchain")?;
        let handle = Owned::new(device, handle);
        let images = unsafe { device.get_swapchain_images(handle.raw()) }
            .op("get_swapchain_images")?;
        let views = images
            .iter()
            .map(|&image| create_image_view(device, image, format.format))
            .collect::<RenderResult<Vec<_>>>()?;

        info!(
            format = ?format.format,
            color_space = ?format.color_space,
            ?present_mode,
            width = extent.width,
            height = extent.height,
            images = images.len(),
            "swap chain built"
        );

        Ok(SwapchainState {
            views,
            handle,
            images,
            format,
            extent,
        })
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.handle.raw()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> impl ExactSizeIterator<Item = vk::ImageView> + '_ {
        self.views.iter().map(Owned::raw)
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}
