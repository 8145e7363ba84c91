// SPDX-License-Identifier: CEPL-1.0
//! Physical device filtering. First conforming device in enumeration order wins;
//! there is no scoring.

use std::collections::BTreeSet;
use std::ffi::{CStr, CString};

use ash::vk;
use bitflags::bitflags;
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::gpu::{QueueFamilies, SurfaceInfo};
use crate::surface::PresentationSurface;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct QueueCapabilities: u32 {
        const GRAPHICS = 1 << 0;
        const TRANSFER = 1 << 1;
        const COMPUTE = 1 << 2;
        const PRESENT = 1 << 3;
    }
}

impl QueueCapabilities {
    fn from_queue_flags(flags: vk::QueueFlags, present: bool) -> Self {
        let mut caps = QueueCapabilities::empty();
        caps.set(Self::GRAPHICS, flags.contains(vk::QueueFlags::GRAPHICS));
        caps.set(Self::TRANSFER, flags.contains(vk::QueueFlags::TRANSFER));
        caps.set(Self::COMPUTE, flags.contains(vk::QueueFlags::COMPUTE));
        caps.set(Self::PRESENT, present);
        caps
    }
}

/// Everything the filter looks at for one physical device, queried against the
/// current surface. Re-queried wholesale, never patched.
#[derive(Clone, Debug)]
pub struct DeviceCapabilityRecord {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub features: vk::PhysicalDeviceFeatures,
    pub extensions: BTreeSet<CString>,
    /// Indexed by queue family.
    pub queue_families: Vec<QueueCapabilities>,
    pub surface: SurfaceInfo,
}

#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub extensions: Vec<&'static CStr>,
    pub geometry_shader: bool,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        DeviceRequirements {
            extensions: vec![ash::khr::swapchain::NAME],
            geometry_shader: true,
        }
    }
}

/// First graphics-capable family and first present-capable family, chosen
/// independently. They may coincide.
pub fn resolve_queue_families(families: &[QueueCapabilities]) -> Option<QueueFamilies> {
    let first = |cap: QueueCapabilities| {
        families
            .iter()
            .position(|f| f.contains(cap))
            .map(|i| i as u32)
    };
    Some(QueueFamilies {
        graphics: first(QueueCapabilities::GRAPHICS)?,
        present: first(QueueCapabilities::PRESENT)?,
    })
}

/// Returns the resolved queue families if `record` passes every predicate.
pub fn check_device(
    record: &DeviceCapabilityRecord,
    req: &DeviceRequirements,
) -> Option<QueueFamilies> {
    let reject = |why: &str| {
        debug!(device = %record.name, "rejected: {why}");
        None
    };

    if !matches!(
        record.device_type,
        vk::PhysicalDeviceType::DISCRETE_GPU | vk::PhysicalDeviceType::INTEGRATED_GPU
    ) {
        return reject("not a discrete or integrated GPU");
    }
    if req.geometry_shader && record.features.geometry_shader != vk::TRUE {
        return reject("no geometry shader support");
    }
    let Some(families) = resolve_queue_families(&record.queue_families) else {
        return reject("missing graphics or present queue family");
    };
    if let Some(missing) = req
        .extensions
        .iter()
        .find(|e| !record.extensions.contains(**e))
    {
        debug!(device = %record.name, "rejected: missing extension {missing:?}");
        return None;
    }
    if record.surface.formats.is_empty() || record.surface.present_modes.is_empty() {
        return reject("no surface formats or present modes");
    }
    Some(families)
}

pub fn select_device<'a>(
    records: &'a [DeviceCapabilityRecord],
    req: &DeviceRequirements,
) -> RenderResult<(&'a DeviceCapabilityRecord, QueueFamilies)> {
    records
        .iter()
        .find_map(|r| check_device(r, req).map(|q| (r, q)))
        .ok_or(RenderError::NoSuitableDevice)
}

/// # Safety
/// `phys` must belong to `instance`, and `surface` must be alive.
pub unsafe fn query_capabilities(
    instance: &ash::Instance,
    surface: &PresentationSurface,
    phys: vk::PhysicalDevice,
) -> RenderResult<DeviceCapabilityRecord> {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("<unnamed>"));
    let features = unsafe { instance.get_physical_device_features(phys) };

    let extensions = unsafe { instance.enumerate_device_extension_properties(phys) }
        .op("enumerate_device_extension_properties")?
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect::<BTreeSet<_>>();

    let family_props = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let mut queue_families = Vec::with_capacity(family_props.len());
    for (i, fam) in family_props.iter().enumerate() {
        let present = unsafe { surface.supports_present(phys, i as u32) }?;
        queue_families.push(QueueCapabilities::from_queue_flags(fam.queue_flags, present));
    }

    let surface_info = unsafe { surface.info(phys) }.op("query surface")?;

    Ok(DeviceCapabilityRecord {
        physical_device: phys,
        name,
        device_type: props.device_type,
        features,
        extensions,
        queue_families,
        surface: surface_info,
    })
}

/// A device whose query fails is logged and left out; it cannot be picked.
fn collect_records(
    physical: Vec<vk::PhysicalDevice>,
    mut query: impl FnMut(vk::PhysicalDevice) -> RenderResult<DeviceCapabilityRecord>,
) -> Vec<DeviceCapabilityRecord> {
    physical
        .into_iter()
        .filter_map(|phys| match query(phys) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(device = ?phys, error = %e, "skipping device whose capabilities could not be queried");
                None
            }
        })
        .collect()
}

/// Queries every physical device and picks the first that passes.
///
/// # Safety
/// `surface` must have been created from `instance`.
pub unsafe fn pick_device(
    instance: &ash::Instance,
    surface: &PresentationSurface,
    req: &DeviceRequirements,
) -> RenderResult<(DeviceCapabilityRecord, QueueFamilies)> {
    let physical = unsafe { instance.enumerate_physical_devices() }
        .op("enumerate_physical_devices")?;
    let records = collect_records(physical, |phys| unsafe {
        query_capabilities(instance, surface, phys)
    });
    debug!(count = records.len(), "enumerated physical devices");

    let (record, families) = select_device(&records, req)?;
    info!(
        device = %record.name,
        kind = ?record.device_type,
        graphics_family = families.graphics,
        present_family = families.present,
        "selected physical device"
    );
    Ok((record.clone(), families))
}
