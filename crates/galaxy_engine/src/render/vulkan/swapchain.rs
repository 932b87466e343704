//! Vulkan swapchain management
//!
//! The swapchain is created once at a fixed extent and is only ever written
//! by transfer: the rasterized frame is copied into the acquired image.

use ash::{vk, Device};
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use crate::render::vulkan::{PhysicalDeviceInfo, VulkanError, VulkanResult};

/// Number of swapchain images requested before clamping to surface limits
pub const DESIRED_IMAGE_COUNT: u32 = 3;

/// Outcome of a successful present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    /// Presented as-is
    Optimal,
    /// Presented, but the swapchain no longer matches the surface exactly
    Suboptimal,
}

/// Clamp a requested image count to surface limits
///
/// A `max` of zero means the surface imposes no upper bound.
#[must_use]
pub fn clamp_image_count(desired: u32, min: u32, max: u32) -> u32 {
    let count = desired.max(min);
    if max == 0 {
        count
    } else {
        count.min(max)
    }
}

/// Pick the presentation format
///
/// R8G8B8A8 matches the storage image byte for byte. B8G8R8A8 is accepted
/// as a fallback, in which case the rasterizer must swap red and blue. The
/// returned flag says whether that swap is needed. Failing both, the first
/// reported format is used unswapped.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> VulkanResult<(vk::SurfaceFormatKHR, bool)> {
    let pick = |format: vk::Format| {
        formats
            .iter()
            .find(|sf| sf.format == format && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .copied()
    };

    if let Some(format) = pick(vk::Format::R8G8B8A8_UNORM) {
        return Ok((format, false));
    }
    if let Some(format) = pick(vk::Format::B8G8R8A8_UNORM) {
        return Ok((format, true));
    }

    let first = formats.first().copied().ok_or_else(|| {
        VulkanError::InitializationFailed("Surface reports no formats".to_string())
    })?;
    log::warn!("No 8-bit UNORM surface format, presenting as {:?}", first.format);
    Ok((first, false))
}

/// Choose the swapchain extent
///
/// Surfaces that report a fixed current extent dictate it; otherwise the
/// requested extent is clamped to the allowed range.
#[must_use]
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width,
            ),
            height: requested.height.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height,
            ),
        }
    }
}

/// Swapchain management wrapper with RAII cleanup
pub struct Swapchain {
    device: Device,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    swap_red_blue: bool,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain
    pub fn new(
        device: Device,
        swapchain_loader: SwapchainLoader,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        physical_device_info: &PhysicalDeviceInfo,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let surface_caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device_info.device, surface)
                .map_err(VulkanError::Api)?
        };

        if !surface_caps.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            return Err(VulkanError::InitializationFailed(
                "Surface images cannot be transfer destinations".to_string()
            ));
        }

        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device_info.device, surface)
                .map_err(VulkanError::Api)?
        };
        let (format, swap_red_blue) = choose_surface_format(&surface_formats)?;

        let extent = choose_extent(&surface_caps, window_extent);
        let image_count = clamp_image_count(
            DESIRED_IMAGE_COUNT,
            surface_caps.min_image_count,
            surface_caps.max_image_count,
        );

        let families = physical_device_info.queue_families;
        let family_indices = [families.graphics, families.present];
        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain_create_info = if families.is_unified() {
            swapchain_create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            swapchain_create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(VulkanError::Api)?
        };

        let images = unsafe {
            swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };

        log::debug!(
            "Swapchain created: {} images (requested {}), format {:?}, swap_red_blue={}",
            images.len(),
            image_count,
            format.format,
            swap_red_blue,
        );

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            format,
            swap_red_blue,
            extent,
        })
    }

    /// Acquire the next presentable image
    ///
    /// Anything other than a clean success is an error, including
    /// `SUBOPTIMAL_KHR`, since the swapchain is never recreated.
    pub fn acquire_next_image(&self, timeout_ns: u64, signal: vk::Semaphore) -> VulkanResult<u32> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout_ns, signal, vk::Fence::null())
                .map_err(VulkanError::Api)?
        };

        if suboptimal {
            return Err(VulkanError::Api(vk::Result::SUBOPTIMAL_KHR));
        }
        Ok(index)
    }

    /// Queue an image for presentation
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> VulkanResult<PresentStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe {
            self.swapchain_loader
                .queue_present(queue, &present_info)
                .map_err(VulkanError::Api)?
        };

        Ok(if suboptimal {
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Optimal
        })
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Get swapchain format
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Whether the chosen format stores blue before red
    pub fn swap_red_blue(&self) -> bool {
        self.swap_red_blue
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
