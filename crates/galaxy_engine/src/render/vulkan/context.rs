//! Vulkan context management
//!
//! Instance, physical device selection, logical device and the swapchain the
//! star renderer presents to. Everything with device lifetime is owned here;
//! the rest of the crate borrows handles or holds cloned `ash::Device`
//! dispatch tables.

use ash::{Device, Entry, Instance};
#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use std::ffi::{CStr, CString};
use thiserror::Error;

use crate::render::vulkan::commands::CommandPool;
use crate::render::vulkan::swapchain::Swapchain;
use crate::render::vulkan::window::Window;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Staging, device and size lists handed to a bulk copy disagree in length
    #[error("Buffer lists differ in length (staging: {staging}, device: {device}, sizes: {sizes})")]
    BufferCountMismatch {
        /// Number of staging buffers
        staging: usize,
        /// Number of device buffers
        device: usize,
        /// Number of copy sizes
        sizes: usize,
    },

    /// A bulk copy was requested with nothing to copy
    #[error("Buffer lists cannot be empty")]
    EmptyBufferList,

    /// The device exposes no queue family with the required capability
    #[error("No {0} queue family found")]
    MissingQueueFamily(&'static str),

    /// A bounded wait ran out of time
    #[error("Timed out waiting for {stage}")]
    Timeout {
        /// Which wait expired
        stage: &'static str,
    },

    /// A SPIR-V module could not be read from disk
    #[error("Failed to load shader {path}: {reason}")]
    ShaderLoad {
        /// Path that was read
        path: String,
        /// Underlying failure
        reason: String,
    },
}

impl VulkanError {
    /// Process exit status for this error
    ///
    /// API failures exit with the low byte of the raw `VkResult` code, or 1
    /// when that byte is zero; everything else exits with 1. The status is
    /// always in `1..=255`, so it survives truncation to 8 bits.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Api(result) => match result.as_raw() & 0xFF {
                0 => 1,
                code => code,
            },
            _ => 1,
        }
    }

    /// Raw `VkResult` behind an API failure
    #[must_use]
    pub fn raw_result(&self) -> Option<i32> {
        match self {
            Self::Api(result) => Some(result.as_raw()),
            _ => None,
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension (debug builds)
    #[cfg(debug_assertions)]
    pub debug_utils: Option<DebugUtils>,
    /// Debug messenger handle (debug builds)
    #[cfg(debug_assertions)]
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance, with validation layers when requested
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {}", e)))?;
        let engine_name_cstr = CString::new("GalaxyEngine")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_1);

        let required_extensions = window.get_required_instance_extensions()
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {}", e)))?;

        let cstr_extensions = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        #[allow(unused_mut)] // Mutable in debug builds for adding debug extensions
        let mut extensions: Vec<*const i8> = cstr_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        #[cfg(debug_assertions)]
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let validation_layer = CStr::from_bytes_with_nul(b"VK_LAYER_KHRONOS_validation\0")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let layer_names_ptrs: Vec<*const i8> = if cfg!(debug_assertions) && enable_validation {
            vec![validation_layer.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names_ptrs);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        #[cfg(debug_assertions)]
        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let debug_messenger = Self::setup_debug_messenger(&debug_utils)?;
            (Some(debug_utils), Some(debug_messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug_utils,
            #[cfg(debug_assertions)]
            debug_messenger,
        })
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let (Some(debug_utils), Some(debug_messenger)) =
                (&self.debug_utils, &self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(*debug_messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// What a queue family offers, as far as family selection cares
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyCandidate {
    /// Capabilities reported by the driver
    pub flags: vk::QueueFlags,
    /// Whether the family can present to the window surface
    pub present_supported: bool,
}

/// Chosen queue family indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for compute dispatches, copies and submission
    pub graphics: u32,
    /// Family used for presentation
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Whether graphics and present share one family
    #[must_use]
    pub fn is_unified(&self) -> bool {
        self.graphics == self.present
    }
}

/// Pick graphics and present queue families
///
/// A single family that does graphics, compute and present wins. Otherwise the
/// first graphics+compute family is paired with the first presenting family.
pub fn select_queue_families(families: &[QueueFamilyCandidate]) -> VulkanResult<QueueFamilyIndices> {
    let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;

    if let Some(index) = families
        .iter()
        .position(|f| f.flags.contains(required) && f.present_supported)
    {
        let index = index as u32;
        return Ok(QueueFamilyIndices { graphics: index, present: index });
    }

    let graphics = families
        .iter()
        .position(|f| f.flags.contains(required))
        .ok_or(VulkanError::MissingQueueFamily("graphics+compute"))?;
    let present = families
        .iter()
        .position(|f| f.present_supported)
        .ok_or(VulkanError::MissingQueueFamily("present"))?;

    Ok(QueueFamilyIndices {
        graphics: graphics as u32,
        present: present as u32,
    })
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types, used for every allocation
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Chosen queue families
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Select the first device with the queues and extensions the renderer needs
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(device_info) => {
                    log::info!("Selected GPU: {}", unsafe {
                        CStr::from_ptr(device_info.properties.device_name.as_ptr()).to_string_lossy()
                    });
                    return Ok(device_info);
                }
                Err(e) => log::debug!("Skipping physical device {:?}: {}", device, e),
            }
        }

        Err(VulkanError::InitializationFailed(
            "No suitable GPU found".to_string()
        ))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let family_properties = unsafe {
            instance.get_physical_device_queue_family_properties(device)
        };

        let mut candidates = Vec::with_capacity(family_properties.len());
        for (index, family) in family_properties.iter().enumerate() {
            let present_supported = unsafe {
                surface_loader.get_physical_device_surface_support(device, index as u32, surface)
                    .map_err(VulkanError::Api)?
            };
            candidates.push(QueueFamilyCandidate {
                flags: family.queue_flags,
                present_supported,
            });
        }
        let queue_families = select_queue_families(&candidates)?;

        let extensions = unsafe {
            instance.enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };

        let has_swapchain = extensions.iter().any(|available| {
            let extension_name = unsafe {
                CStr::from_ptr(available.extension_name.as_ptr())
            };
            extension_name == SwapchainLoader::name()
        });

        if !has_swapchain {
            return Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string()
            ));
        }

        Ok(Self {
            device,
            properties,
            memory_properties,
            queue_families,
        })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Queue used for transfers, compute dispatches and frame submission
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with required queues
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> VulkanResult<Self> {
        let families = physical_device_info.queue_families;
        let mut unique_families = vec![families.graphics];
        if !families.is_unified() {
            unique_families.push(families.present);
        }

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance.create_device(physical_device_info.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Main Vulkan context that owns all device-lifetime resources
///
/// Field order is drop order: pool and swapchain go before the device, the
/// device before the instance.
pub struct VulkanContext {
    command_pool: Option<CommandPool>,
    swapchain: Option<Swapchain>,
    device: LogicalDevice,
    physical_device: PhysicalDeviceInfo,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Create a new Vulkan context for the window
    ///
    /// The swapchain is sized to `extent` (clamped to what the surface allows)
    /// and is never recreated.
    pub fn new(
        window: &mut Window,
        app_name: &str,
        enable_validation: bool,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, app_name, enable_validation)?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window.create_vulkan_surface(instance.instance.handle())
            .map_err(|e| VulkanError::InitializationFailed(format!("Surface creation: {}", e)))?;

        let physical_device = PhysicalDeviceInfo::select_suitable_device(
            &instance.instance, surface, &surface_loader
        )?;

        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        let swapchain = Swapchain::new(
            device.device.clone(),
            device.swapchain_loader.clone(),
            surface,
            &surface_loader,
            &physical_device,
            extent,
        )?;

        let command_pool = CommandPool::new(
            device.device.clone(),
            physical_device.queue_families.graphics,
        )?;

        log::info!(
            "Vulkan context ready: {}x{} swapchain, {} images, format {:?}",
            swapchain.extent().width,
            swapchain.extent().height,
            swapchain.images().len(),
            swapchain.format(),
        );

        Ok(Self {
            command_pool: Some(command_pool),
            swapchain: Some(swapchain),
            device,
            physical_device,
            surface,
            surface_loader,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Memory types of the selected device
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical_device.memory_properties
    }

    /// Get the logical device
    pub fn device(&self) -> &LogicalDevice {
        &self.device
    }

    /// Get the raw Device handle
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    /// Get the swapchain
    pub fn swapchain(&self) -> VulkanResult<&Swapchain> {
        self.swapchain.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Swapchain already destroyed".to_string(),
        })
    }

    /// Get the command pool every command buffer is allocated from
    pub fn command_pool(&self) -> VulkanResult<&CommandPool> {
        self.command_pool.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "Command pool already destroyed".to_string(),
        })
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle() }.map_err(VulkanError::Api)
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
        }
        self.command_pool.take();
        self.swapchain.take();
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, present_supported: bool) -> QueueFamilyCandidate {
        QueueFamilyCandidate { flags, present_supported }
    }

    #[test]
    fn test_unified_family_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, false),
            family(vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];

        let indices = select_queue_families(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(indices.is_unified());
    }

    #[test]
    fn test_split_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, false),
        ];

        let indices = select_queue_families(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 0 });
        assert!(!indices.is_unified());
    }

    #[test]
    fn test_graphics_without_compute_rejected() {
        let families = [family(vk::QueueFlags::GRAPHICS, true)];

        let err = select_queue_families(&families).unwrap_err();
        assert!(matches!(err, VulkanError::MissingQueueFamily("graphics+compute")));
    }

    #[test]
    fn test_missing_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, false)];

        let err = select_queue_families(&families).unwrap_err();
        assert!(matches!(err, VulkanError::MissingQueueFamily("present")));
    }

    #[test]
    fn test_exit_codes() {
        // -4 truncates to 252
        assert_eq!(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).exit_code(), 252);
        assert_eq!(
            VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).raw_result(),
            Some(vk::Result::ERROR_DEVICE_LOST.as_raw())
        );
        assert_eq!(VulkanError::EmptyBufferList.exit_code(), 1);
        assert_eq!(VulkanError::EmptyBufferList.raw_result(), None);
        assert_eq!(VulkanError::Timeout { stage: "frame fence" }.exit_code(), 1);
    }

    #[test]
    fn test_exit_codes_survive_truncation() {
        let results = [
            vk::Result::ERROR_SURFACE_LOST_KHR,
            vk::Result::SUBOPTIMAL_KHR,
            vk::Result::ERROR_OUT_OF_DATE_KHR,
            vk::Result::ERROR_DEVICE_LOST,
            vk::Result::TIMEOUT,
            vk::Result::SUCCESS,
        ];
        for result in results {
            let code = VulkanError::Api(result).exit_code();
            assert!((1..=255).contains(&code), "{:?} exits with {}", result, code);
            assert_ne!(code & 0xFF, 0);
        }
        // A multiple of 256 must not collapse to success
        assert_eq!(vk::Result::ERROR_SURFACE_LOST_KHR.as_raw() & 0xFF, 0);
        assert_eq!(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR).exit_code(), 1);
    }
}
