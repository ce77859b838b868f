//! Vulkan context management
//!
//! Instance creation, physical device selection, logical device and queue
//! setup, and the shared command pool. The context is created once at
//! startup, lent (never shared-ownership) to the compute and presentation
//! stages, and destroyed last, strictly in reverse of construction, which
//! the field declaration order of [`VulkanContext`] encodes.

use ash::extensions::khr::{Surface as SurfaceLoader, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::ffi::{CStr, CString};
use thiserror::Error;

#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;

use crate::render::vulkan::commands::CommandPool;
use crate::render::vulkan::window::{WindowError, WindowSystem};

/// Vulkan-specific error types
///
/// Initialization failures (device selection, logical device creation,
/// surface/swapchain creation, shader load) and submission rejections are
/// all fatal in this design: they propagate to the top level, no local
/// recovery is attempted.
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// No enumerated accelerator satisfies the capability bar
    #[error("no suitable GPU found (compute queue + swapchain support required)")]
    NoSuitableDevice,

    /// The driver rejected logical device creation
    #[error("logical device creation failed: {0:?}")]
    DeviceCreation(vk::Result),

    /// No memory type matches the requested mask and property flags
    #[error("no suitable memory type found")]
    NoMemoryType,

    /// The compute program artifact is missing or malformed
    #[error("shader load failed: {0}")]
    ShaderLoad(String),

    /// A queue submit or present call was rejected by the driver
    #[error("queue submission rejected: {0:?}")]
    Submission(vk::Result),

    /// Context or stage initialization failed
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Window system failure during startup
    #[error("window system error: {0}")]
    Window(#[from] WindowError),
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
    debug_utils: Option<DebugUtils>,
    /// Debug messenger handle (debug builds)
    #[cfg(debug_assertions)]
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance with the platform surface extensions.
    pub fn new(window_system: &WindowSystem, app_name: &str) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::Initialization(format!("failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| VulkanError::Initialization("invalid application name".to_string()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&app_name_cstr)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let required_extensions = window_system.required_instance_extensions()?;
        let cstr_extensions: Vec<CString> = required_extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()).expect("extension names contain no NUL"))
            .collect();

        #[allow(unused_mut)]
        let mut extensions: Vec<*const i8> =
            cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        #[cfg(debug_assertions)]
        extensions.push(DebugUtils::name().as_ptr());

        let layer_names: Vec<CString> = if cfg!(debug_assertions) {
            vec![CString::new("VK_LAYER_KHRONOS_validation").expect("static layer name")]
        } else {
            vec![]
        };
        let layer_names_ptrs: Vec<*const i8> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        #[cfg(debug_assertions)]
        let (debug_utils, debug_messenger) = {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let debug_messenger = Self::setup_debug_messenger(&debug_utils)?;
            (Some(debug_utils), Some(debug_messenger))
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
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let (Some(debug_utils), Some(debug_messenger)) =
                (&self.debug_utils, &self.debug_messenger)
            {
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
    } else {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Capability summary for one enumerated accelerator, fed to [`pick_device`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeviceCandidate {
    pub device_type: vk::PhysicalDeviceType,
    pub has_compute_queue: bool,
    pub has_swapchain_ext: bool,
}

/// Select a device index: first qualifying discrete unit, else the first
/// qualifying device of any type (integrated fallback). A device qualifies
/// iff it has a compute-capable queue family and the swapchain extension.
pub(crate) fn pick_device(candidates: &[DeviceCandidate]) -> Option<usize> {
    let qualifies =
        |c: &DeviceCandidate| c.has_compute_queue && c.has_swapchain_ext;

    candidates
        .iter()
        .position(|c| qualifies(c) && c.device_type == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| candidates.iter().position(qualifies))
}

/// Linear scan of the reported memory types: first index whose bit is set in
/// `type_mask` and whose property flags cover `required`.
pub(crate) fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_mask: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        (type_mask & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Selected physical device and its capability data
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Reported memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the compute-capable queue family
    pub compute_family: u32,
    /// Index of the presentation queue family (same as compute here)
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Select the first accelerator with a compute queue family and swapchain
    /// support, preferring a discrete unit over an integrated one.
    pub fn select(instance: &Instance) -> VulkanResult<Self> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };
        if devices.is_empty() {
            return Err(VulkanError::NoSuitableDevice);
        }

        let candidates: Vec<DeviceCandidate> = devices
            .iter()
            .map(|&device| Self::evaluate(instance, device))
            .collect::<VulkanResult<_>>()?;

        let index = pick_device(&candidates).ok_or(VulkanError::NoSuitableDevice)?;
        let device = devices[index];

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        let compute_family = queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .map(|i| i as u32)
            .ok_or(VulkanError::NoSuitableDevice)?;

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy() }
            .into_owned();
        if candidates[index].device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            log::info!("Selected GPU: {}", name);
        } else {
            log::info!("Selected GPU (integrated fallback): {}", name);
        }

        Ok(Self {
            device,
            properties,
            memory_properties,
            compute_family,
            // The presentation queue comes from the same family; a separate
            // present-only family is not requested in this design.
            present_family: compute_family,
        })
    }

    fn evaluate(instance: &Instance, device: vk::PhysicalDevice) -> VulkanResult<DeviceCandidate> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };

        let has_compute_queue = queue_families
            .iter()
            .any(|family| family.queue_flags.contains(vk::QueueFlags::COMPUTE));

        let has_swapchain_ext = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });

        Ok(DeviceCandidate {
            device_type: properties.device_type,
            has_compute_queue,
            has_swapchain_ext,
        })
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Compute work queue
    pub compute_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Index of the compute queue family
    pub compute_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a new logical device with one queue per unique family.
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let unique_families: std::collections::HashSet<u32> =
            [physical.compute_family, physical.present_family]
                .iter()
                .copied()
                .collect();

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&[1.0])
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
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::DeviceCreation)?
        };

        let compute_queue = unsafe { device.get_device_queue(physical.compute_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            compute_queue,
            present_queue,
            compute_family: physical.compute_family,
            present_family: physical.present_family,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            // Nothing may still be executing when the device goes away.
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Main Vulkan context that owns the core device resources.
///
/// Field order is teardown order: command pool, then logical device, then
/// instance (which also tears down the debug hooks).
pub struct VulkanContext {
    /// Shared command pool bound to the compute family
    pub command_pool: CommandPool,
    /// Logical device and queues
    pub device: LogicalDevice,
    /// Selected physical device information
    pub physical_device: PhysicalDeviceInfo,
    /// Vulkan instance and debug utilities
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Create the context: instance, device selection, logical device, and
    /// the shared command pool.
    pub fn new(window_system: &WindowSystem, app_name: &str) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window_system, app_name)?;
        let physical_device = PhysicalDeviceInfo::select(&instance.instance)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;
        let command_pool = CommandPool::new(device.device.clone(), device.compute_family)?;

        log::info!("Vulkan context initialized");
        Ok(Self {
            command_pool,
            device,
            physical_device,
            instance,
        })
    }

    /// Get a clone of the raw device handle (shared function table).
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the compute queue
    pub fn compute_queue(&self) -> vk::Queue {
        self.device.compute_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Get the surface extension loader for this instance
    pub fn surface_loader(&self) -> SurfaceLoader {
        SurfaceLoader::new(&self.instance.entry, &self.instance.instance)
    }

    /// First memory type index matching `type_mask` with all `required`
    /// property flags set.
    pub fn find_memory_type(
        &self,
        type_mask: u32,
        required: vk::MemoryPropertyFlags,
    ) -> VulkanResult<u32> {
        find_memory_type_index(&self.physical_device.memory_properties, type_mask, required)
            .ok_or(VulkanError::NoMemoryType)
    }

    /// Block until the device is fully idle.
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .device
                .device_wait_idle()
                .map_err(VulkanError::Api)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        device_type: vk::PhysicalDeviceType,
        has_compute_queue: bool,
        has_swapchain_ext: bool,
    ) -> DeviceCandidate {
        DeviceCandidate {
            device_type,
            has_compute_queue,
            has_swapchain_ext,
        }
    }

    #[test]
    fn test_pick_device_prefers_discrete() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true, true),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, true, true),
        ];
        assert_eq!(pick_device(&candidates), Some(1));
    }

    #[test]
    fn test_pick_device_integrated_fallback() {
        // Zero discrete accelerators: the integrated one meeting the
        // capability bar is selected without error.
        let candidates = [
            candidate(vk::PhysicalDeviceType::CPU, true, true),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true, true),
        ];
        assert_eq!(pick_device(&candidates), Some(0));
    }

    #[test]
    fn test_pick_device_requires_capability_bar() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, true, false),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, false, true),
        ];
        assert_eq!(pick_device(&candidates), None);
        assert_eq!(pick_device(&[]), None);
    }

    #[test]
    fn test_pick_device_discrete_without_capability_skipped() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, false, false),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, true, true),
        ];
        assert_eq!(pick_device(&candidates), Some(1));
    }

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = property_flags;
        }
        props
    }

    #[test]
    fn test_find_memory_type_first_match() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        assert_eq!(
            find_memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
    }

    #[test]
    fn test_find_memory_type_honors_mask() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        // Bit 0 excluded by the mask; bit 1 matches.
        assert_eq!(
            find_memory_type_index(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
    }

    #[test]
    fn test_find_memory_type_requires_superset() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        assert_eq!(
            find_memory_type_index(
                &props,
                0b1,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            ),
            None
        );
    }
}
