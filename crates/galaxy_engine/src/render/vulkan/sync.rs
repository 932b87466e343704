//! Synchronization primitives
//!
//! Semaphores, fences with bounded waits, and the whole-buffer barriers the
//! compute passes are chained with.

use ash::{vk, Device};
use crate::core::config::FenceTimeoutPolicy;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Whole-buffer memory barriers for compute-to-compute hazards
///
/// All barriers cover the full buffer and leave queue ownership untouched.
pub struct BufferBarrierBuilder;

impl BufferBarrierBuilder {
    fn whole_buffer(
        buffer: vk::Buffer,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    ) -> vk::BufferMemoryBarrier {
        vk::BufferMemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build()
    }

    /// Shader write → shader read (read-after-write)
    pub fn shader_write_to_read(buffer: vk::Buffer) -> vk::BufferMemoryBarrier {
        Self::whole_buffer(buffer, vk::AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_READ)
    }

    /// Shader write → shader write (write-after-write)
    pub fn shader_write_to_write(buffer: vk::Buffer) -> vk::BufferMemoryBarrier {
        Self::whole_buffer(buffer, vk::AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE)
    }
}

/// Semaphore wrapper with RAII cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device.create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Result of one bounded fence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    /// The fence is signaled
    Signaled,
    /// The timeout elapsed first
    TimedOut,
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device.create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Wait up to `timeout_ns`, reporting a timeout as a value rather than an error
    pub fn poll(&self, timeout_ns: u64) -> VulkanResult<FenceWait> {
        match unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ns) } {
            Ok(()) => Ok(FenceWait::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceWait::TimedOut),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Reset fence
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Wait once under a timeout policy
///
/// `Warn` logs the timeout and carries on as if the wait had completed;
/// `Fatal` turns it into [`VulkanError::Timeout`].
pub fn wait_once<F>(poll: F, policy: FenceTimeoutPolicy, stage: &'static str) -> VulkanResult<FenceWait>
where
    F: FnOnce() -> VulkanResult<FenceWait>,
{
    match poll()? {
        FenceWait::Signaled => Ok(FenceWait::Signaled),
        FenceWait::TimedOut => match policy {
            FenceTimeoutPolicy::Warn => {
                log::warn!("Timed out waiting for {}, continuing", stage);
                Ok(FenceWait::TimedOut)
            }
            FenceTimeoutPolicy::Fatal => Err(VulkanError::Timeout { stage }),
        },
    }
}

/// Keep polling until signaled
///
/// Each timed-out poll is logged. With a `limit`, giving up after that many
/// timed-out polls is a [`VulkanError::Timeout`]. Returns the number of
/// timed-out polls before the fence signaled.
pub fn wait_until_signaled<F>(mut poll: F, limit: Option<u32>, stage: &'static str) -> VulkanResult<u32>
where
    F: FnMut() -> VulkanResult<FenceWait>,
{
    let mut timeouts = 0_u32;
    loop {
        match poll()? {
            FenceWait::Signaled => return Ok(timeouts),
            FenceWait::TimedOut => {
                timeouts += 1;
                log::warn!("Still waiting for {} ({} timeouts)", stage, timeouts);
                if limit.is_some_and(|limit| timeouts >= limit) {
                    return Err(VulkanError::Timeout { stage });
                }
            }
        }
    }
}
