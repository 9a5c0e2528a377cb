//! One-shot command submission for uploads and copies

use ash::vk;

use crate::backend::{GpuDevice, QueueType, SubmitBatch, VulkanResult};
use crate::commands::CommandBuffer;

/// Record commands into a fresh primary buffer, submit them on `queue` and
/// block until they have executed.
///
/// The buffer and its fence are released on every path.
pub fn submit_single_use<F>(
    device: &dyn GpuDevice,
    pool: vk::CommandPool,
    queue: QueueType,
    record: F,
) -> VulkanResult<()>
where
    F: FnOnce(&mut CommandBuffer) -> VulkanResult<()>,
{
    let mut command_buffer = CommandBuffer::allocate(device, pool, vk::CommandBufferLevel::PRIMARY)?;
    let result = record_and_submit(device, &mut command_buffer, queue, record);
    command_buffer.free(device);
    result
}

fn record_and_submit<F>(
    device: &dyn GpuDevice,
    command_buffer: &mut CommandBuffer,
    queue: QueueType,
    record: F,
) -> VulkanResult<()>
where
    F: FnOnce(&mut CommandBuffer) -> VulkanResult<()>,
{
    command_buffer.begin_primary(device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    record(command_buffer)?;
    command_buffer.end(device)?;

    let fence = device.create_fence(false)?;
    let buffers = [command_buffer.handle()];
    let batch = SubmitBatch {
        command_buffers: &buffers,
        ..SubmitBatch::default()
    };
    let submitted = device
        .queue_submit(queue, &[batch], fence)
        .and_then(|()| device.wait_for_fences(&[fence], u64::MAX));
    device.destroy_fence(fence);
    submitted?;
    command_buffer.mark_submitted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceCall, HeadlessDevice, ObjectKind};
    use crate::backend::VulkanError;

    #[test]
    fn submits_waits_and_frees() {
        let device = HeadlessDevice::new();
        let pool = device
            .create_command_pool(QueueType::Transfer, vk::CommandPoolCreateFlags::TRANSIENT)
            .unwrap();
        submit_single_use(&device, pool, QueueType::Transfer, |cb| cb.dispatch(&device, 1, 1, 1)).unwrap();

        assert!(device
            .calls()
            .iter()
            .any(|call| matches!(call, DeviceCall::Submit { queue: QueueType::Transfer, .. })));
        assert_eq!(device.live_count(ObjectKind::CommandBuffer), 0);
        assert_eq!(device.live_count(ObjectKind::Fence), 0);
    }

    #[test]
    fn recording_failure_still_frees_buffer() {
        let device = HeadlessDevice::new();
        let pool = device
            .create_command_pool(QueueType::Graphics, vk::CommandPoolCreateFlags::TRANSIENT)
            .unwrap();
        let result = submit_single_use(&device, pool, QueueType::Graphics, |_| Err(VulkanError::invalid("boom")));
        assert!(result.is_err());
        assert_eq!(device.live_count(ObjectKind::CommandBuffer), 0);
    }
}
