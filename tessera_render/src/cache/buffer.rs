use crate::driver::{BufferId, BufferTarget, BufferUsage, GpuDriver};
use slotmap::{SlotMap, new_key_type};
use tracing::{trace, warn};

new_key_type! { pub struct BufferHandle; }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Element,
    Uniform,
    Instance,
}

impl BufferKind {
    pub const fn target(self) -> BufferTarget {
        match self {
            BufferKind::Vertex | BufferKind::Instance => BufferTarget::Vertex,
            BufferKind::Element => BufferTarget::Element,
            BufferKind::Uniform => BufferTarget::Uniform,
        }
    }
}

#[derive(Debug)]
pub struct GpuBuffer {
    pub id: BufferId,
    pub kind: BufferKind,
    /// Size of the last full upload in bytes.
    pub size: usize,
}

/// Raw buffer allocations of one render context.
#[derive(Debug, Default)]
pub struct BufferManager {
    buffers: SlotMap<BufferHandle, GpuBuffer>,
    uploads: u64,
}

impl BufferManager {
    pub fn create(&mut self, driver: &mut dyn GpuDriver, kind: BufferKind) -> BufferHandle {
        let id = driver.create_buffer();
        trace!("Created {kind:?} buffer {}", id.0);
        self.buffers.insert(GpuBuffer { id, kind, size: 0 })
    }

    /// Creates a buffer and gives it `size` zeroed bytes of storage.
    pub fn create_sized(
        &mut self,
        driver: &mut dyn GpuDriver,
        kind: BufferKind,
        size: usize,
        usage: BufferUsage,
    ) -> BufferHandle {
        let handle = self.create(driver, kind);
        self.upload(driver, handle, &vec![0; size], usage);
        handle
    }

    /// Replaces the whole buffer contents. Returns `false` for stale handles.
    pub fn upload(
        &mut self,
        driver: &mut dyn GpuDriver,
        handle: BufferHandle,
        data: &[u8],
        usage: BufferUsage,
    ) -> bool {
        let Some(buffer) = self.buffers.get_mut(handle) else {
            return false;
        };
        driver.buffer_data(buffer.id, buffer.kind.target(), data, usage);
        buffer.size = data.len();
        self.uploads += 1;
        true
    }

    /// Writes `data` at `offset` without reallocating. Writes past the end are dropped.
    pub fn upload_range(
        &mut self,
        driver: &mut dyn GpuDriver,
        handle: BufferHandle,
        offset: usize,
        data: &[u8],
    ) -> bool {
        let Some(buffer) = self.buffers.get(handle) else {
            return false;
        };
        if offset + data.len() > buffer.size {
            warn!(
                "Dropped write of {} bytes at {offset} into a {} byte buffer",
                data.len(),
                buffer.size
            );
            return false;
        }
        driver.buffer_sub_data(buffer.id, buffer.kind.target(), offset, data);
        true
    }

    pub fn bind_base(&self, driver: &mut dyn GpuDriver, handle: BufferHandle, binding: u32) {
        if let Some(buffer) = self.buffers.get(handle) {
            driver.bind_buffer_base(buffer.id, binding);
        }
    }

    pub fn destroy(&mut self, driver: &mut dyn GpuDriver, handle: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(handle) {
            trace!("Deleted {:?} buffer {}", buffer.kind, buffer.id.0);
            driver.delete_buffer(buffer.id);
        }
    }

    pub fn get(&self, handle: BufferHandle) -> Option<&GpuBuffer> {
        self.buffers.get(handle)
    }

    pub fn live(&self) -> usize {
        self.buffers.len()
    }

    /// Number of full uploads since creation.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn clear(&mut self, driver: &mut dyn GpuDriver) {
        for (_, buffer) in self.buffers.drain() {
            driver.delete_buffer(buffer.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{DriverCall, RecordingDriver};

    #[test]
    fn live_count_follows_create_and_destroy() {
        let (mut driver, log) = RecordingDriver::new();
        let mut buffers = BufferManager::default();

        let a = buffers.create(&mut driver, BufferKind::Vertex);
        let b = buffers.create(&mut driver, BufferKind::Uniform);
        assert_eq!(buffers.live(), 2);

        buffers.destroy(&mut driver, a);
        buffers.destroy(&mut driver, a);
        assert_eq!(buffers.live(), 1);
        assert!(buffers.get(b).is_some());
        assert_eq!(
            log.lock()
                .count(|c| matches!(c, DriverCall::DeleteBuffer(_))),
            1
        );
    }

    #[test]
    fn range_upload_stays_inside_buffer() {
        let (mut driver, _log) = RecordingDriver::new();
        let mut buffers = BufferManager::default();
        let ubo = buffers.create_sized(&mut driver, BufferKind::Uniform, 64, BufferUsage::Dynamic);

        assert!(buffers.upload_range(&mut driver, ubo, 48, &[0; 16]));
        assert!(!buffers.upload_range(&mut driver, ubo, 56, &[0; 16]));
        assert_eq!(buffers.uploads(), 1);
    }
}
