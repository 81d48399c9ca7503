//! Monotonic fences
//!
//! `signal` always produces a value strictly greater than every earlier one.
//! `wait` blocks the CPU until the GPU reaches a value; a wait that runs past
//! the timeout means the device is lost.

use std::time::Duration;

use crate::backend::GpuBackend;
use crate::error::{GraphicsError, GraphicsResult};
use crate::gpu::command::QueueType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub u64);

#[derive(Debug)]
pub struct Fence {
    handle: FenceHandle,
    value: u64,
    timeout: Duration,
}

impl Fence {
    pub fn new(backend: &mut dyn GpuBackend, timeout: Duration) -> GraphicsResult<Self> {
        let handle = backend.create_fence()?;
        Ok(Self {
            handle,
            value: 0,
            timeout,
        })
    }

    /// Enqueue a signal of the next value on `queue` and return it
    pub fn signal(&mut self, backend: &mut dyn GpuBackend, queue: QueueType) -> GraphicsResult<u64> {
        let next = self.value + 1;
        backend.signal(queue, self.handle, next)?;
        self.value = next;
        Ok(next)
    }

    /// Last value the GPU has reached
    pub fn completed(&self, backend: &mut dyn GpuBackend) -> u64 {
        backend.completed_value(self.handle)
    }

    /// Block until the GPU reaches `value`
    pub fn wait(&self, backend: &mut dyn GpuBackend, value: u64) -> GraphicsResult<()> {
        if backend.completed_value(self.handle) >= value {
            return Ok(());
        }
        if backend.wait(self.handle, value, self.timeout)? {
            return Ok(());
        }

        log::error!(
            "[Fence::wait] Value {} not reached after {:?}, device lost",
            value,
            self.timeout
        );
        Err(GraphicsError::DeviceLost {
            value,
            timeout_ms: self.timeout.as_millis() as u64,
        })
    }

    /// Last signaled value
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn handle(&self) -> FenceHandle {
        self.handle
    }
}
