use crate::device::{ContextHandle, DeviceApi, DeviceInfo, QueueHandle};
use crate::error::{MemError, MemResult};
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

/// Callback receiving errors the memory layer cannot return to a caller, such as release
/// failures during teardown.
pub type ErrorObserver = Arc<dyn Fn(&MemError) + Send + Sync>;

// ===============================================================================================
// Context Structures
// ===============================================================================================

/// The device-side collaborators a memory object needs: the device API, the context its
/// allocations live in, the command queues it may enqueue on, and the device descriptor.
///
/// Shared between every memory object created on the same device.
pub struct DeviceContext {
    api: Arc<dyn DeviceApi>,
    handle: ContextHandle,
    queues: Vec<QueueHandle>,
    info: DeviceInfo,
    observer: Option<ErrorObserver>,
}

impl DeviceContext {
    /// # Errors
    /// Returns [`MemError::NoCommandQueues`] if `queues` is empty.
    pub fn new(
        api: Arc<dyn DeviceApi>,
        handle: ContextHandle,
        queues: Vec<QueueHandle>,
        info: DeviceInfo,
    ) -> MemResult<Self> {
        if queues.is_empty() {
            return Err(MemError::NoCommandQueues);
        }

        Ok(Self {
            api,
            handle,
            queues,
            info,
            observer: None,
        })
    }

    #[must_use]
    pub fn with_error_observer(mut self, observer: ErrorObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn api(&self) -> &Arc<dyn DeviceApi> {
        &self.api
    }

    #[must_use]
    pub const fn handle(&self) -> ContextHandle {
        self.handle
    }

    #[must_use]
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// The queue at `index`, falling back to queue 0 when the index is out of range.
    #[must_use]
    pub fn queue(&self, index: usize) -> QueueHandle {
        if let Some(queue) = self.queues.get(index) {
            return *queue;
        }
        warn!(
            index,
            available = self.queues.len(),
            "invalid command queue index, defaulting to 0"
        );
        self.queues[0]
    }

    /// Maps block only when there is a single queue. With several queues the caller pipelines
    /// work and orders it through the queues themselves.
    #[must_use]
    pub fn blocking_map(&self) -> bool {
        self.queues.len() == 1
    }

    /// Log `err` and hand it to the observer, if one is installed.
    pub fn report(&self, err: &MemError) {
        error!(error = %err, "device memory error");
        if let Some(observer) = &self.observer {
            observer(err);
        }
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("handle", &self.handle)
            .field("queues", &self.queues)
            .field("info", &self.info)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}
