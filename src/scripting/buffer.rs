/// `scripting/buffer.rs` - the single staging buffer for script text
///
/// Uploads and store read-backs both need one capacity-sized region. The pool
/// hands out at most one `ScriptBuffer` at a time; dropping the guard gives
/// the slot back, so every exit path releases it exactly once.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug)]
pub struct ScriptBufferPool {
    capacity: usize,
    in_use: Arc<AtomicBool>,
}

impl ScriptBufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Reserve the full capacity up front. Fails with `BufferInUse` while an
    /// earlier buffer is still alive, leaving that buffer untouched.
    pub fn allocate(&self) -> BridgeResult<ScriptBuffer> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::BufferInUse);
        }

        let mut data = Vec::new();
        if data.try_reserve_exact(self.capacity).is_err() {
            self.in_use.store(false, Ordering::Release);
            log::warn!("[buffer] allocation of {} bytes refused", self.capacity);
            return Err(BridgeError::OutOfMemory);
        }
        log::debug!("[buffer] allocated {} bytes", self.capacity);

        Ok(ScriptBuffer {
            data,
            capacity: self.capacity,
            in_use: Arc::clone(&self.in_use),
        })
    }
}

pub struct ScriptBuffer {
    data: Vec<u8>,
    capacity: usize,
    in_use: Arc<AtomicBool>,
}

impl ScriptBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Append a chunk. A chunk that would not fit is refused whole.
    pub fn append(&mut self, bytes: &[u8]) -> BridgeResult<()> {
        if self.data.len() + bytes.len() > self.capacity {
            return Err(BridgeError::BufferOverflow {
                len: self.data.len(),
                incoming: bytes.len(),
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Let `fill` write into the whole capacity and keep the first `n` bytes
    /// it reports. On error the buffer is left empty.
    pub fn fill_from<E>(
        &mut self,
        fill: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        self.data.clear();
        self.data.resize(self.capacity, 0);
        match fill(&mut self.data) {
            Ok(n) => {
                self.data.truncate(n.min(self.capacity));
                Ok(self.data.len())
            }
            Err(e) => {
                self.data.clear();
                Err(e)
            }
        }
    }
}

impl Drop for ScriptBuffer {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::Release);
        log::debug!("[buffer] released");
    }
}

impl std::fmt::Debug for ScriptBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptBuffer")
            .field("len", &self.data.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
