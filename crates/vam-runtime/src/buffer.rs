//! Shared host buffers bound to node ports

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// Host buffer of 32-bit items shared between the caller and the runtime
///
/// Cloning shares the storage. A stream worker locks the buffer for the
/// duration of one transfer.
#[derive(Clone, Default)]
pub struct IoBuffer {
    data: Arc<Mutex<Vec<i32>>>,
}

impl IoBuffer {
    pub fn from_vec(data: Vec<i32>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Zero-filled buffer of `len` items
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Item count
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents
    pub fn to_vec(&self) -> Vec<i32> {
        self.data.lock().clone()
    }

    /// Replace the contents
    pub fn replace(&self, data: Vec<i32>) {
        *self.data.lock() = data;
    }

    /// Exclusive access to the items
    pub fn lock(&self) -> MutexGuard<'_, Vec<i32>> {
        self.data.lock()
    }

    /// Whether both handles share one storage
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl From<Vec<i32>> for IoBuffer {
    fn from(data: Vec<i32>) -> Self {
        Self::from_vec(data)
    }
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.try_lock() {
            Some(data) => f.debug_struct("IoBuffer").field("len", &data.len()).finish(),
            None => f.debug_struct("IoBuffer").field("len", &"<in transfer>").finish(),
        }
    }
}
