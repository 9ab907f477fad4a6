//! Zeroization utilities for secure memory handling.

use zeroize::ZeroizeOnDrop;

/// A secure buffer that automatically zeroizes on drop
///
/// Holds the memory secret for the lifetime of an unlocked session. There
/// is no way to move the bytes out; borrow them with [`SecureBuffer::as_bytes`].
#[derive(ZeroizeOnDrop)]
pub struct SecureBuffer {
    data: Vec<u8>,
}

impl SecureBuffer {
    /// Create a new secure buffer from data
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Get the length of the buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a reference to the inner data (use carefully!)
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<&[u8]> for SecureBuffer {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

impl From<String> for SecureBuffer {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl std::fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureBuffer({} bytes)", self.data.len())
    }
}
