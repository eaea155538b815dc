//! Response capture utilities

use crate::{Error, Result};
use bytes::{Bytes, BytesMut};

/// Buffer that captures a complete response body before it is rewritten.
///
/// Blocking rules may match anywhere in a document, so the whole body has to
/// be held in memory. The buffer refuses to grow past `max_capacity`; callers
/// then fall back to streaming the original bytes.
#[derive(Debug)]
pub struct ResponseBuffer {
    /// Captured bytes
    data: BytesMut,

    /// Maximum number of bytes to capture
    max_capacity: usize,
}

impl ResponseBuffer {
    /// Create a new response buffer
    ///
    /// # Arguments
    /// * `max_capacity` - Maximum body size that will be captured
    pub fn new(max_capacity: usize) -> Self {
        Self {
            data: BytesMut::new(),
            max_capacity,
        }
    }

    /// Append a chunk of the body
    ///
    /// On overflow the chunk is still appended so that no bytes are lost when
    /// the caller hands the captured prefix back to the client.
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.data.extend_from_slice(chunk);
        if self.data.len() > self.max_capacity {
            return Err(Error::buffer(format!(
                "body exceeds {} byte capture limit",
                self.max_capacity
            )));
        }
        Ok(())
    }

    /// Get the current buffered length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the capture limit has been exceeded
    pub fn is_overflowed(&self) -> bool {
        self.data.len() > self.max_capacity
    }

    /// Take the captured bytes as they were received
    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}
