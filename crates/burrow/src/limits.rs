//! Output limits for shell and guest execution

use serde::{Deserialize, Serialize};

/// Per-stream byte ceilings for captured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputLimits {
    /// Maximum bytes kept from stdout
    #[serde(alias = "maxStdoutBytes")]
    pub max_stdout_bytes: usize,
    /// Maximum bytes kept from stderr
    #[serde(alias = "maxStderrBytes")]
    pub max_stderr_bytes: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_stdout_bytes: 1024 * 1024, // 1 MB
            max_stderr_bytes: 1024 * 1024, // 1 MB
        }
    }
}

impl OutputLimits {
    /// Same ceiling for both streams.
    pub fn uniform(max_bytes: usize) -> Self {
        Self {
            max_stdout_bytes: max_bytes,
            max_stderr_bytes: max_bytes,
        }
    }

    /// Fresh buffers sized for these limits, `(stdout, stderr)`.
    pub fn buffers(&self) -> (LimitedBuffer, LimitedBuffer) {
        (
            LimitedBuffer::new(self.max_stdout_bytes),
            LimitedBuffer::new(self.max_stderr_bytes),
        )
    }
}

/// Buffer that silently drops bytes past its limit.
///
/// Once anything has been dropped the buffer stays truncated; later writes
/// never grow it past the limit.
#[derive(Debug, Clone, Default)]
pub struct LimitedBuffer {
    buffer: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl LimitedBuffer {
    /// Create an empty buffer holding at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append as much of `data` as fits. Always reports the full length as
    /// consumed so writers keep going.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let remaining = self.limit.saturating_sub(self.buffer.len());
        let to_write = data.len().min(remaining);
        self.buffer.extend_from_slice(&data[..to_write]);
        if to_write < data.len() {
            self.truncated = true;
        }
        data.len()
    }

    /// Consume the buffer, returning the kept bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Whether any bytes have been dropped.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Kept bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Configured ceiling.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl std::io::Write for LimitedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(LimitedBuffer::write(self, buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
