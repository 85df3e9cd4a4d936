/// Output boundaries
/// Guest output is bounded inside the worker before it ever reaches the wire;
/// worker streams are bounded again on the controller side.
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Appended once when guest output hits the cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Whether a captured stream is complete
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputIntegrity {
    Complete,
    Truncated,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::Truncated => write!(f, "truncated"),
        }
    }
}

/// Size-bounded text sink behind the guest's `print`.
#[derive(Debug)]
pub struct OutputBuffer {
    text: String,
    limit: usize,
    integrity: OutputIntegrity,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            integrity: OutputIntegrity::Complete,
        }
    }

    /// Append, keeping at most `limit` bytes and never splitting a character.
    /// Returns false once the buffer is full.
    pub fn push(&mut self, chunk: &str) -> bool {
        if self.integrity == OutputIntegrity::Truncated {
            return false;
        }
        let room = self.limit.saturating_sub(self.text.len());
        if chunk.len() <= room {
            self.text.push_str(chunk);
            return true;
        }
        let mut cut = room;
        while !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&chunk[..cut]);
        self.integrity = OutputIntegrity::Truncated;
        log::debug!("guest output truncated at {} bytes", self.limit);
        false
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn integrity(&self) -> OutputIntegrity {
        self.integrity
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Final text, with the truncation marker when anything was dropped.
    pub fn finish(self) -> String {
        match self.integrity {
            OutputIntegrity::Complete => self.text,
            OutputIntegrity::Truncated => self.text + TRUNCATION_MARKER,
        }
    }
}

/// Read a whole stream, keeping the first `limit` bytes and draining the rest
/// so the writer never blocks on a full pipe.
pub async fn collect_bounded<R>(mut stream: R, limit: usize) -> std::io::Result<(Vec<u8>, OutputIntegrity)>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut integrity = OutputIntegrity::Complete;

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(buffer.len());
        if n > room {
            buffer.extend_from_slice(&chunk[..room]);
            integrity = OutputIntegrity::Truncated;
        } else {
            buffer.extend_from_slice(&chunk[..n]);
        }
    }

    Ok((buffer, integrity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_truncates_on_char_boundary() {
        let mut out = OutputBuffer::new(5);
        assert!(out.push("ab"));
        assert!(!out.push("cdé"));
        assert_eq!(out.as_str(), "abcd");
        assert_eq!(out.integrity(), OutputIntegrity::Truncated);
        assert!(!out.push("more"));
        assert_eq!(out.finish(), format!("abcd{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_exact_fit_is_complete() {
        let mut out = OutputBuffer::new(3);
        assert!(out.push("abc"));
        assert_eq!(out.integrity(), OutputIntegrity::Complete);
        assert_eq!(out.finish(), "abc");
    }

    #[test]
    fn test_output_integrity_display() {
        assert_eq!(format!("{}", OutputIntegrity::Complete), "complete");
        assert_eq!(format!("{}", OutputIntegrity::Truncated), "truncated");
    }

    #[tokio::test]
    async fn test_collect_bounded_drains_past_limit() {
        let data = vec![b'x'; 10_000];
        let (kept, integrity) = collect_bounded(&data[..], 100).await.unwrap();
        assert_eq!(kept.len(), 100);
        assert_eq!(integrity, OutputIntegrity::Truncated);
    }
}
