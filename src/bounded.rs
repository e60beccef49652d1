use std::io::{Read, Write};

/// Recommended chunk size for stream-to-stream copies.
pub(crate) const STREAM_BUFFER_SIZE: usize = 1024;

/// Which endpoint of a copy failed.
#[derive(Debug)]
pub(crate) enum CopyError {
    Read(std::io::Error),
    Write(std::io::Error),
}

/// Copies bytes between a source and a sink in fixed-size chunks.
///
/// Total memory use is bounded by the buffer size regardless of how much
/// data flows through, which is what lets multi-gigabyte payloads move
/// without ballooning the process.
pub(crate) struct BoundedCopier {
    buffer: Vec<u8>,
}

impl BoundedCopier {
    pub(crate) fn new() -> Self {
        Self::with_buffer_size(STREAM_BUFFER_SIZE)
    }

    pub(crate) fn with_buffer_size(size: usize) -> Self {
        assert!(size > 0, "copy buffer must be non-empty");
        Self {
            buffer: vec![0; size],
        }
    }

    /// Drains `source` into `sink`, returning the number of bytes moved.
    ///
    /// The loop ends when the source is exhausted, or when an iteration
    /// makes no progress on either endpoint: a stalled stream must break
    /// the loop rather than spin.
    pub(crate) fn copy(
        &mut self,
        source: &mut dyn Read,
        sink: &mut dyn Write,
    ) -> Result<u64, CopyError> {
        let mut total = 0u64;
        loop {
            let read = match source.read(&mut self.buffer) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CopyError::Read(e)),
            };
            if read == 0 {
                break;
            }
            let mut written = 0;
            while written < read {
                match sink.write(&self.buffer[written..read]) {
                    Ok(0) => {
                        // Sink refuses further bytes; treat as a stall.
                        return Ok(total + written as u64);
                    }
                    Ok(n) => written += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(CopyError::Write(e)),
                }
            }
            total += read as u64;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn copies_payloads_larger_than_the_buffer() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut source = Cursor::new(payload.clone());
        let mut sink = Vec::new();
        let moved = BoundedCopier::with_buffer_size(64)
            .copy(&mut source, &mut sink)
            .unwrap();
        assert_eq!(moved, payload.len() as u64);
        assert_eq!(sink, payload);
    }

    #[test]
    fn empty_source_moves_nothing() {
        let mut sink = Vec::new();
        let moved = BoundedCopier::new()
            .copy(&mut Cursor::new(Vec::new()), &mut sink)
            .unwrap();
        assert_eq!(moved, 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn stalled_sink_breaks_the_loop() {
        struct FullSink;
        impl Write for FullSink {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let moved = BoundedCopier::with_buffer_size(8)
            .copy(&mut Cursor::new(vec![1u8; 64]), &mut FullSink)
            .unwrap();
        assert_eq!(moved, 0);
    }

    #[test]
    fn failing_endpoints_are_told_apart() {
        struct BadReader;
        impl Read for BadReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("boom"))
            }
        }
        let err = BoundedCopier::new()
            .copy(&mut BadReader, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, CopyError::Read(_)));

        struct BadWriter;
        impl Write for BadWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("boom"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let err = BoundedCopier::new()
            .copy(&mut Cursor::new(vec![1u8; 8]), &mut BadWriter)
            .unwrap_err();
        assert!(matches!(err, CopyError::Write(_)));
    }
}
