use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use rtp_midi_core::LocalMidiSink;

#[derive(Default)]
struct Buffers {
    written: Vec<u8>,
    input: VecDeque<Vec<u8>>,
}

/// In-memory sink. Clones share the same buffers, so a test can keep one
/// handle while the engine owns another.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Buffers>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Queues bytes to be returned by the next `read_raw`, as if a device produced them.
    pub fn push_input(&self, bytes: &[u8]) {
        self.lock().input.push_back(bytes.to_vec());
    }
}

impl LocalMidiSink for MemorySink {
    fn available(&self) -> bool {
        true
    }

    fn write_raw(&mut self, bytes: &[u8]) -> rtp_midi_core::Result<()> {
        self.lock().written.extend_from_slice(bytes);
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> rtp_midi_core::Result<usize> {
        let Some(chunk) = self.lock().input.pop_front() else {
            return Ok(0);
        };
        let len = chunk.len().min(buf.len());
        buf[..len].copy_from_slice(&chunk[..len]);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_buffers() {
        let sink = MemorySink::new();
        let mut engine_side = sink.clone();
        engine_side.write_raw(&[0xF8]).unwrap();
        assert_eq!(sink.written(), vec![0xF8]);

        sink.push_input(&[0x90, 1, 2]);
        let mut buf = [0u8; 8];
        assert_eq!(engine_side.read_raw(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[0x90, 1, 2]);
        assert_eq!(engine_side.read_raw(&mut buf).unwrap(), 0);
    }
}
