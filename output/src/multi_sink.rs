use log::warn;

use rtp_midi_core::{LocalMidiSink, Result};

/// Several local sinks behind one. Inbound MIDI goes to every member that
/// takes output; local input is read from the members in order.
pub struct MultiSink {
    sinks: Vec<Box<dyn LocalMidiSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Box<dyn LocalMidiSink>>) -> Self {
        Self { sinks }
    }
}

impl LocalMidiSink for MultiSink {
    fn available(&self) -> bool {
        self.sinks.iter().any(|s| s.available())
    }

    /// A failing member does not stop the others; the first error is returned.
    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let mut first_error = None;
        for sink in self.sinks.iter_mut().filter(|s| s.available()) {
            if let Err(e) = sink.write_raw(bytes) {
                if first_error.is_some() {
                    warn!("Local sink write failed: {}", e);
                } else {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        for sink in &mut self.sinks {
            let len = sink.read_raw(buf)?;
            if len > 0 {
                return Ok(len);
            }
        }
        Ok(0)
    }
}
