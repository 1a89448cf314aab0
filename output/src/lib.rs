//! Lokální MIDI výstupy (sinky) pro příchozí RTP-MIDI.
//!
//! The engine only sees `Box<dyn LocalMidiSink>`; which variant sits behind
//! it is decided once at startup by [`build_sink`].

pub mod file_sink;
#[cfg(feature = "hardware")]
pub mod hardware_sink;
pub mod memory_sink;
pub mod multi_sink;

use log::{info, warn};

use rtp_midi_core::{Config, LocalMidiSink};

pub use crate::file_sink::FileSink;
#[cfg(feature = "hardware")]
pub use crate::hardware_sink::HardwareSink;
pub use crate::memory_sink::MemorySink;
pub use crate::multi_sink::MultiSink;

/// The "absent" sink: inbound MIDI is dropped, no local input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LocalMidiSink for NullSink {
    fn available(&self) -> bool {
        false
    }

    fn write_raw(&mut self, _bytes: &[u8]) -> rtp_midi_core::Result<()> {
        Ok(())
    }
}

/// Builds the local sink from configuration: hardware ports (when compiled
/// in) and the capture file, both at once if both are configured. A sink
/// that fails to open is logged and skipped; with nothing left the result
/// is a [`NullSink`].
pub fn build_sink(config: &Config) -> Box<dyn LocalMidiSink> {
    let mut sinks: Vec<Box<dyn LocalMidiSink>> = Vec::new();

    let hw = &config.hardware;
    if hw.output_device.is_some() || hw.input_device.is_some() {
        open_hardware(config, &mut sinks);
    }

    if let Some(path) = &config.inbound.midi_file {
        match FileSink::open(path, config.file_mode()) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => warn!("MIDI capture file unavailable: {:#}", e),
        }
    }

    match sinks.len() {
        0 => {
            info!("No local MIDI sink configured, inbound MIDI will be dropped.");
            Box::new(NullSink)
        }
        1 => sinks.remove(0),
        _ => Box::new(MultiSink::new(sinks)),
    }
}

#[cfg(feature = "hardware")]
fn open_hardware(config: &Config, sinks: &mut Vec<Box<dyn LocalMidiSink>>) {
    let hw = &config.hardware;
    match HardwareSink::open(hw.output_device.as_deref(), hw.input_device.as_deref()) {
        Ok(sink) => sinks.push(Box::new(sink)),
        Err(e) => warn!("MIDI hardware unavailable: {:#}", e),
    }
}

#[cfg(not(feature = "hardware"))]
fn open_hardware(_config: &Config, _sinks: &mut Vec<Box<dyn LocalMidiSink>>) {
    warn!("[hardware] is configured but this build has no hardware support");
}
