use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;

use rtp_midi_core::LocalMidiSink;
use utils::check_file_security;

/// Appends inbound MIDI bytes to a capture file.
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Opens (or creates with `mode`) the capture file. Refuses anything that
    /// is not a plain, non-executable file.
    pub fn open(path: &Path, mode: u32) -> Result<Self> {
        if !check_file_security(path) {
            bail!(
                "{} is not a regular non-executable file, refusing to write MIDI to it",
                path.display()
            );
        }
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = options
            .open(path)
            .with_context(|| format!("Failed to open MIDI capture file {}", path.display()))?;
        info!("Writing inbound MIDI to {}", path.display());
        Ok(Self { file })
    }
}

impl LocalMidiSink for FileSink {
    fn available(&self) -> bool {
        true
    }

    fn write_raw(&mut self, bytes: &[u8]) -> rtp_midi_core::Result<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }
}
