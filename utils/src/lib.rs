//! Drobné pomocné funkce sdílené napříč workspace.

use std::fmt::{Display, Write as _};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Instant;

use log::{debug, error, log_enabled, Level};

/// Media clock rate used for RTP timestamps and clock sync (100 µs ticks).
pub const MEDIA_CLOCK_HZ: u64 = 10_000;

/// Logs `data` as a hex dump, eight bytes per line. No-op unless debug logging is on.
pub fn hex_dump(label: impl Display, data: &[u8]) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    debug!("{} ({} bytes):\n{}", label, data.len(), format_hex(data));
}

/// Formats bytes as `xx c` pairs, eight per line, with `.` for unprintable characters.
pub fn format_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 5);
    for (i, chunk) in data.chunks(8).enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for (j, byte) in chunk.iter().enumerate() {
            if j > 0 {
                out.push('\t');
            }
            let shown = if byte.is_ascii_graphic() || *byte == b' ' {
                *byte as char
            } else {
                '.'
            };
            let _ = write!(out, "{byte:02x} {shown}");
        }
    }
    out
}

/// Returns true if `path` is safe to open for writing: it either does not
/// exist yet, or is a regular file with no execute bits set.
pub fn check_file_security(path: &Path) -> bool {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return true,
        Err(e) => {
            error!("Cannot stat {}: {}", path.display(), e);
            return false;
        }
    };
    if !metadata.is_file() {
        return false;
    }
    !is_executable(&metadata)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

/// Monotonic 10 kHz clock anchored at engine start.
#[derive(Debug, Clone, Copy)]
pub struct MediaClock {
    start: Instant,
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Ticks elapsed at `now`; instants before the anchor read as 0.
    pub fn ticks_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.start);
        (elapsed.as_micros() / (1_000_000 / MEDIA_CLOCK_HZ as u128)) as u64
    }

    pub fn ticks(&self) -> u64 {
        self.ticks_at(Instant::now())
    }

    /// Current ticks truncated to the 32-bit RTP timestamp field.
    pub fn rtp_timestamp(&self) -> u32 {
        self.ticks() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn hex_format_wraps_every_eight_bytes() {
        let text = format_hex(b"ABCDEFGH\x00");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("41 A\t42 B"));
        assert_eq!(lines[1], "00 .");
        assert!(format_hex(&[]).is_empty());
    }

    #[test]
    fn media_clock_counts_in_100us_ticks() {
        let clock = MediaClock::new();
        let later = clock.start + Duration::from_millis(250);
        assert_eq!(clock.ticks_at(later), 2_500);
        assert_eq!(clock.ticks_at(clock.start), 0);
    }

    #[test]
    fn missing_file_is_acceptable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_file_security(&dir.path().join("inbound.midi")));
    }

    #[test]
    fn directories_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!check_file_security(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn executable_files_are_rejected() {
        use std::os::unix::fs::PermissionsExt;
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(check_file_security(file.path()));

        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o750)).unwrap();
        assert!(!check_file_security(file.path()));
    }
}
