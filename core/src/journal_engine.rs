// core/src/journal_engine.rs

//! Recovery journal kept per session.
//!
//! Entries are appended in send order, tagged with the sequence number of the
//! packet that carried them, and dropped once the peer acknowledges that
//! sequence number. `pack` folds what is left into an RFC 6295 journal:
//! one channel journal per MIDI channel with chapter C (controllers) and
//! chapter N (notes).

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;

use crate::byte_order::ByteWriter;
use crate::midi_command::{MidiControl, MidiNote};
use crate::seq_newer;

/// How many sent events to keep when the peer never acknowledges.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 64;

const JOURNAL_A: u8 = 0b0010_0000;
const TOC_C: u8 = 0b0100_0000;
const TOC_N: u8 = 0b0000_1000;
const NOTE_Y: u8 = 0b1000_0000;
const MAX_NOTE_LOGS: usize = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEvent {
    Note(MidiNote),
    Control(MidiControl),
}

impl JournalEvent {
    pub fn channel(&self) -> u8 {
        match self {
            JournalEvent::Note(n) => n.channel & 0x0F,
            JournalEvent::Control(c) => c.channel & 0x0F,
        }
    }
}

/// Represents a history entry in the recovery journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub sequence_nr: u16,
    pub event: JournalEvent,
}

#[derive(Debug, Clone)]
pub struct Journal {
    entries: VecDeque<JournalEntry>,
    capacity: usize,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}

#[derive(Default)]
struct ChannelState {
    controls: BTreeMap<u8, u8>,
    // Some(velocity) while on, None once the latest event was a note-off.
    notes: BTreeMap<u8, Option<u8>>,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter()
    }

    /// Sequence number of the oldest retained entry.
    pub fn checkpoint(&self) -> Option<u16> {
        self.entries.front().map(|e| e.sequence_nr)
    }

    pub fn add_note(&mut self, sequence_nr: u16, note: MidiNote) {
        self.push(sequence_nr, JournalEvent::Note(note));
    }

    pub fn add_control(&mut self, sequence_nr: u16, control: MidiControl) {
        self.push(sequence_nr, JournalEvent::Control(control));
    }

    fn push(&mut self, sequence_nr: u16, event: JournalEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(JournalEntry { sequence_nr, event });
    }

    /// Drops every entry the peer has acknowledged.
    pub fn trim(&mut self, acknowledged: u16) {
        self.entries
            .retain(|e| seq_newer(e.sequence_nr, acknowledged));
    }

    /// Serializes the journal. Empty output means "no journal, clear J".
    pub fn pack(&self) -> Bytes {
        let Some(checkpoint) = self.checkpoint() else {
            return Bytes::new();
        };

        let mut channels: BTreeMap<u8, ChannelState> = BTreeMap::new();
        for entry in &self.entries {
            let state = channels.entry(entry.event.channel()).or_default();
            match entry.event {
                JournalEvent::Control(c) => {
                    state.controls.insert(c.controller & 0x7F, c.value & 0x7F);
                }
                JournalEvent::Note(n) => {
                    let velocity = (n.on && n.velocity > 0).then_some(n.velocity & 0x7F);
                    state.notes.insert(n.note & 0x7F, velocity);
                }
            }
        }

        let mut writer = ByteWriter::with_capacity(64);
        // S=0 Y=0 A=1 H=0 TOTCHAN
        writer.put_u8(JOURNAL_A | ((channels.len() - 1) as u8 & 0x0F));
        writer.put_u16(checkpoint);
        for (channel, state) in &channels {
            pack_channel(&mut writer, *channel, state);
        }
        writer.freeze()
    }
}

fn pack_channel(writer: &mut ByteWriter, channel: u8, state: &ChannelState) {
    let mut chapters = ByteWriter::with_capacity(32);
    let mut toc = 0u8;

    if !state.controls.is_empty() {
        toc |= TOC_C;
        chapters.put_u8((state.controls.len() - 1) as u8 & 0x7F);
        for (controller, value) in &state.controls {
            chapters.put_u8(*controller);
            chapters.put_u8(*value);
        }
    }

    if !state.notes.is_empty() {
        toc |= TOC_N;
        let on: Vec<(u8, u8)> = state
            .notes
            .iter()
            .filter_map(|(note, vel)| vel.map(|v| (*note, v)))
            .take(MAX_NOTE_LOGS)
            .collect();
        let off: Vec<u8> = state
            .notes
            .iter()
            .filter(|(_, vel)| vel.is_none())
            .map(|(note, _)| *note)
            .collect();

        let (low, high) = match (off.first(), off.last()) {
            (Some(first), Some(last)) => (first / 8, last / 8),
            _ => (15, 0),
        };
        chapters.put_u8(on.len() as u8);
        chapters.put_u8((low << 4) | high);
        for (note, velocity) in &on {
            chapters.put_u8(*note);
            chapters.put_u8(NOTE_Y | velocity);
        }
        if low <= high {
            for octet in low..=high {
                let bits = off
                    .iter()
                    .filter(|n| *n / 8 == octet)
                    .fold(0u8, |acc, n| acc | (0x80 >> (n % 8)));
                chapters.put_u8(bits);
            }
        }
    }

    let chapters = chapters.freeze();
    let length = 3 + chapters.len();
    // S=0 CHAN(4) H=0 LENGTH(10)
    writer.put_u8(((channel & 0x0F) << 3) | ((length >> 8) as u8 & 0x03));
    writer.put_u8((length & 0xFF) as u8);
    writer.put_u8(toc);
    writer.put_slice(&chapters);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(channel: u8, note: u8, velocity: u8, on: bool) -> MidiNote {
        MidiNote {
            channel,
            note,
            velocity,
            on,
        }
    }

    #[test]
    fn empty_journal_packs_to_nothing() {
        assert!(Journal::default().pack().is_empty());
    }

    #[test]
    fn note_on_packs_chapter_n() {
        let mut journal = Journal::default();
        journal.add_note(10, note(2, 60, 100, true));
        let packed = journal.pack();
        assert_eq!(
            packed.to_vec(),
            vec![
                0x20, 0x00, 0x0A, // journal header, checkpoint 10
                0x10, 0x07, TOC_N, // channel 2, length 7
                0x01, 0xF0, // one note log, LOW=15 HIGH=0
                60, 0x80 | 100,
            ]
        );
    }

    #[test]
    fn note_off_moves_note_into_offbits() {
        let mut journal = Journal::default();
        journal.add_note(1, note(0, 60, 100, true));
        journal.add_note(2, note(0, 60, 0, false));
        let packed = journal.pack();
        // 60 / 8 = 7, bit for 60 % 8 = 4 -> 0x08
        assert_eq!(&packed[3..], &[0x00, 0x06, TOC_N, 0x00, 0x77, 0x08]);
    }

    #[test]
    fn controllers_keep_latest_value_per_channel() {
        let mut journal = Journal::default();
        journal.add_control(1, MidiControl { channel: 1, controller: 7, value: 10 });
        journal.add_control(2, MidiControl { channel: 1, controller: 7, value: 90 });
        journal.add_control(3, MidiControl { channel: 1, controller: 1, value: 5 });
        journal.add_note(4, note(3, 40, 50, true));
        let packed = journal.pack();
        assert_eq!(packed[0], 0x20 | 1); // two channels
        assert_eq!(
            &packed[3..11],
            &[0x08, 0x08, TOC_C, 0x01, 1, 5, 7, 90]
        );
        assert_eq!(packed[11] >> 3, 3);
    }

    #[test]
    fn covering_trim_empties_journal() {
        let mut journal = Journal::default();
        journal.add_note(5, note(0, 60, 100, true));
        journal.add_control(6, MidiControl { channel: 0, controller: 7, value: 1 });
        assert!(!journal.pack().is_empty());

        journal.trim(5);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.checkpoint(), Some(6));

        journal.trim(6);
        assert!(journal.pack().is_empty());
    }

    #[test]
    fn trim_understands_wraparound() {
        let mut journal = Journal::default();
        journal.add_note(0xFFFE, note(0, 1, 1, true));
        journal.add_note(0xFFFF, note(0, 2, 1, true));
        journal.add_note(0x0001, note(0, 3, 1, true));
        journal.trim(0xFFFF);
        assert_eq!(journal.checkpoint(), Some(1));
    }

    #[test]
    fn capacity_drops_oldest_first() {
        let mut journal = Journal::new(3);
        for seq in 1..=5u16 {
            journal.add_note(seq, note(0, seq as u8, 1, true));
        }
        let seqs: Vec<u16> = journal.entries().map(|e| e.sequence_nr).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }
}
