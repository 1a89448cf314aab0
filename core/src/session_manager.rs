// core/src/session_manager.rs

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::info;

use crate::journal_engine::{Journal, DEFAULT_JOURNAL_CAPACITY};
use crate::{seq_newer, ProtocolError, Result};

pub const DEFAULT_MAX_SESSIONS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Control-port invitation accepted, data port not yet confirmed.
    Invited,
    /// Data-port invitation accepted (or clock sync seen).
    Established,
}

/// Server-side state for one remote peer.
#[derive(Debug)]
pub struct Session {
    /// Our SSRC for this session, stamped on everything we send.
    pub ssrc: u32,
    /// The SSRC the peer announced in its invitation.
    pub remote_ssrc: u32,
    pub name: String,
    pub initiator_token: u32,
    pub control_address: SocketAddr,
    /// Where RTP-MIDI for this peer goes.
    pub peer_address: SocketAddr,
    pub state: SessionState,
    pub sequence_number: u16,
    pub journal: Journal,
    pub last_feedback_seq: Option<u16>,
    pub last_activity: Instant,
}

impl Session {
    /// Advances the outbound sequence number and returns the value to stamp.
    pub fn increment_seq(&mut self) -> u16 {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.sequence_number
    }

    pub fn matches(&self, ssrc: u32) -> bool {
        self.ssrc == ssrc || self.remote_ssrc == ssrc
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Records a receiver feedback and trims the journal. Stale feedback is ignored.
    pub fn acknowledge(&mut self, sequence_nr: u16) {
        match self.last_feedback_seq {
            Some(last) if !seq_newer(sequence_nr, last) => {}
            _ => {
                self.last_feedback_seq = Some(sequence_nr);
                self.journal.trim(sequence_nr);
            }
        }
    }
}

/// Owned table of active sessions.
pub struct SessionTable {
    sessions: Vec<Session>,
    max_sessions: usize,
    journal_capacity: usize,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS, DEFAULT_JOURNAL_CAPACITY)
    }
}

impl SessionTable {
    pub fn new(max_sessions: usize, journal_capacity: usize) -> Self {
        Self {
            sessions: Vec::new(),
            max_sessions,
            journal_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    /// Registers a peer that just sent a control-port invitation.
    ///
    /// The data port is assumed to be the control port + 1 until the peer's
    /// data-port invitation says otherwise.
    pub fn create(
        &mut self,
        remote_ssrc: u32,
        initiator_token: u32,
        name: &str,
        control_address: SocketAddr,
    ) -> Result<&mut Session> {
        if self.is_full() {
            return Err(ProtocolError::ResourceExhausted(format!(
                "session table full ({} sessions)",
                self.max_sessions
            )));
        }
        let ssrc = self.fresh_ssrc();
        let mut peer_address = control_address;
        peer_address.set_port(control_address.port().wrapping_add(1));

        info!(
            "Session created: name=\"{}\" ssrc=0x{:08x} remote_ssrc=0x{:08x} peer={}",
            name, ssrc, remote_ssrc, control_address
        );
        self.sessions.push(Session {
            ssrc,
            remote_ssrc,
            name: name.to_string(),
            initiator_token,
            control_address,
            peer_address,
            state: SessionState::Invited,
            sequence_number: 0,
            journal: Journal::new(self.journal_capacity),
            last_feedback_seq: None,
            last_activity: Instant::now(),
        });
        let last = self.sessions.len() - 1;
        Ok(&mut self.sessions[last])
    }

    fn fresh_ssrc(&self) -> u32 {
        loop {
            let candidate: u32 = rand::random();
            if candidate != 0 && !self.sessions.iter().any(|s| s.matches(candidate)) {
                return candidate;
            }
        }
    }

    pub fn find_by_ssrc(&self, ssrc: u32) -> Option<&Session> {
        self.sessions.iter().find(|s| s.matches(ssrc))
    }

    pub fn find_by_ssrc_mut(&mut self, ssrc: u32) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.matches(ssrc))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut()
    }

    pub fn destroy(&mut self, ssrc: u32) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.matches(ssrc))?;
        let session = self.sessions.remove(index);
        info!(
            "Session destroyed: name=\"{}\" ssrc=0x{:08x}",
            session.name, session.ssrc
        );
        Some(session)
    }

    /// Removes sessions idle for longer than `timeout`. A zero timeout disables expiry.
    pub fn expire_idle(&mut self, now: Instant, timeout: Duration) -> Vec<Session> {
        if timeout.is_zero() {
            return Vec::new();
        }
        let (expired, active): (Vec<Session>, Vec<Session>) = std::mem::take(&mut self.sessions)
            .into_iter()
            .partition(|s| now.saturating_duration_since(s.last_activity) > timeout);
        self.sessions = active;
        for session in &expired {
            info!(
                "Session expired: name=\"{}\" ssrc=0x{:08x} idle for more than {:?}",
                session.name, session.ssrc, timeout
            );
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi_command::MidiNote;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], port))
    }

    #[test]
    fn create_assigns_unique_ssrc_and_data_port() {
        let mut table = SessionTable::default();
        let a = table.create(0x1111, 1, "a", addr(5004)).unwrap().ssrc;
        let b = table.create(0x2222, 2, "b", addr(6004)).unwrap().ssrc;
        assert_ne!(a, b);
        let session = table.find_by_ssrc(0x1111).unwrap();
        assert_eq!(session.ssrc, a);
        assert_eq!(session.peer_address, addr(5005));
        assert_eq!(session.sequence_number, 0);
        assert!(session.journal.is_empty());
        assert!(table.find_by_ssrc(a).is_some());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut table = SessionTable::new(1, 8);
        table.create(1, 1, "a", addr(5004)).unwrap();
        assert!(matches!(
            table.create(2, 2, "b", addr(5006)),
            Err(ProtocolError::ResourceExhausted(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn destroy_removes_only_the_target() {
        let mut table = SessionTable::default();
        table.create(1, 1, "a", addr(5004)).unwrap();
        table.create(2, 2, "b", addr(5006)).unwrap();
        table.create(3, 3, "c", addr(5008)).unwrap();
        assert_eq!(table.destroy(2).unwrap().remote_ssrc, 2);
        assert!(table.destroy(99).is_none());
        let left: Vec<u32> = table.iter().map(|s| s.remote_ssrc).collect();
        assert_eq!(left, vec![1, 3]);
    }

    #[test]
    fn sequence_wraps() {
        let mut table = SessionTable::default();
        let session = table.create(1, 1, "a", addr(5004)).unwrap();
        session.sequence_number = u16::MAX;
        assert_eq!(session.increment_seq(), 0);
        assert_eq!(session.increment_seq(), 1);
    }

    #[test]
    fn stale_feedback_never_moves_backwards() {
        let mut table = SessionTable::default();
        let session = table.create(1, 1, "a", addr(5004)).unwrap();
        let note = MidiNote {
            channel: 0,
            note: 60,
            velocity: 100,
            on: true,
        };
        session.journal.add_note(10, note);
        session.journal.add_note(11, note);
        session.acknowledge(10);
        assert_eq!(session.last_feedback_seq, Some(10));
        assert_eq!(session.journal.len(), 1);
        session.acknowledge(4);
        assert_eq!(session.last_feedback_seq, Some(10));
        session.acknowledge(11);
        assert_eq!(session.last_feedback_seq, Some(11));
        assert!(session.journal.is_empty());
    }

    #[test]
    fn idle_sessions_expire() {
        let mut table = SessionTable::default();
        table.create(1, 1, "a", addr(5004)).unwrap();
        table.create(2, 2, "b", addr(5006)).unwrap();
        let later = Instant::now() + Duration::from_secs(120);
        table.find_by_ssrc_mut(2).unwrap().touch(later);

        assert!(table.expire_idle(later, Duration::ZERO).is_empty());
        let expired = table.expire_idle(later, Duration::from_secs(60));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].remote_ssrc, 1);
        assert_eq!(table.len(), 1);
    }
}
