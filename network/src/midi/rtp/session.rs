// network/src/midi/rtp/session.rs

//! AppleMIDI session handshake, as seen from the invited side.
//!
//! Per peer: `UNKNOWN -> INVITED -> ESTABLISHED -> CLOSED`. The control-port
//! invitation creates the session, the data-port invitation (or the first
//! clock sync) establishes it and END removes it. Every handler returns at
//! most one reply, which the caller sends back on the socket the request
//! came in on.

use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, info, warn};

use rtp_midi_core::{SessionState, SessionTable};
use utils::MediaClock;

use super::control_message::{
    AppleMidiMessage, Invitation, InvitationAccepted, InvitationRejected, ReceiverFeedback, Sync,
};
use crate::dispatch::SocketId;

/// SSRC used in REJECT replies, where no session of ours exists.
const NO_SESSION_SSRC: u32 = 0;

/// What the handlers need besides the message itself.
pub struct ControlContext<'a> {
    pub sessions: &'a mut SessionTable,
    pub service_name: &'a str,
    pub clock: &'a MediaClock,
}

pub fn handle_control(
    ctx: &mut ControlContext<'_>,
    message: AppleMidiMessage,
    socket: SocketId,
    source: SocketAddr,
) -> Option<AppleMidiMessage> {
    debug!(
        "{} from {} on {:?} (ssrc=0x{:08x})",
        message.name(),
        source,
        socket,
        message.ssrc()
    );
    match message {
        AppleMidiMessage::Invitation(inv) => Some(handle_invitation(ctx, inv, socket, source)),
        AppleMidiMessage::Sync(sync) => handle_sync(ctx, sync),
        AppleMidiMessage::ReceiverFeedback(feedback) => {
            handle_feedback(ctx, feedback);
            None
        }
        AppleMidiMessage::Exit(end) => {
            if ctx.sessions.destroy(end.header.ssrc).is_none() {
                debug!("END for unknown ssrc=0x{:08x} ignored", end.header.ssrc);
            }
            None
        }
        AppleMidiMessage::InvitationAccepted(_)
        | AppleMidiMessage::InvitationRejected(_)
        | AppleMidiMessage::BitrateLimit(_) => {
            debug!("{} from {} ignored, we never initiate", message.name(), source);
            None
        }
    }
}

fn handle_invitation(
    ctx: &mut ControlContext<'_>,
    inv: Invitation,
    socket: SocketId,
    source: SocketAddr,
) -> AppleMidiMessage {
    let token = inv.header.initiator_token;
    let now = Instant::now();
    let reject = || {
        AppleMidiMessage::InvitationRejected(InvitationRejected::new(token, NO_SESSION_SSRC))
    };

    if !inv.header.is_supported() {
        warn!(
            "Rejecting invitation from {} (\"{}\"): protocol version {}",
            source, inv.name, inv.header.protocol_version
        );
        return reject();
    }

    if let Some(session) = ctx.sessions.find_by_ssrc_mut(inv.header.ssrc) {
        // Only the host that opened the session may move it, and the data
        // invitation has to carry the token of the control one.
        let foreign_host = source.ip() != session.control_address.ip();
        let stale_token = socket != SocketId::Control && token != session.initiator_token;
        if foreign_host || stale_token {
            warn!(
                "Rejecting invitation from {} for ssrc=0x{:08x}: session belongs to {} (token 0x{:08x})",
                source, inv.header.ssrc, session.control_address, session.initiator_token
            );
            return reject();
        }
        session.initiator_token = token;
        session.touch(now);
        if socket == SocketId::Control {
            session.control_address = source;
        } else {
            session.peer_address = source;
            if session.state != SessionState::Established {
                info!(
                    "Session established: name=\"{}\" ssrc=0x{:08x} data={}",
                    session.name, session.ssrc, source
                );
            }
            session.state = SessionState::Established;
        }
        return AppleMidiMessage::InvitationAccepted(InvitationAccepted::new(
            token,
            session.ssrc,
            ctx.service_name,
        ));
    }

    // A data-port invitation without a prior control one: assume the usual
    // control = data - 1 layout so the session still gets a control address.
    let mut control_address = source;
    if socket != SocketId::Control {
        control_address.set_port(source.port().saturating_sub(1));
    }

    match ctx
        .sessions
        .create(inv.header.ssrc, token, &inv.name, control_address)
    {
        Ok(session) => {
            if socket != SocketId::Control {
                session.peer_address = source;
                session.state = SessionState::Established;
            }
            AppleMidiMessage::InvitationAccepted(InvitationAccepted::new(
                token,
                session.ssrc,
                ctx.service_name,
            ))
        }
        Err(e) => {
            warn!("Rejecting invitation from {} (\"{}\"): {}", source, inv.name, e);
            reject()
        }
    }
}

fn handle_sync(ctx: &mut ControlContext<'_>, sync: Sync) -> Option<AppleMidiMessage> {
    let Some(session) = ctx.sessions.find_by_ssrc_mut(sync.ssrc) else {
        debug!("SYNC for unknown ssrc=0x{:08x} ignored", sync.ssrc);
        return None;
    };
    session.touch(Instant::now());
    session.state = SessionState::Established;

    let now = ctx.clock.ticks();
    let [ts1, ts2, _] = sync.timestamps;
    match sync.count {
        0 => Some(AppleMidiMessage::Sync(Sync::new(session.ssrc, 1, [ts1, now, 0]))),
        1 => Some(AppleMidiMessage::Sync(Sync::new(session.ssrc, 2, [ts1, ts2, now]))),
        2 => {
            let offset = (ts1 as i128 + sync.timestamps[2] as i128) / 2 - ts2 as i128;
            debug!(
                "Clock sync complete for ssrc=0x{:08x}, offset {} ticks",
                session.ssrc, offset
            );
            None
        }
        count => {
            debug!("SYNC with invalid count {} ignored", count);
            None
        }
    }
}

fn handle_feedback(ctx: &mut ControlContext<'_>, feedback: ReceiverFeedback) {
    match ctx.sessions.find_by_ssrc_mut(feedback.ssrc) {
        Some(session) => {
            session.touch(Instant::now());
            session.acknowledge(feedback.sequence_number);
            debug!(
                "FEEDBACK ssrc=0x{:08x} seq={} journal={} entries",
                session.ssrc,
                feedback.sequence_number,
                session.journal.len()
            );
        }
        None => debug!("FEEDBACK for unknown ssrc=0x{:08x} ignored", feedback.ssrc),
    }
}
