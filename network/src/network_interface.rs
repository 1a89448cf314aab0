// network/src/network_interface.rs

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use rtp_midi_core::config::NetworkConfig;

use crate::dispatch::{Engine, Outbound, SocketId};

/// Largest datagram we accept; anything longer is truncated by the OS.
pub const MAX_DATAGRAM: usize = 4096;

/// The three UDP sockets the server listens on.
pub struct Sockets {
    pub control: UdpSocket,
    pub data: UdpSocket,
    pub local: UdpSocket,
}

impl Sockets {
    pub async fn bind(config: &NetworkConfig) -> Result<Self> {
        let control = bind_one(&config.bind_address, config.control_port, "control").await?;
        let data = bind_one(&config.bind_address, config.data_port, "data").await?;
        let local = bind_one(&config.bind_address, config.local_port, "local").await?;
        Ok(Self {
            control,
            data,
            local,
        })
    }

    /// Socket behind a logical id. `Device` has none.
    pub fn get(&self, id: SocketId) -> Option<&UdpSocket> {
        match id {
            SocketId::Control => Some(&self.control),
            SocketId::Data => Some(&self.data),
            SocketId::Local => Some(&self.local),
            SocketId::Device => None,
        }
    }

    pub fn local_addr(&self, id: SocketId) -> Option<SocketAddr> {
        self.get(id).and_then(|s| s.local_addr().ok())
    }
}

async fn bind_one(address: &str, port: u16, role: &str) -> Result<UdpSocket> {
    let socket = UdpSocket::bind((address, port))
        .await
        .with_context(|| format!("Failed to bind {role} socket on {address}:{port}"))?;
    info!("{} socket bound to {}", role, socket.local_addr()?);
    Ok(socket)
}

/// Runs the poll loop until `shutdown` turns true.
///
/// Každý tik: vyprázdnit sokety (control, data, local), pak lokální vstup,
/// pak vypršené relace, nakonec kontrola vypnutí.
pub async fn run_reactor(
    engine: &mut Engine,
    sockets: &Sockets,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let device_source = sockets.local.local_addr()?;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    info!("Reactor running, poll interval {:?}", poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    info!("Shutdown sender dropped, stopping reactor.");
                    break;
                }
            }
        }

        poll_once(engine, sockets, &mut buf, device_source).await;

        if *shutdown.borrow() {
            info!("Reactor shutting down.");
            break;
        }
    }
    Ok(())
}

/// One full pass over every input. Public so tests can step the loop by hand.
pub async fn poll_once(
    engine: &mut Engine,
    sockets: &Sockets,
    buf: &mut [u8],
    device_source: SocketAddr,
) {
    for id in [SocketId::Control, SocketId::Data, SocketId::Local] {
        let Some(socket) = sockets.get(id) else {
            continue;
        };
        loop {
            match socket.try_recv_from(buf) {
                Ok((len, source)) => {
                    let outbound = engine.handle_datagram(id, &buf[..len], source);
                    send_all(sockets, outbound).await;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Receive error on {:?} socket: {}", id, e);
                    break;
                }
            }
        }
    }

    loop {
        let len = match engine.sink_mut().read_raw(buf) {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) => {
                warn!("Local MIDI input read failed: {}", e);
                break;
            }
        };
        let outbound = engine.handle_datagram(SocketId::Device, &buf[..len], device_source);
        send_all(sockets, outbound).await;
    }

    let expired = engine.expire_idle(Instant::now());
    if expired > 0 {
        debug!("{} idle session(s) expired", expired);
    }
}

async fn send_all(sockets: &Sockets, outbound: Vec<Outbound>) {
    for packet in outbound {
        let Some(socket) = sockets.get(packet.socket) else {
            warn!("No socket for {:?}, dropping {} bytes", packet.socket, packet.payload.len());
            continue;
        };
        match socket.send_to(&packet.payload, packet.destination).await {
            Ok(len) => debug!("Sent {} bytes to {} via {:?}", len, packet.destination, packet.socket),
            Err(e) => error!("Failed to send UDP packet to {}: {}", packet.destination, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::rtp::control_message::{AppleMidiMessage, Invitation};
    use rtp_midi_core::{Config, LocalMidiSink, Result as CoreResult};

    struct Silent;

    impl LocalMidiSink for Silent {
        fn available(&self) -> bool {
            false
        }
        fn write_raw(&mut self, _bytes: &[u8]) -> CoreResult<()> {
            Ok(())
        }
    }

    fn loopback_config() -> NetworkConfig {
        NetworkConfig {
            bind_address: "127.0.0.1".to_string(),
            control_port: 0,
            data_port: 0,
            local_port: 0,
        }
    }

    #[tokio::test]
    async fn poll_once_answers_invitation() {
        let sockets = Sockets::bind(&loopback_config()).await.unwrap();
        let mut engine = Engine::new(&Config::default(), Box::new(Silent));
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let inv = AppleMidiMessage::Invitation(Invitation::new(42, 0x0102_0304, "peer"));
        let control = sockets.local_addr(SocketId::Control).unwrap();
        peer.send_to(&inv.serialize(), control).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let device = sockets.local_addr(SocketId::Local).unwrap();
        poll_once(&mut engine, &sockets, &mut buf, device).await;
        assert_eq!(engine.sessions().len(), 1);

        let mut reply = [0u8; 128];
        let (len, from) = tokio::time::timeout(Duration::from_secs(1), peer.recv_from(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, control);
        assert!(matches!(
            AppleMidiMessage::parse(&reply[..len]).unwrap(),
            AppleMidiMessage::InvitationAccepted(_)
        ));
    }

    #[tokio::test]
    async fn reactor_stops_on_shutdown() {
        let sockets = Sockets::bind(&loopback_config()).await.unwrap();
        let mut engine = Engine::new(&Config::default(), Box::new(Silent));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            run_reactor(&mut engine, &sockets, Duration::from_millis(5), rx),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
