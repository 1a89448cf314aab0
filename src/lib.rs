use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use tokio::sync::watch;

use network::discovery::ServiceAdvertiser;
use network::{run_reactor, Engine, SocketId, Sockets};
use rtp_midi_core::LocalMidiSink;

pub use rtp_midi_core::Config;

/// A bound, ready-to-run server: sockets, protocol engine and the optional
/// mDNS advertisement.
pub struct Server {
    engine: Engine,
    sockets: Sockets,
    poll_interval: Duration,
    _advertiser: Option<ServiceAdvertiser>,
}

impl Server {
    /// Binds all three sockets. Failing to bind is fatal, failing to
    /// advertise is not.
    pub async fn bind(config: &Config, sink: Box<dyn LocalMidiSink>) -> Result<Self> {
        let sockets = Sockets::bind(&config.network).await?;
        let engine = Engine::new(config, sink);

        let advertiser = if config.discovery.enabled {
            let port = sockets
                .local_addr(SocketId::Control)
                .map_or(config.network.control_port, |a| a.port());
            let ip = advertised_ip(&config.network.bind_address);
            match ServiceAdvertiser::register(&config.service_name, &ip, port) {
                Ok(advertiser) => Some(advertiser),
                Err(e) => {
                    warn!("mDNS advertisement disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            engine,
            sockets,
            poll_interval: config.poll_interval(),
            _advertiser: advertiser,
        })
    }

    pub fn local_addr(&self, id: SocketId) -> Option<SocketAddr> {
        self.sockets.local_addr(id)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs until `shutdown` flips to true.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        run_reactor(&mut self.engine, &self.sockets, self.poll_interval, shutdown).await?;
        info!(
            "Server stopped with {} active session(s).",
            self.engine.sessions().len()
        );
        Ok(())
    }
}

// Wildcard binds advertise every interface address.
fn advertised_ip(bind_address: &str) -> String {
    match bind_address.parse::<IpAddr>() {
        Ok(ip) if ip.is_unspecified() => String::new(),
        _ => bind_address.to_string(),
    }
}

/// Builds the local sink from `config`, binds and serves until shutdown.
pub async fn run_service(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let sink = output::build_sink(&config);
    let server = Server::bind(&config, sink).await?;
    info!(
        "\"{}\" listening: control={:?} data={:?} local={:?}",
        config.service_name,
        server.local_addr(SocketId::Control),
        server.local_addr(SocketId::Data),
        server.local_addr(SocketId::Local)
    );
    server.run(shutdown).await
}
