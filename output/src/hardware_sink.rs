//! Raw MIDI hardware ports via midir.

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use log::{info, warn};
use midir::{Ignore, MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use rtp_midi_core::{LocalMidiSink, ProtocolError};

const CLIENT_NAME: &str = "rtpmidi-server";
const INPUT_QUEUE: usize = 256;

pub struct HardwareSink {
    output: Option<MidiOutputConnection>,
    _input: Option<MidiInputConnection<()>>,
    incoming: Option<Receiver<Vec<u8>>>,
}

impl HardwareSink {
    /// Connects to the first ports whose names contain the given strings.
    pub fn open(output_device: Option<&str>, input_device: Option<&str>) -> Result<Self> {
        let output = match output_device {
            Some(wanted) => {
                let midi_out = MidiOutput::new(CLIENT_NAME)
                    .map_err(|e| anyhow!("Failed to create MIDI output client: {e}"))?;
                let port = find_port(&midi_out, wanted)?;
                let conn = midi_out
                    .connect(&port, "rtpmidi-out")
                    .map_err(|e| anyhow!("connect {wanted}: {e}"))?;
                info!("MIDI output connected to {}", wanted);
                Some(conn)
            }
            None => None,
        };

        let (input, incoming) = match input_device {
            Some(wanted) => {
                let mut midi_in = MidiInput::new(CLIENT_NAME)
                    .map_err(|e| anyhow!("Failed to create MIDI input client: {e}"))?;
                midi_in.ignore(Ignore::None);
                let port = find_port(&midi_in, wanted)?;
                let (tx, rx) = crossbeam_channel::bounded(INPUT_QUEUE);
                let conn = midi_in
                    .connect(
                        &port,
                        "rtpmidi-in",
                        move |_stamp, message, _| {
                            if tx.try_send(message.to_vec()).is_err() {
                                warn!("MIDI input queue full, dropping {} bytes", message.len());
                            }
                        },
                        (),
                    )
                    .map_err(|e| anyhow!("connect {wanted}: {e}"))?;
                info!("MIDI input connected to {}", wanted);
                (Some(conn), Some(rx))
            }
            None => (None, None),
        };

        Ok(Self {
            output,
            _input: input,
            incoming,
        })
    }
}

fn find_port<T: MidiIO>(io: &T, wanted: &str) -> Result<T::Port> {
    let mut names = Vec::new();
    for port in io.ports() {
        let name = io.port_name(&port).unwrap_or_default();
        if name.contains(wanted) {
            return Ok(port);
        }
        names.push(name);
    }
    bail!("No MIDI port matching \"{}\" (available: {:?})", wanted, names)
}

impl LocalMidiSink for HardwareSink {
    fn available(&self) -> bool {
        self.output.is_some()
    }

    fn write_raw(&mut self, bytes: &[u8]) -> rtp_midi_core::Result<()> {
        let Some(output) = self.output.as_mut() else {
            return Ok(());
        };
        output.send(bytes).map_err(|e| {
            ProtocolError::Transport(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> rtp_midi_core::Result<usize> {
        let Some(incoming) = &self.incoming else {
            return Ok(0);
        };
        match incoming.try_recv() {
            Ok(message) => {
                if message.len() > buf.len() {
                    warn!("MIDI input message of {} bytes truncated", message.len());
                }
                let len = message.len().min(buf.len());
                buf[..len].copy_from_slice(&message[..len]);
                Ok(len)
            }
            Err(TryRecvError::Empty) => Ok(0),
            Err(TryRecvError::Disconnected) => Err(ProtocolError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "MIDI input disconnected",
            ))),
        }
    }
}
