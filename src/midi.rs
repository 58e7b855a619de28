use crossbeam_channel::Sender;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

/// MIDI input connection to the device, forwarding every received
/// message's raw bytes to a channel. SysEx classification happens on the
/// receiving side; the callback stays trivial.
pub struct DeviceInput {
    name: String,
    _conn: MidiInputConnection<()>,
}

impl DeviceInput {
    /// Connect to the first input port whose name contains `filter`
    /// (case-insensitive).
    pub fn open(filter: &str, sender: Sender<Vec<u8>>) -> anyhow::Result<Self> {
        let mut midi_in = MidiInput::new("pacer")?;
        // sysex must not be filtered out by the backend
        midi_in.ignore(Ignore::None);

        let (port, name) = find_port(midi_in.ports(), &midi_in, filter)
            .ok_or_else(|| anyhow::anyhow!("no MIDI input port matching {filter:?}"))?;

        let log_name = name.clone();
        let conn = midi_in
            .connect(
                &port,
                &name,
                move |_timestamp_us, bytes, _| {
                    log::debug!("MIDI in [{log_name}] {} bytes", bytes.len());
                    if sender.try_send(bytes.to_vec()).is_err() {
                        log::warn!("MIDI channel full, dropping {} byte message", bytes.len());
                    }
                },
                (),
            )
            .map_err(|e| anyhow::anyhow!("failed to open MIDI input {name}: {e}"))?;

        log::info!("Opened MIDI input: {name}");
        Ok(DeviceInput { name, _conn: conn })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// MIDI output connection used to push request and update frames.
pub struct DeviceOutput {
    name: String,
    conn: MidiOutputConnection,
}

impl DeviceOutput {
    pub fn open(filter: &str) -> anyhow::Result<Self> {
        let midi_out = MidiOutput::new("pacer")?;
        let (port, name) = find_port(midi_out.ports(), &midi_out, filter)
            .ok_or_else(|| anyhow::anyhow!("no MIDI output port matching {filter:?}"))?;
        let conn = midi_out
            .connect(&port, &name)
            .map_err(|e| anyhow::anyhow!("failed to open MIDI output {name}: {e}"))?;
        log::info!("Opened MIDI output: {name}");
        Ok(DeviceOutput { name, conn })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one frame. The device expects frames one at a time, in order.
    pub fn send(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        self.conn
            .send(frame)
            .map_err(|e| anyhow::anyhow!("MIDI send failed on {}: {e}", self.name))
    }
}

fn find_port<T: midir::MidiIO>(
    ports: Vec<T::Port>,
    io: &T,
    filter: &str,
) -> Option<(T::Port, String)> {
    let needle = filter.to_lowercase();
    ports.into_iter().find_map(|port| {
        let name = io.port_name(&port).ok()?;
        name.to_lowercase().contains(&needle).then_some((port, name))
    })
}

/// `ports` subcommand: list everything, mark ports matching the
/// configured device filter.
pub fn list_ports(filter: &str) -> anyhow::Result<()> {
    let midi_in = MidiInput::new("pacer-ports")?;
    println!("=== MIDI Input Ports ===");
    print_ports(&midi_in, midi_in.ports(), filter);

    let midi_out = MidiOutput::new("pacer-ports")?;
    println!("=== MIDI Output Ports ===");
    print_ports(&midi_out, midi_out.ports(), filter);
    Ok(())
}

fn print_ports<T: midir::MidiIO>(io: &T, ports: Vec<T::Port>, filter: &str) {
    if ports.is_empty() {
        println!("  (none found)");
    }
    let needle = filter.to_lowercase();
    for port in &ports {
        let name = io.port_name(port).unwrap_or_else(|_| "Unknown".into());
        let marker = if name.to_lowercase().contains(&needle) {
            " *"
        } else {
            ""
        };
        println!("  {name}{marker}");
    }
}
