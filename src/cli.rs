use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pacer", about = "Nektar Pacer SysEx preset decoder and editor")]
pub struct Cli {
    /// Config file (default: ./pacer.toml when present)
    #[arg(long)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List available MIDI input and output ports
    Ports,
    /// Decode a binary sysex dump file and print the preset tree
    Decode {
        /// Path to a .syx dump file
        file: String,
    },
    /// Listen on the device port and print each merged dump burst
    Capture {
        /// MIDI port name filter (overrides config)
        #[arg(long)]
        port: Option<String>,
    },
    /// Request one preset from the device and print the reply
    Request {
        /// Preset name: 0 (current) or A1..D6
        preset: String,

        /// MIDI port name filter (overrides config)
        #[arg(long)]
        port: Option<String>,

        /// Give up after this many seconds without a reply
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
    /// Rename a preset from a dump file and show the update frames
    Rename {
        /// Path to a .syx dump file
        file: String,
        /// Preset name: 0 (current) or A1..D6
        preset: String,
        /// New preset name (max 5 characters)
        name: String,

        /// Send the update frames to the device
        #[arg(long)]
        send: bool,

        /// Write the edited tree back out as a .syx dump file
        #[arg(long)]
        out: Option<String>,

        /// MIDI port name filter (overrides config)
        #[arg(long)]
        port: Option<String>,
    },
    /// Edit one MIDI slot of a preset and show the update frames
    Set {
        /// Path to a .syx dump file
        file: String,
        /// Preset name: 0 (current) or A1..D6
        preset: String,
        /// MIDI slot 0..15
        slot: u8,

        /// MIDI channel 0..15
        #[arg(long)]
        channel: Option<u8>,

        /// Message type: off, note, pc, cc, bend, or a numeric code
        #[arg(long)]
        msg_type: Option<String>,

        /// Data parameter assignment PARAM=VALUE, repeatable (e.g. --data 0=16)
        #[arg(long)]
        data: Vec<String>,

        /// Send the update frames to the device
        #[arg(long)]
        send: bool,

        /// Write the edited tree back out as a .syx dump file
        #[arg(long)]
        out: Option<String>,

        /// MIDI port name filter (overrides config)
        #[arg(long)]
        port: Option<String>,
    },
}
