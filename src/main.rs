mod batch;
mod cli;
mod config;
mod error;
mod midi;
mod preset;
mod sysex;

use std::path::Path;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;

use batch::FrameBatcher;
use cli::{Cli, Command};
use preset::{MsgType, PresetId, PresetTree};

/// Upstream size cap for dump files; a full device dump is a few KiB.
const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let cfg = config::load(cli.config.as_deref().map(Path::new))?;
    config::init(cfg);

    match cli.command {
        Command::Ports => midi::list_ports(config::port_name()),
        Command::Decode { file } => {
            let tree = load_dump(&file)?;
            print_tree(&tree);
            Ok(())
        }
        Command::Capture { port } => capture(port),
        Command::Request {
            preset,
            port,
            timeout,
        } => request(&preset, port, Duration::from_secs(timeout)),
        Command::Rename {
            file,
            preset,
            name,
            send,
            out,
            port,
        } => {
            let mut tree = load_dump(&file)?;
            let id: PresetId = preset.parse()?;
            tree.set_name(id, &name)?;
            finish_edit(id, &tree, send, out.as_deref(), port)
        }
        Command::Set {
            file,
            preset,
            slot,
            channel,
            msg_type,
            data,
            send,
            out,
            port,
        } => {
            let mut tree = load_dump(&file)?;
            let id: PresetId = preset.parse()?;
            if let Some(ch) = channel {
                tree.set_channel(id, slot, ch)?;
            }
            if let Some(ref arg) = msg_type {
                tree.set_msg_type(id, slot, parse_msg_type(arg)?)?;
            }
            for assignment in &data {
                let (param, value) = parse_data_arg(assignment)?;
                tree.set_data(id, slot, param, value)?;
            }
            finish_edit(id, &tree, send, out.as_deref(), port)
        }
    }
}

/// Read and decode a .syx dump file into a fresh tree.
fn load_dump(path: &str) -> anyhow::Result<PresetTree> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > MAX_FILE_SIZE {
        anyhow::bail!("{path}: file too big ({} bytes, max {MAX_FILE_SIZE})", meta.len());
    }
    let bytes = std::fs::read(path)?;
    if !sysex::is_sysex_data(&bytes) {
        anyhow::bail!(
            "{path}: not a sysex file (starts with {})",
            sysex::hex(&bytes[..bytes.len().min(5)])
        );
    }
    let tree = sysex::parse_dump(&bytes);
    if tree.is_empty() {
        anyhow::bail!("{path}: no Pacer frames found");
    }
    log::info!("decoded {path}: {} preset(s)", tree.presets().count());
    Ok(tree)
}

/// Print the computed update frames, then optionally transmit them and
/// write the edited tree back out.
fn finish_edit(
    id: PresetId,
    tree: &PresetTree,
    send: bool,
    out: Option<&str>,
    port: Option<String>,
) -> anyhow::Result<()> {
    let frames = sysex::update_frames(id, tree);
    println!("Update frames for preset {id}:");
    for frame in &frames {
        println!("  {}", sysex::hex(frame));
    }
    if send {
        let filter = port.unwrap_or_else(|| config::port_name().to_string());
        let mut output = midi::DeviceOutput::open(&filter)?;
        for frame in &frames {
            output.send(frame)?;
        }
        log::info!(
            "{} update(s) sent to {}",
            frames.len(),
            output.name()
        );
    }
    if let Some(path) = out {
        std::fs::write(path, sysex::write_dump(tree))?;
        log::info!("wrote {path}");
    }
    Ok(())
}

fn capture(port: Option<String>) -> anyhow::Result<()> {
    let filter = port.unwrap_or_else(|| config::port_name().to_string());
    let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(256);
    let input = midi::DeviceInput::open(&filter, tx)?;
    log::info!("listening on {} (Ctrl+C to quit)", input.name());

    let mut batcher = FrameBatcher::new(config::batch_window());
    let mut tree = PresetTree::default();
    loop {
        match recv_until_flush(&rx, &mut batcher) {
            Some(frames) => {
                tree = merge_batch(tree, &frames);
                print_tree(&tree);
            }
            None => break, // input went away
        }
    }
    Ok(())
}

fn request(preset: &str, port: Option<String>, timeout: Duration) -> anyhow::Result<()> {
    let id: PresetId = preset.parse()?;
    let filter = port.unwrap_or_else(|| config::port_name().to_string());

    let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(256);
    let _input = midi::DeviceInput::open(&filter, tx)?;
    let mut output = midi::DeviceOutput::open(&filter)?;

    let frame = sysex::request_frame(id);
    log::info!("requesting preset {id}: {}", sysex::hex(&frame));
    output.send(&frame)?;

    let mut batcher = FrameBatcher::new(config::batch_window());
    let give_up = Instant::now() + timeout;
    loop {
        // once a burst has started, wait for its flush even past give_up
        if batcher.deadline().is_none() && Instant::now() >= give_up {
            anyhow::bail!("no reply from device within {}s", timeout.as_secs());
        }
        let wait = match batcher.deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => give_up
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250)),
        };
        match rx.recv_timeout(wait) {
            Ok(message) => batcher.push(message, Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => anyhow::bail!("MIDI input disconnected"),
        }
        if let Some(frames) = batcher.poll(Instant::now()) {
            let tree = merge_batch(PresetTree::default(), &frames);
            print_tree(&tree);
            return Ok(());
        }
    }
}

/// Block on the channel until the batcher releases a batch. The receive
/// timeout tracks the batcher deadline so a quiet input flushes promptly.
/// Returns None when the channel is disconnected.
fn recv_until_flush(
    rx: &crossbeam_channel::Receiver<Vec<u8>>,
    batcher: &mut FrameBatcher,
) -> Option<Vec<Vec<u8>>> {
    loop {
        let timeout = match batcher.deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_millis(250),
        };
        match rx.recv_timeout(timeout) {
            Ok(frame) => batcher.push(frame, Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                batcher.cancel();
                return None;
            }
        }
        if let Some(frames) = batcher.poll(Instant::now()) {
            return Some(frames);
        }
    }
}

/// Validate, parse and merge one flushed batch, in arrival order.
fn merge_batch(mut tree: PresetTree, frames: &[Vec<u8>]) -> PresetTree {
    let mut bytes = 0;
    for frame in frames {
        bytes += frame.len();
        if !sysex::is_sysex_frame(frame) {
            log::debug!("ignoring non-sysex message ({} bytes)", frame.len());
            continue;
        }
        match sysex::parse_frame(frame) {
            Ok(fragment) => tree = tree.merge(fragment),
            Err(e) => log::warn!("dropping frame: {e}"),
        }
    }
    log::info!("{} message(s) received ({bytes} bytes)", frames.len());
    tree
}

fn print_tree(tree: &PresetTree) {
    if tree.is_empty() {
        println!("(no presets decoded yet)");
        return;
    }
    for (id, preset) in tree.presets() {
        let name = preset.name.as_deref().unwrap_or("?");
        let status = if preset.is_complete() {
            String::new()
        } else {
            format!("  [incomplete: {}/{} slots]", preset.midi.len(), preset::MIDI_SLOTS)
        };
        println!("{id:>3}  {name:5}{status}");
        let mut off = 0;
        for (slot, setting) in &preset.midi {
            if !setting.active {
                off += 1;
                continue;
            }
            let dirty = if setting.changed { " *" } else { "" };
            println!(
                "     [{slot:2}] ch {:2}  {:8} {:5} {:5} {:5}{dirty}",
                setting.channel + 1,
                setting.msg_type.to_string(),
                setting.data[0],
                setting.data[1],
                setting.data[2],
            );
        }
        if off > 0 {
            println!("     ({off} slot(s) off)");
        }
    }
}

fn parse_msg_type(arg: &str) -> anyhow::Result<MsgType> {
    let code = match arg {
        "off" => return Ok(MsgType::Off),
        "note" => return Ok(MsgType::Note),
        "pc" => return Ok(MsgType::ProgramBank),
        "cc" => return Ok(MsgType::ControlChange),
        "bend" => return Ok(MsgType::PitchBend),
        other => match other.strip_prefix("0x") {
            Some(hexnum) => u8::from_str_radix(hexnum, 16)?,
            None => other.parse()?,
        },
    };
    if code >= 0x80 {
        anyhow::bail!("message type code {code:#04x} is not a 7-bit value");
    }
    Ok(MsgType::from_code(code))
}

fn parse_data_arg(arg: &str) -> anyhow::Result<(usize, u16)> {
    let (param, value) = arg
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected PARAM=VALUE, got {arg:?}"))?;
    Ok((param.trim().parse()?, value.trim().parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::preset::{MidiSetting, Preset};

    fn sample_tree() -> PresetTree {
        let mut preset = Preset {
            name: Some("LOOP".into()),
            ..Preset::default()
        };
        for slot in 0..preset::MIDI_SLOTS as u8 {
            preset
                .midi
                .insert(slot, MidiSetting::new(0, MsgType::ControlChange, [20, 0, 127]));
        }
        PresetTree::default().merge(PresetTree::fragment(
            PresetId::new(9).unwrap(),
            preset,
        ))
    }

    #[test]
    fn load_dump_round_trips_a_written_file() {
        let tree = sample_tree();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&sysex::write_dump(&tree)).unwrap();
        let loaded = load_dump(file.path().to_str().unwrap()).unwrap();
        assert_eq!(loaded, tree);
    }

    #[test]
    fn load_dump_rejects_non_sysex_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"MThd\x00\x00\x00\x06").unwrap();
        assert!(load_dump(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn msg_type_argument_forms() {
        assert_eq!(parse_msg_type("off").unwrap(), MsgType::Off);
        assert_eq!(parse_msg_type("cc").unwrap(), MsgType::ControlChange);
        assert_eq!(parse_msg_type("0x48").unwrap(), MsgType::PitchBend);
        assert_eq!(parse_msg_type("64").unwrap(), MsgType::Note);
        assert!(parse_msg_type("0x80").is_err());
        assert!(parse_msg_type("bogus").is_err());
    }

    #[test]
    fn data_argument_form() {
        assert_eq!(parse_data_arg("2=8192").unwrap(), (2, 8192));
        assert!(parse_data_arg("8192").is_err());
    }
}
