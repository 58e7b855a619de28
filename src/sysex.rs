//! Pacer SysEx wire format: frame validation, dump parsing, and update
//! message building.
//!
//! Protocol constants live in the table below. The exact command bytes and
//! message-type codes come from the device's published SysEx spec; fixing
//! them against newer documentation is a constants-only change, none of
//! the framing or field logic depends on particular values.
//!
//! Frame shape, bit-exact:
//!
//! `F0 00 01 77 7F <cmd> <tgt> <idx> <fields...> <chk> F7`
//!
//! Every byte between F0 and F7 is 7-bit. Data parameters wider than 7
//! bits travel as LSB-first byte pairs; `combine_u14`/`split_u14` are the
//! only recombination/splitting sites, used identically in both
//! directions.

use crate::error::{Error, Result};
use crate::preset::{
    DATA_PARAMS, MIDI_SLOTS, MidiSetting, MsgType, NAME_MAX, Preset, PresetId, PresetTree, Target,
};

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// Manufacturer ID (Nektar) plus device ID, immediately after the start
/// byte in every frame belonging to this device.
pub const SYSEX_SIGNATURE: [u8; 4] = [0x00, 0x01, 0x77, 0x7F];

/// Command bytes. Dump and update frames share a layout per command, so
/// the parser and the update builder round-trip through the same code.
pub const CMD_PRESET_NAME: u8 = 0x01;
pub const CMD_PRESET_SLOT: u8 = 0x02;
pub const CMD_PRESET_FULL: u8 = 0x03;
pub const CMD_PRESET_REQUEST: u8 = 0x04;

const SLOT_BODY_LEN: usize = 2 + 2 * DATA_PARAMS; // channel, msg_type, data pairs

/// True iff the buffer looks like the start of a sysex capture or file:
/// begins with F0 and ends with F7. Cheap screen before frame splitting.
pub fn is_sysex_data(bytes: &[u8]) -> bool {
    bytes.first() == Some(&SYSEX_START) && bytes.last() == Some(&SYSEX_END)
}

/// True iff the buffer is one well-formed frame of ours: F0, our
/// signature, F7. Foreign-vendor and malformed buffers are simply not
/// ours; this is pure classification, never an error.
pub fn is_sysex_frame(bytes: &[u8]) -> bool {
    bytes.len() > 2 + SYSEX_SIGNATURE.len()
        && bytes[0] == SYSEX_START
        && bytes[bytes.len() - 1] == SYSEX_END
        && bytes[1..=SYSEX_SIGNATURE.len()] == SYSEX_SIGNATURE
}

/// Iterator over the `F0..F7` spans of a raw buffer. A dump file holds
/// many concatenated frames; anything outside a span (noise, truncated
/// tail) is skipped.
pub fn frames(bytes: &[u8]) -> Frames<'_> {
    Frames { rest: bytes }
}

pub struct Frames<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let start = self.rest.iter().position(|&b| b == SYSEX_START)?;
        let after_start = &self.rest[start..];
        match after_start.iter().position(|&b| b == SYSEX_END) {
            Some(end) => {
                let frame = &after_start[..=end];
                self.rest = &after_start[end + 1..];
                Some(frame)
            }
            None => {
                // unterminated frame, drop the remainder
                self.rest = &[];
                None
            }
        }
    }
}

/// 7-bit checksum over command + payload: the final payload byte makes
/// the sum 0 mod 128.
fn checksum(body: &[u8]) -> u8 {
    let sum: u32 = body.iter().map(|&b| u32::from(b)).sum();
    (0x80 - (sum % 0x80) as u8) & 0x7F
}

pub fn split_u14(value: u16) -> [u8; 2] {
    [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

pub fn combine_u14(lsb: u8, msb: u8) -> u16 {
    u16::from(lsb & 0x7F) | (u16::from(msb & 0x7F) << 7)
}

/// Assemble one outbound frame around a command byte and payload.
fn frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let len = 1 + SYSEX_SIGNATURE.len() + 1 + payload.len() + 2;
    let mut msg = Vec::with_capacity(len);
    msg.push(SYSEX_START);
    msg.extend_from_slice(&SYSEX_SIGNATURE);
    msg.push(cmd);
    msg.extend_from_slice(payload);
    let chk = checksum(&msg[1 + SYSEX_SIGNATURE.len()..]);
    msg.push(chk);
    msg.push(SYSEX_END);
    msg
}

/// Decode one validated frame into a single-preset fragment. Stateless
/// and idempotent: the same bytes always yield the same fragment.
pub fn parse_frame(bytes: &[u8]) -> Result<PresetTree> {
    let malformed = |reason: &str| Error::MalformedPayload(reason.to_string());
    if !is_sysex_frame(bytes) {
        return Err(malformed("not a frame for this device"));
    }
    let body = &bytes[1 + SYSEX_SIGNATURE.len()..bytes.len() - 1];
    // cmd, tgt, idx, checksum at minimum
    if body.len() < 4 {
        return Err(malformed("truncated frame"));
    }
    if let Some(&byte) = body.iter().find(|&&b| b >= 0x80) {
        return Err(Error::MalformedPayload(format!(
            "payload byte {byte:#04x} violates 7-bit encoding"
        )));
    }
    let sum: u32 = body.iter().map(|&b| u32::from(b)).sum();
    if sum % 0x80 != 0 {
        return Err(malformed("checksum mismatch"));
    }

    let cmd = body[0];
    let payload = &body[1..body.len() - 1];
    if Target::from_code(payload[0]).is_none() {
        return Err(Error::MalformedPayload(format!(
            "unsupported dump target {:#04x}",
            payload[0]
        )));
    }
    let id = PresetId::new(payload[1])
        .map_err(|_| Error::MalformedPayload(format!("preset index {} out of range", payload[1])))?;
    let fields = &payload[2..];

    let preset = match cmd {
        CMD_PRESET_NAME => {
            if fields.len() != NAME_MAX {
                return Err(malformed("bad name payload length"));
            }
            Preset {
                name: Some(decode_name(fields)),
                ..Preset::default()
            }
        }
        CMD_PRESET_SLOT => {
            if fields.len() != 1 + SLOT_BODY_LEN {
                return Err(malformed("bad slot payload length"));
            }
            let slot = fields[0];
            if slot as usize >= MIDI_SLOTS {
                return Err(Error::MalformedPayload(format!("slot {slot} out of range")));
            }
            let setting = decode_slot_body(&fields[1..])?;
            Preset {
                midi: [(slot, setting)].into(),
                ..Preset::default()
            }
        }
        CMD_PRESET_FULL => {
            if fields.len() != NAME_MAX + MIDI_SLOTS * SLOT_BODY_LEN {
                return Err(malformed("bad full-preset payload length"));
            }
            let mut preset = Preset {
                name: Some(decode_name(&fields[..NAME_MAX])),
                ..Preset::default()
            };
            for slot in 0..MIDI_SLOTS {
                let at = NAME_MAX + slot * SLOT_BODY_LEN;
                let setting = decode_slot_body(&fields[at..at + SLOT_BODY_LEN])?;
                preset.midi.insert(slot as u8, setting);
            }
            preset
        }
        other => {
            return Err(Error::MalformedPayload(format!(
                "unsupported command {other:#04x}"
            )));
        }
    };
    Ok(PresetTree::fragment(id, preset))
}

fn decode_name(bytes: &[u8]) -> String {
    let name: String = bytes.iter().map(|&b| b as char).collect();
    name.trim_end_matches([' ', '\0']).to_string()
}

fn decode_slot_body(body: &[u8]) -> Result<MidiSetting> {
    let channel = body[0];
    if channel > 15 {
        return Err(Error::MalformedPayload(format!(
            "MIDI channel {channel} out of range"
        )));
    }
    let msg_type = MsgType::from_code(body[1]);
    let mut data = [0u16; DATA_PARAMS];
    for (param, value) in data.iter_mut().enumerate() {
        let at = 2 + param * 2;
        *value = combine_u14(body[at], body[at + 1]);
    }
    Ok(MidiSetting::new(channel, msg_type, data))
}

/// Decode a whole capture or file: split into frames, skip frames that
/// are not ours, drop (with a warning) frames of ours that fail to parse,
/// and merge the rest in order.
pub fn parse_dump(bytes: &[u8]) -> PresetTree {
    let mut tree = PresetTree::default();
    for raw in frames(bytes) {
        if !is_sysex_frame(raw) {
            log::debug!("skipping foreign sysex frame ({} bytes)", raw.len());
            continue;
        }
        match parse_frame(raw) {
            Ok(fragment) => tree = tree.merge(fragment),
            Err(e) => log::warn!("dropping frame: {e}"),
        }
    }
    tree
}

fn encode_name(name: Option<&str>) -> [u8; NAME_MAX] {
    let mut out = [b' '; NAME_MAX];
    for (dst, ch) in out.iter_mut().zip(name.unwrap_or_default().bytes()) {
        *dst = ch & 0x7F;
    }
    out
}

fn push_slot_body(payload: &mut Vec<u8>, setting: &MidiSetting) {
    payload.push(setting.channel);
    payload.push(setting.msg_type.code());
    for &value in &setting.data {
        payload.extend_from_slice(&split_u14(value));
    }
}

/// One update frame per dirty MIDI slot of the addressed preset, in
/// ascending slot order. Unchanged slots emit nothing: the protocol is
/// diff-based to keep device flash writes and transfer time down.
pub fn midi_updates(id: PresetId, tree: &PresetTree) -> Vec<Vec<u8>> {
    let Some(preset) = tree.preset(id) else {
        return Vec::new();
    };
    preset
        .midi
        .iter()
        .filter(|(_, setting)| setting.changed)
        .map(|(&slot, setting)| {
            let mut payload = vec![Target::Preset.code(), id.index(), slot];
            push_slot_body(&mut payload, setting);
            frame(CMD_PRESET_SLOT, &payload)
        })
        .collect()
}

/// The name update frame, iff the preset-level dirty flag is set.
pub fn name_update(id: PresetId, tree: &PresetTree) -> Option<Vec<u8>> {
    let preset = tree.preset(id)?;
    if !preset.changed {
        return None;
    }
    let mut payload = vec![Target::Preset.code(), id.index()];
    payload.extend_from_slice(&encode_name(preset.name.as_deref()));
    Some(frame(CMD_PRESET_NAME, &payload))
}

/// Everything that must go to the device for this preset: slot updates
/// in ascending order, then the name update if any. The device processes
/// writes sequentially, so the order is fixed.
pub fn update_frames(id: PresetId, tree: &PresetTree) -> Vec<Vec<u8>> {
    let mut out = midi_updates(id, tree);
    out.extend(name_update(id, tree));
    out
}

/// The "send me this preset" request frame.
pub fn request_frame(id: PresetId) -> Vec<u8> {
    frame(CMD_PRESET_REQUEST, &[Target::Preset.code(), id.index()])
}

/// Encode every complete preset of the tree as full-preset frames, in
/// index order: the binary dump file format. Incomplete presets cannot
/// be represented and are skipped with a warning.
pub fn write_dump(tree: &PresetTree) -> Vec<u8> {
    let mut out = Vec::new();
    for (id, preset) in tree.presets() {
        if !preset.is_complete() {
            log::warn!(
                "not writing incomplete preset {id} ({}/{MIDI_SLOTS} slots)",
                preset.midi.len()
            );
            continue;
        }
        let mut payload = vec![Target::Preset.code(), id.index()];
        payload.extend_from_slice(&encode_name(preset.name.as_deref()));
        for setting in preset.midi.values() {
            push_slot_body(&mut payload, setting);
        }
        out.extend_from_slice(&frame(CMD_PRESET_FULL, &payload));
    }
    out
}

/// Hex rendering for frame previews and logs: "F0 00 01 77 ...".
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
