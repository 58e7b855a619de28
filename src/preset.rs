use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Every preset has exactly this many MIDI-setting slots.
pub const MIDI_SLOTS: usize = 16;

/// Parameters carried by one MIDI setting (meaning depends on the message
/// type, e.g. controller number plus value range).
pub const DATA_PARAMS: usize = 3;

/// Hardware display limit for preset names.
pub const NAME_MAX: usize = 5;

/// Message-type code marking a slot as disabled.
pub const MSG_CTRL_OFF: u8 = 0x61;

/// Flat preset index as used on the wire: 0 is the currently active
/// preset, 1..=24 are the stored banks A1..D6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PresetId(u8);

impl PresetId {
    pub const CURRENT: PresetId = PresetId(0);

    pub fn new(index: u8) -> Result<Self> {
        if index <= 24 {
            Ok(PresetId(index))
        } else {
            Err(Error::IndexOutOfRange(index))
        }
    }

    pub fn index(self) -> u8 {
        self.0
    }
}

impl FromStr for PresetId {
    type Err = Error;

    /// Accepts "0" for the live preset, or a bank letter A-D followed by
    /// a slot digit 1-6: index = 1 + letter*6 + (digit - 1).
    fn from_str(s: &str) -> Result<Self> {
        if s == "0" {
            return Ok(PresetId::CURRENT);
        }
        let invalid = || Error::InvalidName(s.to_string());
        let mut chars = s.chars();
        let letter = chars.next().ok_or_else(invalid)?;
        let digit = chars.next().ok_or_else(invalid)?;
        if chars.next().is_some() {
            return Err(invalid());
        }
        let bank = match letter.to_ascii_uppercase() {
            'A' => 0u8,
            'B' => 1,
            'C' => 2,
            'D' => 3,
            _ => return Err(invalid()),
        };
        let slot = match digit {
            '1'..='6' => digit as u8 - b'1',
            _ => return Err(invalid()),
        };
        Ok(PresetId(1 + bank * 6 + slot))
    }
}

impl fmt::Display for PresetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.pad("0");
        }
        let bank = (self.0 - 1) / 6;
        let slot = (self.0 - 1) % 6;
        f.pad(&format!("{}{}", (b'A' + bank) as char, slot + 1))
    }
}

/// Top-level dump target tag. The Pacer also dumps other object kinds
/// (e.g. global settings); only presets are modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Target {
    Preset,
}

impl Target {
    pub fn code(self) -> u8 {
        match self {
            Target::Preset => 0x01,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Target::Preset),
            _ => None,
        }
    }
}

/// MIDI-setting message type. One reserved code marks the slot as off;
/// codes this tool does not know are carried through verbatim so a
/// decode/edit/re-encode cycle never destroys them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Off,
    Note,
    ProgramBank,
    ControlChange,
    PitchBend,
    Other(u8),
}

impl MsgType {
    pub fn from_code(code: u8) -> Self {
        match code {
            MSG_CTRL_OFF => MsgType::Off,
            0x40 => MsgType::Note,
            0x45 => MsgType::ProgramBank,
            0x47 => MsgType::ControlChange,
            0x48 => MsgType::PitchBend,
            other => MsgType::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            MsgType::Off => MSG_CTRL_OFF,
            MsgType::Note => 0x40,
            MsgType::ProgramBank => 0x45,
            MsgType::ControlChange => 0x47,
            MsgType::PitchBend => 0x48,
            MsgType::Other(code) => code,
        }
    }

    pub fn is_off(self) -> bool {
        self == MsgType::Off
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgType::Off => write!(f, "off"),
            MsgType::Note => write!(f, "note"),
            MsgType::ProgramBank => write!(f, "pc+bank"),
            MsgType::ControlChange => write!(f, "cc"),
            MsgType::PitchBend => write!(f, "bend"),
            MsgType::Other(code) => write!(f, "type {code:#04x}"),
        }
    }
}

/// One of the 16 MIDI settings of a preset. `active` is derived from the
/// message type and never authored independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiSetting {
    pub channel: u8,
    pub msg_type: MsgType,
    pub data: [u16; DATA_PARAMS],
    pub active: bool,
    pub changed: bool,
}

impl MidiSetting {
    pub fn new(channel: u8, msg_type: MsgType, data: [u16; DATA_PARAMS]) -> Self {
        MidiSetting {
            channel,
            msg_type,
            data,
            active: !msg_type.is_off(),
            changed: false,
        }
    }
}

/// One preset as accumulated from dump fragments. Fields arrive in
/// separate frames, so everything is optional until received; the preset
/// is complete (safe to edit) once all 16 slots are present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preset {
    pub name: Option<String>,
    pub midi: BTreeMap<u8, MidiSetting>,
    pub changed: bool,
}

impl Preset {
    pub fn is_complete(&self) -> bool {
        self.midi.len() == MIDI_SLOTS
    }

    /// Fold a fragment into this preset. Fields absent from the fragment
    /// survive untouched; slots present in the fragment replace the base
    /// slot wholesale (a freshly parsed slot thus clears its dirty flag).
    fn merge_from(&mut self, fragment: Preset) {
        if fragment.name.is_some() {
            self.name = fragment.name;
        }
        self.midi.extend(fragment.midi);
        self.changed |= fragment.changed;
    }
}

/// Accumulated dump state: target tag, then preset index, then preset.
/// Starts empty and grows only through `merge`; edits go through the
/// typed mutators below, which refuse invalid addresses instead of
/// creating malformed structure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetTree {
    targets: BTreeMap<Target, BTreeMap<PresetId, Preset>>,
}

impl PresetTree {
    /// A single-preset fragment, as produced by the dump parser.
    pub fn fragment(id: PresetId, preset: Preset) -> Self {
        let mut targets = BTreeMap::new();
        targets.insert(Target::Preset, BTreeMap::from([(id, preset)]));
        PresetTree { targets }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.values().all(|presets| presets.is_empty())
    }

    pub fn preset(&self, id: PresetId) -> Option<&Preset> {
        self.targets.get(&Target::Preset)?.get(&id)
    }

    /// Presets in index order.
    pub fn presets(&self) -> impl Iterator<Item = (PresetId, &Preset)> {
        self.targets
            .get(&Target::Preset)
            .into_iter()
            .flat_map(|presets| presets.iter().map(|(id, p)| (*id, p)))
    }

    /// Return a new snapshot with the fragment folded in. The receiver is
    /// left untouched, so readers of the previous snapshot are unaffected.
    /// Right-biased: where both carry the same field, the fragment wins.
    #[must_use]
    pub fn merge(&self, fragment: PresetTree) -> PresetTree {
        let mut next = self.clone();
        for (target, presets) in fragment.targets {
            let base = next.targets.entry(target).or_default();
            for (id, preset) in presets {
                base.entry(id).or_default().merge_from(preset);
            }
        }
        next
    }

    /// Rename a preset. Rejected before any mutation when the name exceeds
    /// the 5-character display limit or the preset is not complete yet.
    pub fn set_name(&mut self, id: PresetId, name: &str) -> Result<()> {
        if name.chars().count() > NAME_MAX {
            return Err(Error::NameTooLong(name.to_string()));
        }
        let preset = self.editable(id)?;
        preset.name = Some(name.to_string());
        preset.changed = true;
        Ok(())
    }

    pub fn set_channel(&mut self, id: PresetId, slot: u8, channel: u8) -> Result<()> {
        if channel > 15 {
            return Err(Error::MalformedPayload(format!(
                "MIDI channel {channel} out of range 0..=15"
            )));
        }
        let setting = self.slot_mut(id, slot)?;
        setting.channel = channel;
        setting.changed = true;
        Ok(())
    }

    /// Change a slot's message type. `active` is recomputed in the same
    /// mutation: the off code always forces it false.
    pub fn set_msg_type(&mut self, id: PresetId, slot: u8, msg_type: MsgType) -> Result<()> {
        let setting = self.slot_mut(id, slot)?;
        setting.msg_type = msg_type;
        setting.active = !msg_type.is_off();
        setting.changed = true;
        Ok(())
    }

    pub fn set_data(&mut self, id: PresetId, slot: u8, param: usize, value: u16) -> Result<()> {
        if param >= DATA_PARAMS {
            return Err(Error::IndexOutOfRange(param as u8));
        }
        if value > 0x3FFF {
            return Err(Error::MalformedPayload(format!(
                "data value {value} exceeds 14-bit range"
            )));
        }
        let setting = self.slot_mut(id, slot)?;
        setting.data[param] = value;
        setting.changed = true;
        Ok(())
    }

    fn editable(&mut self, id: PresetId) -> Result<&mut Preset> {
        let preset = self
            .targets
            .get_mut(&Target::Preset)
            .and_then(|presets| presets.get_mut(&id))
            .ok_or(Error::IncompletePreset { index: id.index(), slots: 0 })?;
        if !preset.is_complete() {
            return Err(Error::IncompletePreset {
                index: id.index(),
                slots: preset.midi.len(),
            });
        }
        Ok(preset)
    }

    fn slot_mut(&mut self, id: PresetId, slot: u8) -> Result<&mut MidiSetting> {
        if slot as usize >= MIDI_SLOTS {
            return Err(Error::IndexOutOfRange(slot));
        }
        let preset = self.editable(id)?;
        preset
            .midi
            .get_mut(&slot)
            .ok_or(Error::IndexOutOfRange(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_preset() -> Preset {
        let mut preset = Preset {
            name: Some("INIT".into()),
            ..Preset::default()
        };
        for slot in 0..MIDI_SLOTS as u8 {
            preset
                .midi
                .insert(slot, MidiSetting::new(0, MsgType::ControlChange, [16, 0, 127]));
        }
        preset
    }

    fn tree_with(id: PresetId) -> PresetTree {
        PresetTree::default().merge(PresetTree::fragment(id, complete_preset()))
    }

    #[test]
    fn name_index_bijection() {
        for index in 0..=24u8 {
            let id = PresetId::new(index).unwrap();
            let round: PresetId = id.to_string().parse().unwrap();
            assert_eq!(round.index(), index);
        }
        assert_eq!("0".parse::<PresetId>().unwrap(), PresetId::CURRENT);
        assert_eq!("A1".parse::<PresetId>().unwrap().index(), 1);
        assert_eq!("A6".parse::<PresetId>().unwrap().index(), 6);
        assert_eq!("B3".parse::<PresetId>().unwrap().index(), 9);
        assert_eq!("D6".parse::<PresetId>().unwrap().index(), 24);
    }

    #[test]
    fn invalid_names_rejected() {
        for name in ["", "E1", "A0", "A7", "A", "A12", "1A", "00"] {
            assert!(matches!(
                name.parse::<PresetId>(),
                Err(Error::InvalidName(_))
            ));
        }
        assert!(matches!(PresetId::new(25), Err(Error::IndexOutOfRange(25))));
    }

    #[test]
    fn merge_is_idempotent() {
        let id = PresetId::new(3).unwrap();
        let fragment = PresetTree::fragment(id, complete_preset());
        let once = PresetTree::default().merge(fragment.clone());
        let twice = once.merge(fragment);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_disjoint_fragments_in_any_order() {
        let a = PresetTree::fragment(PresetId::new(1).unwrap(), complete_preset());
        let b = PresetTree::fragment(PresetId::new(2).unwrap(), complete_preset());
        let ab = PresetTree::default().merge(a.clone()).merge(b.clone());
        let ba = PresetTree::default().merge(b).merge(a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn merge_same_address_is_right_biased() {
        let id = PresetId::new(5).unwrap();
        let first = PresetTree::fragment(
            id,
            Preset {
                name: Some("OLD".into()),
                ..Preset::default()
            },
        );
        let second = PresetTree::fragment(
            id,
            Preset {
                name: Some("NEW".into()),
                ..Preset::default()
            },
        );
        let tree = PresetTree::default().merge(first).merge(second);
        assert_eq!(tree.preset(id).unwrap().name.as_deref(), Some("NEW"));
    }

    #[test]
    fn merge_keeps_unrelated_base_fields() {
        let id = PresetId::new(7).unwrap();
        let base = PresetTree::default().merge(PresetTree::fragment(id, complete_preset()));
        // name-only fragment must not disturb the midi map
        let fragment = PresetTree::fragment(
            id,
            Preset {
                name: Some("NEW".into()),
                ..Preset::default()
            },
        );
        let merged = base.merge(fragment);
        let preset = merged.preset(id).unwrap();
        assert_eq!(preset.name.as_deref(), Some("NEW"));
        assert_eq!(preset.midi.len(), MIDI_SLOTS);
    }

    #[test]
    fn off_code_forces_inactive() {
        let id = PresetId::new(2).unwrap();
        let mut tree = tree_with(id);
        assert!(tree.preset(id).unwrap().midi[&4].active);
        tree.set_msg_type(id, 4, MsgType::Off).unwrap();
        let setting = &tree.preset(id).unwrap().midi[&4];
        assert!(!setting.active);
        assert!(setting.changed);
        tree.set_msg_type(id, 4, MsgType::Note).unwrap();
        assert!(tree.preset(id).unwrap().midi[&4].active);
    }

    #[test]
    fn long_name_rejected_without_mutation() {
        let id = PresetId::new(2).unwrap();
        let mut tree = tree_with(id);
        let before = tree.clone();
        assert!(matches!(
            tree.set_name(id, "TOOBIG"),
            Err(Error::NameTooLong(_))
        ));
        assert_eq!(tree, before);
    }

    #[test]
    fn editing_incomplete_preset_rejected() {
        let id = PresetId::new(2).unwrap();
        let mut partial = complete_preset();
        partial.midi.remove(&15);
        let mut tree = PresetTree::default().merge(PresetTree::fragment(id, partial));
        assert!(matches!(
            tree.set_name(id, "X"),
            Err(Error::IncompletePreset { index: 2, slots: 15 })
        ));
        assert!(matches!(
            tree.set_msg_type(PresetId::new(9).unwrap(), 0, MsgType::Off),
            Err(Error::IncompletePreset { index: 9, slots: 0 })
        ));
    }

    #[test]
    fn bad_slot_and_param_addresses_rejected() {
        let id = PresetId::new(2).unwrap();
        let mut tree = tree_with(id);
        assert!(matches!(
            tree.set_msg_type(id, 16, MsgType::Off),
            Err(Error::IndexOutOfRange(16))
        ));
        assert!(matches!(
            tree.set_data(id, 0, DATA_PARAMS, 1),
            Err(Error::IndexOutOfRange(_))
        ));
        assert!(tree.set_data(id, 0, 1, 0x4000).is_err());
        assert!(tree.set_channel(id, 0, 16).is_err());
    }
}
