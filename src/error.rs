use std::fmt;

/// Codec-level errors. Frames that are simply not ours (wrong signature,
/// not SysEx at all) are not errors; the validator just returns false and
/// the frame is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Preset name is not "0" or a bank letter A-D followed by a digit 1-6.
    InvalidName(String),
    /// Numeric preset index outside 0..=24.
    IndexOutOfRange(u8),
    /// A frame that carries our signature but whose payload does not match
    /// the expected layout (wrong length, byte >= 0x80, bad checksum, ...).
    MalformedPayload(String),
    /// The addressed preset does not have all 16 MIDI slots yet.
    IncompletePreset { index: u8, slots: usize },
    /// Preset names are limited to 5 characters by the hardware display.
    NameTooLong(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidName(name) => {
                write!(f, "invalid preset name {name:?} (expected \"0\" or A1..D6)")
            }
            Error::IndexOutOfRange(index) => {
                write!(f, "preset index {index} out of range 0..=24")
            }
            Error::MalformedPayload(reason) => write!(f, "malformed sysex payload: {reason}"),
            Error::IncompletePreset { index, slots } => {
                write!(f, "preset {index} is incomplete ({slots}/16 MIDI slots received)")
            }
            Error::NameTooLong(name) => {
                write!(f, "preset name {name:?} too long (max 5 characters)")
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
