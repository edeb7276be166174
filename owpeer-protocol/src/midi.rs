//! USB-MIDI code index numbers carried in MIDI passthrough frames
//!
//! A MIDI frame is a verbatim USB-MIDI event packet. The selector nibble
//! holds the code index, which tells how many of bytes 1-3 are MIDI data.
//! Code indices 0x9-0xF collide with the protocol selectors and are not
//! available on this bus.

/// Code index numbers usable on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodeIndex {
    /// Two-byte system common message (MTC, Song Select)
    SystemCommon2,
    /// Three-byte system common message (Song Position Pointer)
    SystemCommon3,
    /// SysEx starts or continues
    SysEx,
    /// SysEx ends with the following single byte
    SysExEnd1,
    /// SysEx ends with the following two bytes
    SysExEnd2,
    /// SysEx ends with the following three bytes
    SysExEnd3,
    /// Note Off
    NoteOff,
}

// Wire format values
pub const CIN_MISC: u8 = 0x00;
pub const CIN_CABLE_EVENT: u8 = 0x01;
const CIN_SYSTEM_COMMON_2: u8 = 0x02;
const CIN_SYSTEM_COMMON_3: u8 = 0x03;
const CIN_SYSEX: u8 = 0x04;
const CIN_SYSEX_END_1: u8 = 0x05;
const CIN_SYSEX_END_2: u8 = 0x06;
const CIN_SYSEX_END_3: u8 = 0x07;
const CIN_NOTE_OFF: u8 = 0x08;

impl CodeIndex {
    /// Parse a code index from a selector nibble
    pub const fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            CIN_SYSTEM_COMMON_2 => Some(CodeIndex::SystemCommon2),
            CIN_SYSTEM_COMMON_3 => Some(CodeIndex::SystemCommon3),
            CIN_SYSEX => Some(CodeIndex::SysEx),
            CIN_SYSEX_END_1 => Some(CodeIndex::SysExEnd1),
            CIN_SYSEX_END_2 => Some(CodeIndex::SysExEnd2),
            CIN_SYSEX_END_3 => Some(CodeIndex::SysExEnd3),
            CIN_NOTE_OFF => Some(CodeIndex::NoteOff),
            _ => None,
        }
    }

    /// Convert to the selector nibble
    pub const fn nibble(self) -> u8 {
        match self {
            CodeIndex::SystemCommon2 => CIN_SYSTEM_COMMON_2,
            CodeIndex::SystemCommon3 => CIN_SYSTEM_COMMON_3,
            CodeIndex::SysEx => CIN_SYSEX,
            CodeIndex::SysExEnd1 => CIN_SYSEX_END_1,
            CodeIndex::SysExEnd2 => CIN_SYSEX_END_2,
            CodeIndex::SysExEnd3 => CIN_SYSEX_END_3,
            CodeIndex::NoteOff => CIN_NOTE_OFF,
        }
    }

    /// Number of MIDI bytes the packet carries in bytes 1-3
    pub const fn midi_len(self) -> usize {
        match self {
            CodeIndex::SysExEnd1 => 1,
            CodeIndex::SystemCommon2 | CodeIndex::SysExEnd2 => 2,
            CodeIndex::SystemCommon3
            | CodeIndex::SysEx
            | CodeIndex::SysExEnd3
            | CodeIndex::NoteOff => 3,
        }
    }

    /// Returns true if this packet belongs to a SysEx transfer
    pub fn is_sysex(&self) -> bool {
        matches!(
            self,
            CodeIndex::SysEx | CodeIndex::SysExEnd1 | CodeIndex::SysExEnd2 | CodeIndex::SysExEnd3
        )
    }
}
