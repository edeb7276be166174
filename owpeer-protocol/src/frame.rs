//! Frame codec for the owpeer bus.
//!
//! Frame format (always exactly 4 bytes):
//! - SELECTOR (high nibble of byte 0): message kind, or a USB-MIDI code index
//! - PEER/SEQ (low nibble of byte 0): addressed peer, or MIDI sequence/cable
//! - PAYLOAD (bytes 1-3): kind-specific data
//!
//! Any 4-byte value is a structurally valid frame. Whether it means anything
//! is decided by [`Frame::class`] and the object decoders.

use crate::midi::CodeIndex;

/// Size of a frame on the wire
pub const FRAME_SIZE: usize = 4;

/// Payload bytes carried by every frame (bytes 1-3)
pub const PAYLOAD_SIZE: usize = FRAME_SIZE - 1;

// Selector bytes, peer nibble cleared
pub const SELECTOR_BUTTON: u8 = 0x90;
pub const SELECTOR_DISCOVER: u8 = 0xA0;
pub const SELECTOR_PARAMETER: u8 = 0xB0;
pub const SELECTOR_COMMAND: u8 = 0xC0;
pub const SELECTOR_MESSAGE: u8 = 0xD0;
pub const SELECTOR_DATA: u8 = 0xE0;
pub const SELECTOR_RESET: u8 = 0xF0;

/// Lowest selector nibble reserved for protocol kinds
const FIRST_PROTOCOL_NIBBLE: u8 = SELECTOR_BUTTON >> 4;

/// Peer id of a device that has not been assigned one yet
pub const NO_UID: u8 = 0xFF;

/// 4-bit identifier of a device on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Peer(u8);

impl Peer {
    /// Number of addressable peers
    pub const COUNT: usize = 16;

    /// Create a peer id, `None` if it does not fit in 4 bits
    pub const fn new(id: u8) -> Option<Self> {
        if id < Self::COUNT as u8 {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Take the low nibble of `byte` as a peer id
    pub const fn from_nibble(byte: u8) -> Self {
        Self(byte & 0x0F)
    }

    /// Raw peer id (0-15)
    pub const fn id(self) -> u8 {
        self.0
    }

    /// Peer id as a table index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Next peer along a discovery chain (wraps at 15)
    pub const fn next(self) -> Self {
        Self::from_nibble(self.0.wrapping_add(1))
    }

    /// Previous peer along a discovery chain (wraps at 0)
    pub const fn prev(self) -> Self {
        Self::from_nibble(self.0.wrapping_sub(1))
    }
}

/// Protocol message kinds that carry a selector
///
/// MIDI events are not part of this enumeration; they are recognised
/// structurally by [`Frame::class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ObjectKind {
    Button,
    Discover,
    Parameter,
    Command,
    Message,
    Data,
    Reset,
}

impl ObjectKind {
    /// Selector byte for this kind, peer nibble cleared
    pub const fn selector(self) -> u8 {
        match self {
            ObjectKind::Button => SELECTOR_BUTTON,
            ObjectKind::Discover => SELECTOR_DISCOVER,
            ObjectKind::Parameter => SELECTOR_PARAMETER,
            ObjectKind::Command => SELECTOR_COMMAND,
            ObjectKind::Message => SELECTOR_MESSAGE,
            ObjectKind::Data => SELECTOR_DATA,
            ObjectKind::Reset => SELECTOR_RESET,
        }
    }

    /// Look up a kind by its selector nibble (0-15)
    pub const fn from_nibble(nibble: u8) -> Option<Self> {
        match (nibble & 0x0F) << 4 {
            SELECTOR_BUTTON => Some(ObjectKind::Button),
            SELECTOR_DISCOVER => Some(ObjectKind::Discover),
            SELECTOR_PARAMETER => Some(ObjectKind::Parameter),
            SELECTOR_COMMAND => Some(ObjectKind::Command),
            SELECTOR_MESSAGE => Some(ObjectKind::Message),
            SELECTOR_DATA => Some(ObjectKind::Data),
            SELECTOR_RESET => Some(ObjectKind::Reset),
            _ => None,
        }
    }

    /// Returns true for kinds that span several frames
    pub const fn is_streaming(self) -> bool {
        matches!(self, ObjectKind::Data | ObjectKind::Message)
    }
}

/// What a frame is, judged from byte 0 alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameClass {
    /// Selector in the protocol range (0x9-0xF)
    Object(ObjectKind),
    /// USB-MIDI event packet (code index 0x2-0x8)
    Midi(CodeIndex),
    /// Reserved code index (0x0, 0x1); carries the nibble for reporting
    Unrecognized(u8),
}

/// One 4-byte unit of the bus protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    bytes: [u8; FRAME_SIZE],
}

impl Frame {
    /// Create an all-zero frame
    pub const fn new() -> Self {
        Self {
            bytes: [0; FRAME_SIZE],
        }
    }

    /// Wrap 4 raw bytes
    pub const fn from_bytes(bytes: [u8; FRAME_SIZE]) -> Self {
        Self { bytes }
    }

    /// Create a frame with the given header byte and payload
    pub const fn with_payload(header: u8, payload: [u8; PAYLOAD_SIZE]) -> Self {
        Self {
            bytes: [header, payload[0], payload[1], payload[2]],
        }
    }

    /// Overwrite all four bytes
    pub fn fill(&mut self, b0: u8, b1: u8, b2: u8, b3: u8) {
        self.bytes = [b0, b1, b2, b3];
    }

    /// Overwrite bytes 1-3, leaving the header untouched
    pub fn fill_payload(&mut self, b1: u8, b2: u8, b3: u8) {
        self.bytes[1] = b1;
        self.bytes[2] = b2;
        self.bytes[3] = b3;
    }

    /// Overwrite byte 0
    pub fn set_header(&mut self, header: u8) {
        self.bytes[0] = header;
    }

    /// Raw frame bytes
    pub const fn bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.bytes
    }

    /// Raw frame bytes, for reading straight from the link
    pub fn bytes_mut(&mut self) -> &mut [u8; FRAME_SIZE] {
        &mut self.bytes
    }

    /// Byte 0
    pub const fn header(&self) -> u8 {
        self.bytes[0]
    }

    /// Bytes 1-3
    pub const fn payload(&self) -> [u8; PAYLOAD_SIZE] {
        [self.bytes[1], self.bytes[2], self.bytes[3]]
    }

    /// High nibble of byte 0
    pub const fn selector(&self) -> u8 {
        self.bytes[0] >> 4
    }

    /// Low nibble of byte 0 (peer id or MIDI sequence)
    pub const fn seq(&self) -> u8 {
        self.bytes[0] & 0x0F
    }

    /// Low nibble of byte 0 read as a peer id
    pub const fn peer(&self) -> Peer {
        Peer::from_nibble(self.bytes[0])
    }

    /// Classify this frame by its selector nibble
    ///
    /// Nibbles 0x9-0xF are protocol kinds, 0x2-0x8 are USB-MIDI code indices
    /// passed through verbatim, and the reserved code indices 0x0-0x1 are
    /// unrecognized. Every byte 0 value falls in exactly one class.
    pub const fn class(&self) -> FrameClass {
        let nibble = self.selector();
        if nibble >= FIRST_PROTOCOL_NIBBLE {
            match ObjectKind::from_nibble(nibble) {
                Some(kind) => FrameClass::Object(kind),
                None => FrameClass::Unrecognized(nibble),
            }
        } else {
            match CodeIndex::from_nibble(nibble) {
                Some(cin) => FrameClass::Midi(cin),
                None => FrameClass::Unrecognized(nibble),
            }
        }
    }

    /// Returns true if this frame is a MIDI passthrough packet
    pub const fn is_midi(&self) -> bool {
        matches!(self.class(), FrameClass::Midi(_))
    }
}

impl From<[u8; FRAME_SIZE]> for Frame {
    fn from(bytes: [u8; FRAME_SIZE]) -> Self {
        Self::from_bytes(bytes)
    }
}
