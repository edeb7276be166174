//! Protocol objects for the owpeer bus
//!
//! Every kind except Data and Message fits in a single frame and converts
//! with one `decode`/`encode` call. Data and Message span several frames;
//! their frame-by-frame codecs live in [`crate::stream`].
//!
//! Multi-byte fields are big-endian on the wire. Signed 16-bit values are
//! sent as their two's-complement byte pair.

use heapless::Vec;

use crate::arena::PayloadBuf;
use crate::frame::{Frame, FrameClass, ObjectKind, Peer, PAYLOAD_SIZE, SELECTOR_RESET};
use crate::midi::CodeIndex;
use crate::stream::{DataFrames, MessageFrames};

/// Maximum text length of a Message
pub const MAX_MESSAGE_LEN: usize = 256;

/// Largest Data length the 24-bit header can describe
pub const MAX_DATA_LEN: usize = 0x00FF_FFFF;

/// Mask for 24-bit fields (Discover token, Data length)
const MASK_24: u32 = 0x00FF_FFFF;

/// Errors from single-frame decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// Frame selector does not belong to the decoder's kind
    UnexpectedSelector { expected: u8, found: u8 },
    /// Frame is not a MIDI passthrough packet
    NotMidi { found: u8 },
    /// Selector matches no known kind and no usable MIDI code index
    Unrecognized { found: u8 },
    /// Frame belongs to a multi-frame kind and needs a stream decoder
    StreamingKind(ObjectKind),
    /// Continuation frame addressed to a different peer
    PeerMismatch { expected: Peer, found: Peer },
}

/// Check that `frame` carries the selector of `kind`
pub(crate) fn expect_kind(frame: &Frame, kind: ObjectKind) -> Result<(), DecodeError> {
    let expected = kind.selector() >> 4;
    if frame.selector() == expected {
        Ok(())
    } else {
        Err(DecodeError::UnexpectedSelector {
            expected,
            found: frame.selector(),
        })
    }
}

/// Read a big-endian 24-bit value from the frame payload
pub(crate) fn read_u24(frame: &Frame) -> u32 {
    let [b1, b2, b3] = frame.payload();
    u32::from_be_bytes([0, b1, b2, b3])
}

/// Frame carrying a big-endian 24-bit value
pub(crate) fn write_u24(header: u8, value: u32) -> Frame {
    let [_, b1, b2, b3] = (value & MASK_24).to_be_bytes();
    Frame::with_payload(header, [b1, b2, b3])
}

/// Split an `[id][value hi][value lo]` payload
fn read_id_value(frame: &Frame) -> (u8, i16) {
    let [id, hi, lo] = frame.payload();
    (id, i16::from_be_bytes([hi, lo]))
}

fn write_id_value(header: u8, id: u8, value: i16) -> Frame {
    let [hi, lo] = value.to_be_bytes();
    Frame::with_payload(header, [id, hi, lo])
}

/// Peer discovery with a 24-bit token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Discover {
    pub peer: Peer,
    pub token: u32,
}

impl Discover {
    /// Create a discover object; the token is truncated to 24 bits
    pub fn new(peer: Peer, token: u32) -> Self {
        Self {
            peer,
            token: token & MASK_24,
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        expect_kind(frame, ObjectKind::Discover)?;
        Ok(Self::new(frame.peer(), read_u24(frame)))
    }

    pub fn encode(&self) -> Frame {
        write_u24(ObjectKind::Discover.selector() | self.peer.id(), self.token)
    }

    /// Discover object to forward to the next peer in the chain
    pub fn forward(&self) -> Self {
        Self {
            peer: self.peer.next(),
            token: self.token,
        }
    }
}

/// Bus reset request
///
/// Carries no payload. On the wire all four bytes equal the reset selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reset;

impl Reset {
    /// Accepts any frame with the reset selector and ignores its content
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        expect_kind(frame, ObjectKind::Reset)?;
        Ok(Reset)
    }

    pub fn encode(&self) -> Frame {
        Frame::from_bytes([SELECTOR_RESET; 4])
    }
}

/// USB-MIDI event packet forwarded verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Midi {
    pub packet: [u8; 4],
}

impl Midi {
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        if !frame.is_midi() {
            return Err(DecodeError::NotMidi {
                found: frame.selector(),
            });
        }
        Ok(Self {
            packet: *frame.bytes(),
        })
    }

    pub fn encode(&self) -> Frame {
        Frame::from_bytes(self.packet)
    }

    /// Code index of the packet, if it is usable on the bus
    pub fn code_index(&self) -> Option<CodeIndex> {
        CodeIndex::from_nibble(self.packet[0] >> 4)
    }

    /// Sequence/cable nibble
    pub fn seq(&self) -> u8 {
        self.packet[0] & 0x0F
    }

    /// The MIDI bytes of the packet, trimmed to the code index length
    pub fn midi_bytes(&self) -> &[u8] {
        let len = self.code_index().map_or(PAYLOAD_SIZE, CodeIndex::midi_len);
        &self.packet[1..1 + len]
    }
}

/// Button state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Button {
    pub peer: Peer,
    pub id: u8,
    pub value: i16,
}

impl Button {
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        expect_kind(frame, ObjectKind::Button)?;
        let (id, value) = read_id_value(frame);
        Ok(Self {
            peer: frame.peer(),
            id,
            value,
        })
    }

    pub fn encode(&self) -> Frame {
        write_id_value(
            ObjectKind::Button.selector() | self.peer.id(),
            self.id,
            self.value,
        )
    }
}

/// Parameter value change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Parameter {
    pub peer: Peer,
    pub id: u8,
    pub value: i16,
}

impl Parameter {
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        expect_kind(frame, ObjectKind::Parameter)?;
        let (id, value) = read_id_value(frame);
        Ok(Self {
            peer: frame.peer(),
            id,
            value,
        })
    }

    pub fn encode(&self) -> Frame {
        write_id_value(
            ObjectKind::Parameter.selector() | self.peer.id(),
            self.id,
            self.value,
        )
    }
}

/// Device command with a 16-bit argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command {
    pub peer: Peer,
    pub code: u8,
    pub data: i16,
}

impl Command {
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        expect_kind(frame, ObjectKind::Command)?;
        let (code, data) = read_id_value(frame);
        Ok(Self {
            peer: frame.peer(),
            code,
            data,
        })
    }

    pub fn encode(&self) -> Frame {
        write_id_value(
            ObjectKind::Command.selector() | self.peer.id(),
            self.code,
            self.data,
        )
    }
}

/// Length-prefixed byte payload
#[derive(Debug, PartialEq, Eq)]
pub struct Data {
    peer: Peer,
    payload: PayloadBuf,
}

impl Data {
    /// Wrap an arena buffer; `None` if it is longer than a header can carry
    pub fn new(peer: Peer, payload: PayloadBuf) -> Option<Self> {
        if payload.len() > MAX_DATA_LEN {
            return None;
        }
        Some(Self { peer, payload })
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Length announced by a Data header frame
    pub fn declared_len(header: &Frame) -> Result<usize, DecodeError> {
        expect_kind(header, ObjectKind::Data)?;
        Ok(read_u24(header) as usize)
    }

    /// Header frame announcing this payload's length
    pub fn encode(&self) -> Frame {
        write_u24(
            ObjectKind::Data.selector() | self.peer.id(),
            self.payload.len() as u32,
        )
    }

    /// Every frame of this object: header, then 3-byte chunks
    pub fn frames(&self) -> DataFrames<'_> {
        DataFrames::new(self)
    }

    pub(crate) fn from_parts(peer: Peer, payload: PayloadBuf) -> Self {
        Self { peer, payload }
    }
}

/// Bounded text message
///
/// Text ends at the first zero byte or at [`MAX_MESSAGE_LEN`] bytes,
/// whichever comes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    peer: Peer,
    text: Vec<u8, MAX_MESSAGE_LEN>,
}

impl Message {
    /// Create a message from the leading non-zero bytes of `text`
    pub fn new(peer: Peer, text: &[u8]) -> Self {
        let bounded = &text[..text.len().min(MAX_MESSAGE_LEN)];
        let len = bounded.iter().position(|&b| b == 0).unwrap_or(bounded.len());

        let mut stored = Vec::new();
        // Cannot fail: len <= MAX_MESSAGE_LEN
        let _ = stored.extend_from_slice(&bounded[..len]);
        Self { peer, text: stored }
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    /// Text as UTF-8, if it is valid
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.text).ok()
    }

    /// Every frame of this message, ending with the zero terminator
    pub fn frames(&self) -> MessageFrames<'_> {
        MessageFrames::new(self)
    }

    pub(crate) fn from_parts(peer: Peer, text: Vec<u8, MAX_MESSAGE_LEN>) -> Self {
        Self { peer, text }
    }
}

/// A decoded protocol object
#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolObject {
    Discover(Discover),
    Reset(Reset),
    Midi(Midi),
    Button(Button),
    Parameter(Parameter),
    Command(Command),
    Data(Data),
    Message(Message),
}

impl Default for ProtocolObject {
    fn default() -> Self {
        ProtocolObject::Reset(Reset)
    }
}

impl ProtocolObject {
    /// Decode a single-frame object
    ///
    /// Data and Message frames are rejected with
    /// [`DecodeError::StreamingKind`]; they need a stream decoder.
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        match frame.class() {
            FrameClass::Midi(_) => Midi::decode(frame).map(ProtocolObject::Midi),
            FrameClass::Object(ObjectKind::Discover) => {
                Discover::decode(frame).map(ProtocolObject::Discover)
            }
            FrameClass::Object(ObjectKind::Reset) => Reset::decode(frame).map(ProtocolObject::Reset),
            FrameClass::Object(ObjectKind::Button) => {
                Button::decode(frame).map(ProtocolObject::Button)
            }
            FrameClass::Object(ObjectKind::Parameter) => {
                Parameter::decode(frame).map(ProtocolObject::Parameter)
            }
            FrameClass::Object(ObjectKind::Command) => {
                Command::decode(frame).map(ProtocolObject::Command)
            }
            FrameClass::Object(kind @ (ObjectKind::Data | ObjectKind::Message)) => {
                Err(DecodeError::StreamingKind(kind))
            }
            FrameClass::Unrecognized(nibble) => Err(DecodeError::Unrecognized { found: nibble }),
        }
    }

    /// Protocol kind; `None` for MIDI, which carries no selector
    pub fn kind(&self) -> Option<ObjectKind> {
        match self {
            ProtocolObject::Discover(_) => Some(ObjectKind::Discover),
            ProtocolObject::Reset(_) => Some(ObjectKind::Reset),
            ProtocolObject::Midi(_) => None,
            ProtocolObject::Button(_) => Some(ObjectKind::Button),
            ProtocolObject::Parameter(_) => Some(ObjectKind::Parameter),
            ProtocolObject::Command(_) => Some(ObjectKind::Command),
            ProtocolObject::Data(_) => Some(ObjectKind::Data),
            ProtocolObject::Message(_) => Some(ObjectKind::Message),
        }
    }

    /// Addressed peer, for peer-addressed kinds
    pub fn peer(&self) -> Option<Peer> {
        match self {
            ProtocolObject::Discover(d) => Some(d.peer),
            ProtocolObject::Button(b) => Some(b.peer),
            ProtocolObject::Parameter(p) => Some(p.peer),
            ProtocolObject::Command(c) => Some(c.peer),
            ProtocolObject::Data(d) => Some(d.peer()),
            ProtocolObject::Message(m) => Some(m.peer()),
            ProtocolObject::Reset(_) | ProtocolObject::Midi(_) => None,
        }
    }

    /// Every frame this object encodes to, in transmit order
    pub fn frames(&self) -> ObjectFrames<'_> {
        match self {
            ProtocolObject::Discover(d) => ObjectFrames::Single(Some(d.encode())),
            ProtocolObject::Reset(r) => ObjectFrames::Single(Some(r.encode())),
            ProtocolObject::Midi(m) => ObjectFrames::Single(Some(m.encode())),
            ProtocolObject::Button(b) => ObjectFrames::Single(Some(b.encode())),
            ProtocolObject::Parameter(p) => ObjectFrames::Single(Some(p.encode())),
            ProtocolObject::Command(c) => ObjectFrames::Single(Some(c.encode())),
            ProtocolObject::Data(d) => ObjectFrames::Data(d.frames()),
            ProtocolObject::Message(m) => ObjectFrames::Message(m.frames()),
        }
    }
}

/// Frame iterator over any protocol object
#[derive(Debug)]
pub enum ObjectFrames<'a> {
    Single(Option<Frame>),
    Data(DataFrames<'a>),
    Message(MessageFrames<'a>),
}

impl Iterator for ObjectFrames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        match self {
            ObjectFrames::Single(frame) => frame.take(),
            ObjectFrames::Data(frames) => frames.next(),
            ObjectFrames::Message(frames) => frames.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            ObjectFrames::Single(frame) => {
                let n = usize::from(frame.is_some());
                (n, Some(n))
            }
            ObjectFrames::Data(frames) => frames.size_hint(),
            ObjectFrames::Message(frames) => frames.size_hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn peer(id: u8) -> Peer {
        Peer::new(id).unwrap()
    }

    #[test]
    fn test_discover_example() {
        let discover = Discover::new(peer(3), 0x010203);
        let frame = discover.encode();
        assert_eq!(frame.bytes(), &[0xA3, 0x01, 0x02, 0x03]);

        let decoded = Discover::decode(&frame).unwrap();
        assert_eq!(decoded.peer, peer(3));
        assert_eq!(decoded.token, 0x010203);
    }

    #[test]
    fn test_discover_forward() {
        let discover = Discover::new(peer(15), 42);
        let next = discover.forward();
        assert_eq!(next.peer, peer(0));
        assert_eq!(next.token, 42);
    }

    #[test]
    fn test_reset_frame() {
        let frame = Reset.encode();
        assert_eq!(frame.bytes(), &[0xF0; 4]);
        // Content is ignored
        assert_eq!(Reset::decode(&Frame::from_bytes([0xF7, 1, 2, 3])), Ok(Reset));
    }

    #[test]
    fn test_wrong_selector_rejected() {
        let frame = Button {
            peer: peer(1),
            id: 2,
            value: 3,
        }
        .encode();
        assert_eq!(
            Parameter::decode(&frame),
            Err(DecodeError::UnexpectedSelector {
                expected: 0xB,
                found: 0x9
            })
        );
        assert_eq!(Midi::decode(&frame), Err(DecodeError::NotMidi { found: 0x9 }));
    }

    #[test]
    fn test_negative_value_bytes() {
        let frame = Parameter {
            peer: peer(2),
            id: 7,
            value: -2,
        }
        .encode();
        assert_eq!(frame.bytes(), &[0xB2, 7, 0xFF, 0xFE]);
        assert_eq!(Parameter::decode(&frame).unwrap().value, -2);
    }

    #[test]
    fn test_midi_passthrough() {
        // Note Off, cable 1, note 60, velocity 0
        let frame = Frame::from_bytes([0x81, 0x80, 60, 0]);
        let midi = Midi::decode(&frame).unwrap();
        assert_eq!(midi.code_index(), Some(CodeIndex::NoteOff));
        assert_eq!(midi.seq(), 1);
        assert_eq!(midi.midi_bytes(), &[0x80, 60, 0]);
        assert_eq!(midi.encode(), frame);

        let end = Midi::decode(&Frame::from_bytes([0x50, 0xF7, 0, 0])).unwrap();
        assert_eq!(end.midi_bytes(), &[0xF7]);
    }

    #[test]
    fn test_protocol_object_dispatch() {
        let frame = Command {
            peer: peer(4),
            code: 0x10,
            data: 1000,
        }
        .encode();
        let object = ProtocolObject::decode(&frame).unwrap();
        assert_eq!(object.kind(), Some(ObjectKind::Command));
        assert_eq!(object.peer(), Some(peer(4)));

        let data_header = Frame::from_bytes([0xE4, 0, 0, 3]);
        assert_eq!(
            ProtocolObject::decode(&data_header),
            Err(DecodeError::StreamingKind(ObjectKind::Data))
        );

        let midi = ProtocolObject::decode(&Frame::from_bytes([0x30, 0xF2, 1, 2])).unwrap();
        assert_eq!(midi.kind(), None);
        assert_eq!(midi.peer(), None);
    }

    #[test]
    fn test_single_object_frames() {
        let object = ProtocolObject::Reset(Reset);
        let mut frames = object.frames();
        assert_eq!(frames.size_hint(), (1, Some(1)));
        assert_eq!(frames.next(), Some(Frame::from_bytes([0xF0; 4])));
        assert_eq!(frames.next(), None);
    }

    #[test]
    fn test_message_new_stops_at_zero() {
        let message = Message::new(peer(1), b"hi\0there");
        assert_eq!(message.as_bytes(), b"hi");
        assert_eq!(message.as_str(), Some("hi"));

        let long = [b'x'; MAX_MESSAGE_LEN + 10];
        assert_eq!(Message::new(peer(1), &long).len(), MAX_MESSAGE_LEN);
    }

    proptest! {
        #[test]
        fn prop_discover_roundtrip(id in 0u8..16, token in 0u32..=0x00FF_FFFF) {
            let original = Discover::new(peer(id), token);
            prop_assert_eq!(Discover::decode(&original.encode()), Ok(original));
        }

        #[test]
        fn prop_button_roundtrip(id in 0u8..16, bid: u8, value: i16) {
            let original = Button { peer: peer(id), id: bid, value };
            prop_assert_eq!(Button::decode(&original.encode()), Ok(original));
        }

        #[test]
        fn prop_parameter_roundtrip(id in 0u8..16, pid: u8, value: i16) {
            let original = Parameter { peer: peer(id), id: pid, value };
            prop_assert_eq!(Parameter::decode(&original.encode()), Ok(original));
        }

        #[test]
        fn prop_command_roundtrip(id in 0u8..16, code: u8, data: i16) {
            let original = Command { peer: peer(id), code, data };
            let frame = original.encode();
            prop_assert_eq!(frame.selector(), 0xC);
            prop_assert_eq!(Command::decode(&frame), Ok(original));
        }
    }
}
