//! Fragmentation of Data and Message objects across frames
//!
//! Both kinds carry 3 bytes per frame but end differently:
//!
//! ```text
//! Data (count-terminated, L = 7):
//!   [E|p] [00 00 07]   header, 24-bit length
//!   [E|p] [d0 d1 d2]
//!   [E|p] [d3 d4 d5]
//!   [E|p] [d6 00 00]   partial chunk, zero-filled
//!
//! Message (zero-terminated, L = 6):
//!   [D|p] [t0 t1 t2]
//!   [D|p] [t3 t4 t5]
//!   [D|p] [00 00 00]   extra frame: L is a multiple of 3
//! ```
//!
//! A Data receiver counts bytes from the header and never sees a
//! terminator. A Message receiver stops at the first zero byte, so the
//! encoder always emits one.

use heapless::Vec;

use crate::arena::{ArenaError, PayloadArena, PayloadBuf};
use crate::frame::{Frame, ObjectKind, Peer, PAYLOAD_SIZE};
use crate::objects::{expect_kind, Data, DecodeError, Message, MAX_MESSAGE_LEN};

/// Errors from stream decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamError {
    /// Frame does not belong to this stream
    Decode(DecodeError),
    /// Header length could not be satisfied by the arena
    Arena(ArenaError),
    /// Frame fed to a stream that is already complete
    AlreadyDecoded,
    /// Object requested before its last frame arrived
    Incomplete,
}

impl From<DecodeError> for StreamError {
    fn from(e: DecodeError) -> Self {
        StreamError::Decode(e)
    }
}

impl From<ArenaError> for StreamError {
    fn from(e: ArenaError) -> Self {
        StreamError::Arena(e)
    }
}

/// Result of feeding one frame to a stream decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// More frames are needed
    Pending,
    /// The object is fully reassembled
    Complete,
}

/// Number of chunk frames that follow a Data header of `len` bytes
pub const fn data_chunk_frames(len: usize) -> usize {
    len.div_ceil(PAYLOAD_SIZE)
}

/// Number of frames a Message of `len` bytes encodes to
///
/// `ceil(len / 3)` chunks, plus a zero frame when `len` is a multiple of 3.
/// Both cases come to `len / 3 + 1`.
pub const fn message_frames(len: usize) -> usize {
    len / PAYLOAD_SIZE + 1
}

/// Check that a continuation frame belongs to `peer`'s stream of `kind`
fn expect_stream(frame: &Frame, kind: ObjectKind, peer: Peer) -> Result<(), DecodeError> {
    expect_kind(frame, kind)?;
    if frame.peer() != peer {
        return Err(DecodeError::PeerMismatch {
            expected: peer,
            found: frame.peer(),
        });
    }
    Ok(())
}

/// Reassembles a Data object from its header and chunk frames
#[derive(Debug)]
pub struct DataDecoder {
    peer: Peer,
    payload: PayloadBuf,
    filled: usize,
}

impl DataDecoder {
    /// Start a stream from a header frame, allocating the payload
    ///
    /// Fails with [`StreamError::Arena`] when the arena cannot hold the
    /// announced length. No decoder exists in that case, so nothing can be
    /// fed to it.
    pub fn begin(header: &Frame, arena: &'static PayloadArena) -> Result<Self, StreamError> {
        let len = Data::declared_len(header)?;
        let payload = arena.alloc(len)?;
        Ok(Self {
            peer: header.peer(),
            payload,
            filled: 0,
        })
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Announced payload length
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns true once every announced byte has been received
    pub fn is_decoded(&self) -> bool {
        self.filled == self.payload.len()
    }

    /// Chunk frames still expected
    pub fn remaining_frames(&self) -> usize {
        data_chunk_frames(self.payload.len() - self.filled)
    }

    /// Consume one chunk frame
    ///
    /// Full chunks copy all 3 payload bytes. The last chunk copies only the
    /// `len % 3` bytes still missing and ignores its padding.
    pub fn decode_step(&mut self, frame: &Frame) -> Result<Progress, StreamError> {
        if self.is_decoded() {
            return Err(StreamError::AlreadyDecoded);
        }
        expect_stream(frame, ObjectKind::Data, self.peer)?;

        let n = (self.payload.len() - self.filled).min(PAYLOAD_SIZE);
        let chunk = frame.payload();
        self.payload.as_mut_slice()[self.filled..self.filled + n].copy_from_slice(&chunk[..n]);
        self.filled += n;

        Ok(if self.is_decoded() {
            Progress::Complete
        } else {
            Progress::Pending
        })
    }

    /// Hand over the reassembled object
    pub fn finish(self) -> Result<Data, StreamError> {
        if !self.is_decoded() {
            return Err(StreamError::Incomplete);
        }
        Ok(Data::from_parts(self.peer, self.payload))
    }
}

/// Frames of a Data object: header, then 3-byte chunks
#[derive(Debug, Clone)]
pub struct DataFrames<'a> {
    header: u8,
    bytes: &'a [u8],
    header_sent: bool,
    offset: usize,
}

impl<'a> DataFrames<'a> {
    pub(crate) fn new(data: &'a Data) -> Self {
        Self {
            header: ObjectKind::Data.selector() | data.peer().id(),
            bytes: data.as_bytes(),
            header_sent: false,
            offset: 0,
        }
    }

    /// Returns true once every frame has been produced
    pub fn is_encoded(&self) -> bool {
        self.header_sent && self.offset >= self.bytes.len()
    }

    /// Produce the next frame, or `None` when the object is fully encoded
    pub fn encode_step(&mut self) -> Option<Frame> {
        if !self.header_sent {
            self.header_sent = true;
            let [_, b1, b2, b3] = (self.bytes.len() as u32).to_be_bytes();
            return Some(Frame::with_payload(self.header, [b1, b2, b3]));
        }

        let rest = self.bytes.get(self.offset..).filter(|rest| !rest.is_empty())?;
        let n = rest.len().min(PAYLOAD_SIZE);
        let mut chunk = [0u8; PAYLOAD_SIZE];
        chunk[..n].copy_from_slice(&rest[..n]);
        self.offset += n;

        Some(Frame::with_payload(self.header, chunk))
    }

    fn remaining(&self) -> usize {
        let chunks = data_chunk_frames(self.bytes.len().saturating_sub(self.offset));
        chunks + usize::from(!self.header_sent)
    }
}

impl Iterator for DataFrames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.encode_step()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for DataFrames<'_> {}

/// Reassembles a Message object from its chunk frames
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    peer: Peer,
    text: Vec<u8, MAX_MESSAGE_LEN>,
    done: bool,
}

impl MessageDecoder {
    /// Start an empty message for `peer`
    pub fn new(peer: Peer) -> Self {
        Self {
            peer,
            text: Vec::new(),
            done: false,
        }
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Bytes received so far
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Returns true once the terminator or the length bound was reached
    pub fn is_decoded(&self) -> bool {
        self.done
    }

    /// Consume one chunk frame
    ///
    /// Bytes are appended until a zero byte or [`MAX_MESSAGE_LEN`]; anything
    /// after the terminator in the same frame is ignored.
    pub fn decode_step(&mut self, frame: &Frame) -> Result<Progress, StreamError> {
        if self.done {
            return Err(StreamError::AlreadyDecoded);
        }
        expect_stream(frame, ObjectKind::Message, self.peer)?;

        for byte in frame.payload() {
            if byte == 0 || self.text.push(byte).is_err() {
                self.done = true;
                break;
            }
        }
        if self.text.len() == MAX_MESSAGE_LEN {
            self.done = true;
        }

        Ok(if self.done {
            Progress::Complete
        } else {
            Progress::Pending
        })
    }

    /// Hand over the reassembled object
    pub fn finish(self) -> Result<Message, StreamError> {
        if !self.done {
            return Err(StreamError::Incomplete);
        }
        Ok(Message::from_parts(self.peer, self.text))
    }
}

/// Frames of a Message object, always ending with a zero byte
#[derive(Debug, Clone)]
pub struct MessageFrames<'a> {
    header: u8,
    text: &'a [u8],
    sent: usize,
    total: usize,
}

impl<'a> MessageFrames<'a> {
    pub(crate) fn new(message: &'a Message) -> Self {
        Self {
            header: ObjectKind::Message.selector() | message.peer().id(),
            text: message.as_bytes(),
            sent: 0,
            total: message_frames(message.len()),
        }
    }

    /// Returns true once the terminating frame has been produced
    pub fn is_encoded(&self) -> bool {
        self.sent == self.total
    }

    /// Produce the next frame, or `None` when the message is fully encoded
    pub fn encode_step(&mut self) -> Option<Frame> {
        if self.is_encoded() {
            return None;
        }

        let start = (self.sent * PAYLOAD_SIZE).min(self.text.len());
        let end = (start + PAYLOAD_SIZE).min(self.text.len());
        let mut chunk = [0u8; PAYLOAD_SIZE];
        chunk[..end - start].copy_from_slice(&self.text[start..end]);
        self.sent += 1;

        Some(Frame::with_payload(self.header, chunk))
    }
}

impl Iterator for MessageFrames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.encode_step()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.total - self.sent;
        (n, Some(n))
    }
}

impl ExactSizeIterator for MessageFrames<'_> {}
