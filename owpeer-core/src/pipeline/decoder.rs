//! Frame decoding stage
//!
//! Turns received frames into protocol objects. Single-frame kinds decode
//! immediately; Data and Message are reassembled per peer, so streams from
//! different peers may interleave on the link.
//!
//! Stream table rules, per peer:
//! - a Data frame with no stream in flight is a header
//! - a frame of the other streaming kind abandons the stream in flight
//! - a Data header the arena cannot hold still consumes its chunk frames,
//!   which are skipped so they are not mistaken for new headers
//! - Reset abandons every stream and is delivered ahead of queued objects

use core::array;

use embassy_sync::blocking_mutex::raw::RawMutex;

use owpeer_protocol::stream::data_chunk_frames;
use owpeer_protocol::{
    ArenaError, Data, DataDecoder, DecodeError, Frame, FrameClass, MessageDecoder, ObjectKind,
    PayloadArena, Peer, Progress, ProtocolObject, StreamError,
};

use crate::pool::Pool;

/// Why a frame produced no object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DropReason {
    /// Reserved selector nibble
    Unrecognized(u8),
    /// Frame could not be decoded
    Malformed(DecodeError),
    /// Data header larger than the arena can currently hold
    ArenaExhausted { requested: usize },
    /// Chunk of a Data stream that was refused earlier
    Skipped,
}

/// Result of feeding one frame to the [`Reassembler`]
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A whole object is ready
    Complete(ProtocolObject),
    /// The frame was absorbed by a stream still in flight
    Pending,
    /// The frame was discarded
    Dropped(DropReason),
}

#[derive(Debug)]
enum Stream {
    Data(DataDecoder),
    /// Chunk frames left to swallow after a refused header
    Skip { frames: usize },
    Message(MessageDecoder),
}

impl Stream {
    fn kind(&self) -> ObjectKind {
        match self {
            Stream::Data(_) | Stream::Skip { .. } => ObjectKind::Data,
            Stream::Message(_) => ObjectKind::Message,
        }
    }
}

/// Per-peer stream table
#[derive(Debug)]
pub struct Reassembler {
    arena: &'static PayloadArena,
    streams: [Option<Stream>; Peer::COUNT],
}

impl Reassembler {
    pub fn new(arena: &'static PayloadArena) -> Self {
        Self {
            arena,
            streams: array::from_fn(|_| None),
        }
    }

    /// Kind of the stream in flight for `peer`, if any
    pub fn in_flight(&self, peer: Peer) -> Option<ObjectKind> {
        self.streams[peer.index()].as_ref().map(Stream::kind)
    }

    /// Abandon every stream in flight
    pub fn clear(&mut self) {
        for stream in self.streams.iter_mut() {
            *stream = None;
        }
    }

    /// Feed one received frame
    pub fn feed(&mut self, frame: &Frame) -> Outcome {
        match frame.class() {
            FrameClass::Unrecognized(nibble) => Outcome::Dropped(DropReason::Unrecognized(nibble)),
            FrameClass::Object(ObjectKind::Data) => self.feed_data(frame),
            FrameClass::Object(ObjectKind::Message) => self.feed_message(frame),
            FrameClass::Object(ObjectKind::Reset) => {
                self.clear();
                decode_single(frame)
            }
            _ => decode_single(frame),
        }
    }

    fn feed_data(&mut self, frame: &Frame) -> Outcome {
        let peer = frame.peer();
        match self.streams[peer.index()].take() {
            Some(Stream::Data(mut decoder)) => match decoder.decode_step(frame) {
                Ok(Progress::Pending) => {
                    self.streams[peer.index()] = Some(Stream::Data(decoder));
                    Outcome::Pending
                }
                Ok(Progress::Complete) => finish_data(decoder),
                Err(e) => malformed(e),
            },
            Some(Stream::Skip { frames }) => {
                if frames > 1 {
                    self.streams[peer.index()] = Some(Stream::Skip { frames: frames - 1 });
                }
                Outcome::Dropped(DropReason::Skipped)
            }
            Some(Stream::Message(abandoned)) => {
                warn!(
                    "Peer {} message abandoned after {} bytes",
                    peer.id(),
                    abandoned.len()
                );
                self.begin_data(frame)
            }
            None => self.begin_data(frame),
        }
    }

    fn begin_data(&mut self, header: &Frame) -> Outcome {
        let peer = header.peer();
        let len = match Data::declared_len(header) {
            Ok(len) => len,
            Err(e) => return Outcome::Dropped(DropReason::Malformed(e)),
        };

        match DataDecoder::begin(header, self.arena) {
            Ok(decoder) if decoder.is_decoded() => finish_data(decoder),
            Ok(decoder) => {
                trace!("Peer {} data stream of {} bytes", peer.id(), len);
                self.streams[peer.index()] = Some(Stream::Data(decoder));
                Outcome::Pending
            }
            Err(StreamError::Arena(ArenaError::Exhausted { requested, .. })) => {
                let frames = data_chunk_frames(len);
                if frames > 0 {
                    self.streams[peer.index()] = Some(Stream::Skip { frames });
                }
                Outcome::Dropped(DropReason::ArenaExhausted { requested })
            }
            Err(e) => malformed(e),
        }
    }

    fn feed_message(&mut self, frame: &Frame) -> Outcome {
        let peer = frame.peer();
        let mut decoder = match self.streams[peer.index()].take() {
            Some(Stream::Message(decoder)) => decoder,
            Some(abandoned) => {
                warn!(
                    "Peer {} {:?} stream abandoned by a message",
                    peer.id(),
                    abandoned.kind()
                );
                MessageDecoder::new(peer)
            }
            None => MessageDecoder::new(peer),
        };

        match decoder.decode_step(frame) {
            Ok(Progress::Pending) => {
                self.streams[peer.index()] = Some(Stream::Message(decoder));
                Outcome::Pending
            }
            Ok(Progress::Complete) => match decoder.finish() {
                Ok(message) => Outcome::Complete(ProtocolObject::Message(message)),
                Err(e) => malformed(e),
            },
            Err(e) => malformed(e),
        }
    }
}

fn decode_single(frame: &Frame) -> Outcome {
    match ProtocolObject::decode(frame) {
        Ok(object) => Outcome::Complete(object),
        Err(e) => Outcome::Dropped(DropReason::Malformed(e)),
    }
}

fn finish_data(decoder: DataDecoder) -> Outcome {
    match decoder.finish() {
        Ok(data) => Outcome::Complete(ProtocolObject::Data(data)),
        Err(e) => malformed(e),
    }
}

fn malformed(e: StreamError) -> Outcome {
    match e {
        StreamError::Decode(e) => Outcome::Dropped(DropReason::Malformed(e)),
        StreamError::Arena(ArenaError::Exhausted { requested, .. }) => {
            Outcome::Dropped(DropReason::ArenaExhausted { requested })
        }
        StreamError::AlreadyDecoded | StreamError::Incomplete => {
            error!("Stream decoder out of step: {:?}", e);
            Outcome::Dropped(DropReason::Skipped)
        }
    }
}

/// Pipeline stage between the receive frame pool and the inbound object pool
pub struct FrameDecoder<'a, M: RawMutex, const FRAMES: usize, const OBJECTS: usize> {
    frames: &'a Pool<M, Frame, FRAMES>,
    objects: &'a Pool<M, ProtocolObject, OBJECTS>,
    reassembler: Reassembler,
}

impl<'a, M: RawMutex, const FRAMES: usize, const OBJECTS: usize> FrameDecoder<'a, M, FRAMES, OBJECTS> {
    pub fn new(
        frames: &'a Pool<M, Frame, FRAMES>,
        objects: &'a Pool<M, ProtocolObject, OBJECTS>,
        arena: &'static PayloadArena,
    ) -> Self {
        Self {
            frames,
            objects,
            reassembler: Reassembler::new(arena),
        }
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Decode one received frame
    ///
    /// The frame slot goes back to its pool before waiting for an object
    /// slot, so a full inbound pool never holds up the link reader.
    pub async fn step(&mut self) {
        let frame = self.frames.receive().await;
        let outcome = self.reassembler.feed(&frame);
        let raw = *frame;
        frame.release();

        match outcome {
            Outcome::Complete(object) => {
                let reset = matches!(object, ProtocolObject::Reset(_));
                let mut slot = self.objects.take().await;
                *slot = object;
                if reset {
                    debug!("Reset received, streams cleared");
                    slot.send_priority();
                } else {
                    slot.send();
                }
            }
            Outcome::Pending => {}
            Outcome::Dropped(DropReason::Skipped) => {
                trace!("Skipped chunk {:?}", raw);
            }
            Outcome::Dropped(reason) => {
                warn!("Dropped frame {:?}: {:?}", raw, reason);
            }
        }
    }

    pub async fn run(&mut self) -> ! {
        info!("Frame decoder started");
        loop {
            self.step().await;
        }
    }
}
