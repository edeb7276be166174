//! owpeer Bus Protocol
//!
//! This crate defines the wire protocol spoken between peer devices of the
//! audio/MIDI effect bus. Peers share a half-duplex serial link and exchange
//! fixed 4-byte frames; larger payloads are fragmented across frames.
//!
//! # Protocol Overview
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────────────┐
//! │ SELECTOR │ PEER/SEQ │ PAYLOAD                 │
//! │ 4 bits   │ 4 bits   │ 3B                      │
//! └──────────┴──────────┴─────────────────────────┘
//! ```
//!
//! - [`frame`]: the 4-byte unit and its classification
//! - [`objects`]: typed protocol objects and their single-frame codecs
//! - [`stream`]: multi-frame encoding and reassembly of Data and Message
//! - [`arena`]: bounded storage for Data payloads
//! - [`midi`]: USB-MIDI code indices for passthrough frames

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

pub mod arena;
pub mod frame;
pub mod midi;
pub mod objects;
pub mod stream;

pub use arena::{ArenaError, PayloadArena, PayloadBuf, MIN_REGION_SIZE, PAYLOAD_ARENA_SIZE};
pub use frame::{Frame, FrameClass, ObjectKind, Peer, FRAME_SIZE, NO_UID, PAYLOAD_SIZE};
pub use midi::CodeIndex;
pub use objects::{
    Button, Command, Data, DecodeError, Discover, Message, Midi, ObjectFrames, Parameter,
    ProtocolObject, Reset, MAX_DATA_LEN, MAX_MESSAGE_LEN,
};
pub use stream::{DataDecoder, DataFrames, MessageDecoder, MessageFrames, Progress, StreamError};
