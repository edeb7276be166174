//! Pipeline connecting the link to the application
//!
//! ```text
//!        receive path                          transmit path
//!
//!   link ──LinkReader──▶ rx frames        outbound objects ◀── Bus::post
//!                           │                     │
//!                      FrameDecoder          FrameEncoder
//!                           ▼                     ▼
//!                    inbound objects          tx frames
//!                           │                     │
//!                      Dispatcher            LinkWriter ──▶ link
//!                           ▼
//!                      BusHandler
//! ```
//!
//! Each stage is a struct with a `step` that moves one item and a `run`
//! that loops forever; firmware spawns one task per `run`. The pools are
//! the only shared state between stages.

mod decoder;
mod dispatcher;
mod encoder;
mod reader;
mod writer;

pub use decoder::{DropReason, FrameDecoder, Outcome, Reassembler};
pub use dispatcher::{dispatch, Dispatcher};
pub use encoder::FrameEncoder;
pub use reader::LinkReader;
pub use writer::LinkWriter;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io_async::{Read, Write};

use owpeer_protocol::{Frame, PayloadArena, ProtocolObject};

use crate::config::{FRAME_POOL_CAPACITY, OBJECT_POOL_CAPACITY};
use crate::handler::BusHandler;
use crate::pool::Pool;

/// Pool of link frames
pub type FramePool<M, const N: usize = FRAME_POOL_CAPACITY> = Pool<M, Frame, N>;

/// Pool of protocol objects
pub type ObjectPool<M, const N: usize = OBJECT_POOL_CAPACITY> = Pool<M, ProtocolObject, N>;

/// All pools of one bus link plus its payload arena
pub struct Bus<
    M: RawMutex,
    const FRAMES: usize = FRAME_POOL_CAPACITY,
    const OBJECTS: usize = OBJECT_POOL_CAPACITY,
> {
    rx_frames: FramePool<M, FRAMES>,
    tx_frames: FramePool<M, FRAMES>,
    inbound: ObjectPool<M, OBJECTS>,
    outbound: ObjectPool<M, OBJECTS>,
    arena: &'static PayloadArena,
}

impl<M: RawMutex, const FRAMES: usize, const OBJECTS: usize> Bus<M, FRAMES, OBJECTS> {
    pub const fn new(arena: &'static PayloadArena) -> Self {
        Self {
            rx_frames: Pool::new(),
            tx_frames: Pool::new(),
            inbound: Pool::new(),
            outbound: Pool::new(),
            arena,
        }
    }

    pub fn arena(&self) -> &'static PayloadArena {
        self.arena
    }

    pub fn rx_frames(&self) -> &FramePool<M, FRAMES> {
        &self.rx_frames
    }

    pub fn tx_frames(&self) -> &FramePool<M, FRAMES> {
        &self.tx_frames
    }

    /// Decoded objects waiting for dispatch
    pub fn inbound(&self) -> &ObjectPool<M, OBJECTS> {
        &self.inbound
    }

    /// Objects waiting to be encoded
    pub fn outbound(&self) -> &ObjectPool<M, OBJECTS> {
        &self.outbound
    }

    /// Queue an object for transmission, waiting for room
    pub async fn post(&self, object: ProtocolObject) {
        let mut slot = self.outbound.take().await;
        *slot = object;
        slot.send();
    }

    /// Queue an object ahead of everything not yet encoded
    pub async fn post_priority(&self, object: ProtocolObject) {
        let mut slot = self.outbound.take().await;
        *slot = object;
        slot.send_priority();
    }

    /// Queue an object for transmission, handing it back if the pool is full
    pub fn try_post(&self, object: ProtocolObject) -> Result<(), ProtocolObject> {
        match self.outbound.try_take() {
            Some(mut slot) => {
                *slot = object;
                slot.send();
                Ok(())
            }
            None => Err(object),
        }
    }

    pub fn link_reader<R: Read>(&self, link: R) -> LinkReader<'_, M, R, FRAMES> {
        LinkReader::new(link, &self.rx_frames)
    }

    pub fn decoder(&self) -> FrameDecoder<'_, M, FRAMES, OBJECTS> {
        FrameDecoder::new(&self.rx_frames, &self.inbound, self.arena)
    }

    pub fn dispatcher<H: BusHandler>(&self, handler: H) -> Dispatcher<'_, M, H, OBJECTS> {
        Dispatcher::new(&self.inbound, handler)
    }

    pub fn encoder(&self) -> FrameEncoder<'_, M, FRAMES, OBJECTS> {
        FrameEncoder::new(&self.outbound, &self.tx_frames)
    }

    pub fn link_writer<W: Write>(&self, link: W) -> LinkWriter<'_, M, W, FRAMES> {
        LinkWriter::new(link, &self.tx_frames)
    }
}

/// Arena over a leaked heap region, for host tests
#[cfg(test)]
pub(crate) fn leak_arena(size: usize) -> &'static PayloadArena {
    use core::mem::MaybeUninit;
    use std::boxed::Box;

    let arena: &'static PayloadArena = Box::leak(Box::new(PayloadArena::new()));
    let region = Box::leak(std::vec![MaybeUninit::uninit(); size].into_boxed_slice());
    assert!(arena.init(region).is_ok());
    arena
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
    use embedded_io::{ErrorKind, ErrorType, ReadExactError};
    use owpeer_protocol::{
        Button, Command, Data, Discover, Message, Midi, Parameter, Peer, Reset,
    };
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// In-memory link: reads drain `rx`, writes append to `tx`
    #[derive(Default)]
    struct MockLink {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl MockLink {
        fn with_rx(bytes: &[u8]) -> Self {
            Self {
                rx: bytes.iter().copied().collect(),
                tx: Vec::new(),
            }
        }
    }

    impl ErrorType for MockLink {
        type Error = Infallible;
    }

    impl Read for MockLink {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let n = buf.len().min(self.rx.len());
            for (dst, src) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }
    }

    impl Write for MockLink {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    struct BrokenLink;

    impl ErrorType for BrokenLink {
        type Error = ErrorKind;
    }

    impl Write for BrokenLink {
        async fn write(&mut self, _buf: &[u8]) -> Result<usize, ErrorKind> {
            Err(ErrorKind::BrokenPipe)
        }
    }

    #[derive(Debug, PartialEq)]
    enum Seen {
        Discover(Discover),
        Reset,
        Midi(Midi),
        Button(Button),
        Parameter(Parameter),
        Command(Command),
        Data(Peer, Vec<u8>),
        Message(Peer, Vec<u8>),
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<Seen>,
    }

    impl BusHandler for Recorder {
        fn discover(&mut self, discover: &Discover) {
            self.seen.push(Seen::Discover(*discover));
        }

        fn reset(&mut self, _reset: &Reset) {
            self.seen.push(Seen::Reset);
        }

        fn midi(&mut self, midi: &Midi) {
            self.seen.push(Seen::Midi(*midi));
        }

        fn button(&mut self, button: &Button) {
            self.seen.push(Seen::Button(*button));
        }

        fn parameter(&mut self, parameter: &Parameter) {
            self.seen.push(Seen::Parameter(*parameter));
        }

        fn command(&mut self, command: &Command) {
            self.seen.push(Seen::Command(*command));
        }

        fn data(&mut self, data: &Data) {
            self.seen.push(Seen::Data(data.peer(), data.as_bytes().to_vec()));
        }

        fn message(&mut self, message: &Message) {
            self.seen
                .push(Seen::Message(message.peer(), message.as_bytes().to_vec()));
        }
    }

    fn peer(id: u8) -> Peer {
        Peer::new(id).unwrap()
    }

    /// Encode `objects` through the transmit path and return the wire bytes
    fn transmit<M: RawMutex>(bus: &Bus<M>, objects: Vec<ProtocolObject>) -> Vec<u8> {
        let mut encoder = bus.encoder();
        let mut writer = bus.link_writer(MockLink::default());

        for object in objects {
            bus.try_post(object).unwrap();
            let frames = block_on(encoder.step());
            for _ in 0..frames {
                block_on(writer.step()).unwrap();
            }
        }
        writer.into_link().tx
    }

    /// Feed wire bytes through the receive path and record what is dispatched
    fn receive<M: RawMutex>(bus: &Bus<M>, wire: &[u8]) -> Vec<Seen> {
        let mut reader = bus.link_reader(MockLink::with_rx(wire));
        let mut decoder = bus.decoder();
        let mut dispatcher = bus.dispatcher(Recorder::default());

        for _ in 0..wire.len() / 4 {
            block_on(reader.step()).unwrap();
            block_on(decoder.step());
            while bus.inbound().occupancy().queued > 0 {
                block_on(dispatcher.step());
            }
        }
        dispatcher.into_handler().seen
    }

    #[test]
    fn test_round_trip_every_kind() {
        let arena = leak_arena(1024);
        let bus: Bus<NoopRawMutex> = Bus::new(arena);

        let payload: Vec<u8> = (0..10).collect();
        let objects = std::vec![
            ProtocolObject::Discover(Discover::new(peer(3), 0x010203)),
            ProtocolObject::Button(Button {
                peer: peer(1),
                id: 2,
                value: -300,
            }),
            ProtocolObject::Parameter(Parameter {
                peer: peer(4),
                id: 9,
                value: 1000,
            }),
            ProtocolObject::Command(Command {
                peer: peer(5),
                code: 0x11,
                data: 7,
            }),
            ProtocolObject::Midi(Midi {
                packet: [0x83, 0x80, 60, 0],
            }),
            ProtocolObject::Data(Data::new(peer(6), arena.alloc_from(&payload).unwrap()).unwrap()),
            ProtocolObject::Message(Message::new(peer(7), b"hello!")),
        ];

        let wire = transmit(&bus, objects);
        // 5 single frames, Data header + 4 chunks, Message 2 chunks + terminator
        assert_eq!(wire.len(), (5 + 5 + 3) * 4);

        let seen = receive(&bus, &wire);
        assert_eq!(
            seen,
            std::vec![
                Seen::Discover(Discover::new(peer(3), 0x010203)),
                Seen::Button(Button {
                    peer: peer(1),
                    id: 2,
                    value: -300
                }),
                Seen::Parameter(Parameter {
                    peer: peer(4),
                    id: 9,
                    value: 1000
                }),
                Seen::Command(Command {
                    peer: peer(5),
                    code: 0x11,
                    data: 7
                }),
                Seen::Midi(Midi {
                    packet: [0x83, 0x80, 60, 0]
                }),
                Seen::Data(peer(6), payload),
                Seen::Message(peer(7), b"hello!".to_vec()),
            ]
        );

        // Every slot and every payload byte went back
        assert_eq!(bus.rx_frames().occupancy().free, FRAME_POOL_CAPACITY);
        assert_eq!(bus.tx_frames().occupancy().free, FRAME_POOL_CAPACITY);
        assert_eq!(bus.inbound().occupancy().free, OBJECT_POOL_CAPACITY);
        assert_eq!(bus.outbound().occupancy().free, OBJECT_POOL_CAPACITY);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_reset_jumps_inbound_queue() {
        static ARENA: PayloadArena = PayloadArena::new();
        let bus: Bus<NoopRawMutex> = Bus::new(&ARENA);
        let mut reader = bus.link_reader(MockLink::with_rx(&[
            0xA1, 0, 0, 1, //
            0xA2, 0, 0, 2, //
            0xF0, 0xF0, 0xF0, 0xF0,
        ]));
        let mut decoder = bus.decoder();

        for _ in 0..3 {
            block_on(reader.step()).unwrap();
            block_on(decoder.step());
        }

        let first = bus.inbound().try_receive().unwrap();
        assert_eq!(*first, ProtocolObject::Reset(Reset));
    }

    #[test]
    fn test_unrecognized_frame_is_dropped() {
        static ARENA: PayloadArena = PayloadArena::new();
        let bus: Bus<NoopRawMutex> = Bus::new(&ARENA);

        let seen = receive(&bus, &[0x10, 1, 2, 3, 0xA0, 0, 0, 5]);
        assert_eq!(seen, std::vec![Seen::Discover(Discover::new(peer(0), 5))]);
        assert_eq!(bus.rx_frames().occupancy().free, FRAME_POOL_CAPACITY);
    }

    #[test]
    fn test_short_read_releases_slot() {
        static ARENA: PayloadArena = PayloadArena::new();
        let bus: Bus<NoopRawMutex> = Bus::new(&ARENA);
        let mut reader = bus.link_reader(MockLink::with_rx(&[0xA0, 1]));

        assert!(matches!(
            block_on(reader.step()),
            Err(ReadExactError::UnexpectedEof)
        ));
        assert_eq!(bus.rx_frames().occupancy().free, FRAME_POOL_CAPACITY);
    }

    #[test]
    fn test_write_error_releases_slot() {
        static ARENA: PayloadArena = PayloadArena::new();
        let bus: Bus<NoopRawMutex> = Bus::new(&ARENA);
        let mut encoder = bus.encoder();
        let mut writer = bus.link_writer(BrokenLink);

        bus.try_post(ProtocolObject::Reset(Reset)).unwrap();
        assert_eq!(block_on(encoder.step()), 1);
        assert_eq!(block_on(writer.step()), Err(ErrorKind::BrokenPipe));
        assert_eq!(bus.tx_frames().occupancy().free, FRAME_POOL_CAPACITY);
    }

    #[test]
    fn test_try_post_backpressure() {
        static ARENA: PayloadArena = PayloadArena::new();
        let bus: Bus<NoopRawMutex, 4, 2> = Bus::new(&ARENA);

        assert!(bus.try_post(ProtocolObject::Reset(Reset)).is_ok());
        assert!(bus.try_post(ProtocolObject::Reset(Reset)).is_ok());
        let rejected = bus.try_post(ProtocolObject::Discover(Discover::new(peer(1), 1)));
        assert_eq!(
            rejected,
            Err(ProtocolObject::Discover(Discover::new(peer(1), 1)))
        );
    }

    #[test]
    fn test_dropped_data_slot_frees_payload() {
        let arena = leak_arena(256);
        let bus: Bus<NoopRawMutex, 4, 2> = Bus::new(arena);

        let payload = arena.alloc_from(&[7; 10]).unwrap();
        bus.try_post(ProtocolObject::Data(Data::new(peer(2), payload).unwrap()))
            .unwrap();
        assert!(arena.used() >= 10);

        // Abandoned without encoding
        let slot = bus.outbound().try_receive().unwrap();
        drop(slot);
        assert_eq!(arena.used(), 0);
        assert_eq!(bus.outbound().occupancy().free, 2);

        // The same bytes are available to the next object
        for _ in 0..2 {
            let payload = arena.alloc_from(&[1; 100]).unwrap();
            bus.try_post(ProtocolObject::Data(Data::new(peer(3), payload).unwrap()))
                .unwrap();
            bus.outbound().try_receive().unwrap().release();
        }
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_bus_in_static() {
        static ARENA: PayloadArena = PayloadArena::new();
        static BUS: Bus<CriticalSectionRawMutex, 4, 2> = Bus::new(&ARENA);

        BUS.try_post(ProtocolObject::Reset(Reset)).unwrap();
        let wire = {
            let mut encoder = BUS.encoder();
            let mut writer = BUS.link_writer(MockLink::default());
            assert_eq!(block_on(encoder.step()), 1);
            block_on(writer.step()).unwrap();
            writer.into_link().tx
        };
        assert_eq!(wire, [0xF0; 4]);
        assert_eq!(BUS.outbound().occupancy().free, 2);
        assert_eq!(BUS.tx_frames().occupancy().free, 4);
    }

    #[test]
    fn test_default_handler_ignores_objects() {
        struct Ignore;
        impl BusHandler for Ignore {}

        static ARENA: PayloadArena = PayloadArena::new();
        let bus: Bus<NoopRawMutex> = Bus::new(&ARENA);
        let mut dispatcher = bus.dispatcher(Ignore);

        let mut slot = bus.inbound().try_take().unwrap();
        *slot = ProtocolObject::Reset(Reset);
        slot.send();
        block_on(dispatcher.step());
        assert_eq!(bus.inbound().occupancy().free, OBJECT_POOL_CAPACITY);
    }

    #[test]
    fn test_threaded_receive_path() {
        static ARENA: PayloadArena = PayloadArena::new();
        const MESSAGES: usize = 40;

        let bus: Bus<CriticalSectionRawMutex, 4, 2> = Bus::new(&ARENA);

        let mut wire = Vec::new();
        for i in 0..MESSAGES {
            let text = std::format!("msg {i}");
            let message = Message::new(peer((i % 16) as u8), text.as_bytes());
            for frame in message.frames() {
                wire.extend_from_slice(frame.bytes());
            }
        }
        let frames = wire.len() / 4;

        let seen = std::thread::scope(|scope| {
            let mut reader = bus.link_reader(MockLink::with_rx(&wire));
            let mut decoder = bus.decoder();
            let mut dispatcher = bus.dispatcher(Recorder::default());

            scope.spawn(move || {
                for _ in 0..frames {
                    block_on(reader.step()).unwrap();
                }
            });
            scope.spawn(move || {
                for _ in 0..frames {
                    block_on(decoder.step());
                }
            });
            scope
                .spawn(move || {
                    for _ in 0..MESSAGES {
                        block_on(dispatcher.step());
                    }
                    dispatcher.into_handler().seen
                })
                .join()
                .unwrap()
        });

        assert_eq!(seen.len(), MESSAGES);
        for (i, seen) in seen.iter().enumerate() {
            let text = std::format!("msg {i}");
            assert_eq!(
                *seen,
                Seen::Message(peer((i % 16) as u8), text.into_bytes())
            );
        }
    }
}
