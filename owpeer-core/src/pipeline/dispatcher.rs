//! Dispatch stage
//!
//! Hands each inbound object to the matching [`BusHandler`] method, then
//! returns the object slot. A Data payload is released to the arena at the
//! same time, not when the slot is next reused.

use core::mem;

use embassy_sync::blocking_mutex::raw::RawMutex;

use owpeer_protocol::ProtocolObject;

use crate::handler::BusHandler;
use crate::pool::Pool;

/// Route one object to its handler method
pub fn dispatch<H: BusHandler + ?Sized>(handler: &mut H, object: &ProtocolObject) {
    match object {
        ProtocolObject::Discover(d) => handler.discover(d),
        ProtocolObject::Reset(r) => handler.reset(r),
        ProtocolObject::Midi(m) => handler.midi(m),
        ProtocolObject::Button(b) => handler.button(b),
        ProtocolObject::Parameter(p) => handler.parameter(p),
        ProtocolObject::Command(c) => handler.command(c),
        ProtocolObject::Data(d) => handler.data(d),
        ProtocolObject::Message(m) => handler.message(m),
    }
}

/// Pipeline stage from the inbound object pool to the application
pub struct Dispatcher<'a, M: RawMutex, H: BusHandler, const N: usize> {
    objects: &'a Pool<M, ProtocolObject, N>,
    handler: H,
}

impl<'a, M: RawMutex, H: BusHandler, const N: usize> Dispatcher<'a, M, H, N> {
    pub fn new(objects: &'a Pool<M, ProtocolObject, N>, handler: H) -> Self {
        Self { objects, handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Dispatch the next inbound object
    pub async fn step(&mut self) {
        let mut slot = self.objects.receive().await;
        dispatch(&mut self.handler, &slot);
        drop(mem::take(&mut *slot));
    }

    pub async fn run(&mut self) -> ! {
        info!("Dispatcher started");
        loop {
            self.step().await;
        }
    }
}
