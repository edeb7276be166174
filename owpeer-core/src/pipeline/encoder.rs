//! Frame encoding stage
//!
//! Splits outbound objects into frames. An object's frames are queued back
//! to back, so the frames of one Data or Message object are never separated
//! by frames of another object from this encoder.

use core::mem;

use embassy_sync::blocking_mutex::raw::RawMutex;

use owpeer_protocol::{Frame, ProtocolObject};

use crate::pool::Pool;

/// Pipeline stage from the outbound object pool to the transmit frame pool
pub struct FrameEncoder<'a, M: RawMutex, const FRAMES: usize, const OBJECTS: usize> {
    objects: &'a Pool<M, ProtocolObject, OBJECTS>,
    frames: &'a Pool<M, Frame, FRAMES>,
}

impl<'a, M: RawMutex, const FRAMES: usize, const OBJECTS: usize> FrameEncoder<'a, M, FRAMES, OBJECTS> {
    pub fn new(
        objects: &'a Pool<M, ProtocolObject, OBJECTS>,
        frames: &'a Pool<M, Frame, FRAMES>,
    ) -> Self {
        Self { objects, frames }
    }

    /// Encode the next outbound object, returning the number of frames queued
    pub async fn step(&mut self) -> usize {
        let mut slot = self.objects.receive().await;
        // Free the object slot before waiting on frame slots
        let object = mem::take(&mut *slot);
        slot.release();

        let mut count = 0;
        for frame in object.frames() {
            let mut tx = self.frames.take().await;
            *tx = frame;
            tx.send();
            count += 1;
        }
        trace!("Encoded {:?} into {} frames", object.kind(), count);
        count
    }

    pub async fn run(&mut self) -> ! {
        info!("Frame encoder started");
        loop {
            self.step().await;
        }
    }
}
