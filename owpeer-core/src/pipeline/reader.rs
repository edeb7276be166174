//! Link reader stage
//!
//! Reads whole frames off the link into the receive frame pool. Waiting for
//! a free frame slot is what throttles the link when decoding falls behind.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io::{Error as _, ReadExactError};
use embedded_io_async::Read;

use owpeer_protocol::Frame;

use crate::pool::Pool;

/// Pipeline stage from the link to the receive frame pool
pub struct LinkReader<'a, M: RawMutex, R: Read, const N: usize> {
    link: R,
    frames: &'a Pool<M, Frame, N>,
}

impl<'a, M: RawMutex, R: Read, const N: usize> LinkReader<'a, M, R, N> {
    pub fn new(link: R, frames: &'a Pool<M, Frame, N>) -> Self {
        Self { link, frames }
    }

    /// Read one frame and queue it for decoding
    ///
    /// On error the slot is released and nothing is queued.
    pub async fn step(&mut self) -> Result<(), ReadExactError<R::Error>> {
        let mut slot = self.frames.take().await;
        self.link.read_exact(slot.bytes_mut()).await?;
        trace!("RX frame {:?}", *slot);
        slot.send();
        Ok(())
    }

    pub async fn run(&mut self) -> ! {
        info!("Link reader started");
        loop {
            match self.step().await {
                Ok(()) => {}
                Err(ReadExactError::UnexpectedEof) => {
                    warn!("Link closed mid-frame");
                }
                Err(ReadExactError::Other(e)) => {
                    warn!("Link read error: {:?}", e.kind());
                }
            }
        }
    }

    /// Give the link back
    pub fn into_link(self) -> R {
        self.link
    }
}
