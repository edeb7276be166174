//! Link writer stage

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io::Error as _;
use embedded_io_async::Write;

use owpeer_protocol::Frame;

use crate::pool::Pool;

/// Pipeline stage from the transmit frame pool to the link
pub struct LinkWriter<'a, M: RawMutex, W: Write, const N: usize> {
    link: W,
    frames: &'a Pool<M, Frame, N>,
}

impl<'a, M: RawMutex, W: Write, const N: usize> LinkWriter<'a, M, W, N> {
    pub fn new(link: W, frames: &'a Pool<M, Frame, N>) -> Self {
        Self { link, frames }
    }

    /// Write the next queued frame
    ///
    /// The frame slot is released whether or not the write succeeded.
    pub async fn step(&mut self) -> Result<(), W::Error> {
        let frame = self.frames.receive().await;
        let result = self.link.write_all(frame.bytes()).await;
        trace!("TX frame {:?}", *frame);
        frame.release();
        result
    }

    pub async fn run(&mut self) -> ! {
        info!("Link writer started");
        loop {
            if let Err(e) = self.step().await {
                warn!("Link write error: {:?}", e.kind());
            }
        }
    }

    pub fn into_link(self) -> W {
        self.link
    }
}
