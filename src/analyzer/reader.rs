//! Background reader for the analyzer's named pipe.
//!
//! One reader thread exists per running analyzer process. It blocks on the
//! pipe, decodes every full chunk into a [`SampleFrame`] and hands it to the
//! UI loop over a bounded channel. A short read means the writer went away:
//! the reader closes the pipe, sends [`StreamEvent::Stopped`] and exits.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::decode::decode_frame;
use super::{SampleFrame, StreamFormat};

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Frame(SampleFrame),
    /// The reader hit end-of-stream and has closed the pipe.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The channel was full; the oldest queued frame was discarded.
    DroppedOldest,
    Disconnected,
}

/// Producer half of the reader -> UI channel.
///
/// The channel is bounded. When it is full the oldest queued frame is
/// discarded so the UI always catches up with the newest data. `Stopped` is
/// never discarded.
#[derive(Clone)]
pub struct StreamSender {
    tx: Sender<StreamEvent>,
    overflow: Receiver<StreamEvent>,
}

pub fn stream_channel(capacity: usize) -> (StreamSender, Receiver<StreamEvent>) {
    let (tx, rx) = bounded(capacity.max(1));
    let sender = StreamSender {
        tx,
        overflow: rx.clone(),
    };
    (sender, rx)
}

impl StreamSender {
    pub fn send_frame(&self, frame: SampleFrame) -> SendOutcome {
        self.push(StreamEvent::Frame(frame))
    }

    pub fn send_stopped(&self) -> SendOutcome {
        self.push(StreamEvent::Stopped)
    }

    fn push(&self, event: StreamEvent) -> SendOutcome {
        let mut event = event;
        let mut outcome = SendOutcome::Queued;
        let mut displaced_stop = false;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => break,
                Err(TrySendError::Disconnected(_)) => return SendOutcome::Disconnected,
                Err(TrySendError::Full(rejected)) => {
                    event = rejected;
                    match self.overflow.try_recv() {
                        Ok(StreamEvent::Frame(_)) => outcome = SendOutcome::DroppedOldest,
                        Ok(StreamEvent::Stopped) => displaced_stop = true,
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => return SendOutcome::Disconnected,
                    }
                }
            }
        }
        if displaced_stop {
            // only one reader feeds the channel at a time, so this is a stale stop
            log::warn!("Stream channel overflowed past a stop notification");
            self.push(StreamEvent::Stopped);
        }
        outcome
    }
}

/// Handle on a running reader thread.
pub struct ReaderHandle {
    handle: JoinHandle<()>,
}

impl ReaderHandle {
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Wait up to `grace` for the thread to finish and reap it.
    ///
    /// Returns the handle back when the thread is still running.
    pub fn wait_exit(self, grace: Duration) -> Result<(), ReaderHandle> {
        let deadline = Instant::now() + grace;
        while self.is_alive() {
            if Instant::now() >= deadline {
                return Err(self);
            }
            thread::sleep(Duration::from_millis(1));
        }
        if self.handle.join().is_err() {
            log::error!("Analyzer stream reader panicked");
        }
        Ok(())
    }
}

pub fn spawn_reader(
    path: PathBuf,
    format: StreamFormat,
    sender: StreamSender,
) -> io::Result<ReaderHandle> {
    log::debug!("Activate analyzer stream reader");
    let handle = thread::Builder::new()
        .name("analyzer-reader".into())
        .spawn(move || read_stream(&path, format, &sender))?;
    Ok(ReaderHandle { handle })
}

fn read_stream(path: &std::path::Path, format: StreamFormat, sender: &StreamSender) {
    // blocks until the analyzer opens its end
    let mut fifo = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            log::error!("Failed to open analyzer pipe {}: {}", path.display(), err);
            sender.send_stopped();
            return;
        }
    };

    let mut buf = vec![0u8; format.chunk_size()];
    let mut frames = 0u64;
    let mut dropped = 0u64;

    loop {
        let filled = match read_full(&mut fifo, &mut buf) {
            Ok(n) => n,
            Err(err) => {
                log::warn!("Analyzer pipe read failed: {}", err);
                0
            }
        };
        let Some(frame) = decode_frame(&buf[..filled], format) else {
            break;
        };
        frames += 1;
        match sender.send_frame(frame) {
            SendOutcome::Queued => {}
            SendOutcome::DroppedOldest => dropped += 1,
            SendOutcome::Disconnected => break,
        }
    }

    drop(fifo);
    log::debug!(
        "Analyzer stream ended after {} frames ({} dropped on overflow)",
        frames,
        dropped
    );
    sender.send_stopped();
}

/// Fill `buf` from `reader`, stopping early only at end-of-stream.
///
/// Returns the number of bytes read; anything below `buf.len()` means EOF.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
