// Bounded blocking byte pipe connecting a producer thread to a consumer.
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_PIPE_DEPTH: usize = 16;

enum Chunk {
    Data(Vec<u8>),
    Abort(Error),
}

/// Creates a pipe holding at most `depth` in-flight chunks.
pub fn pipe(depth: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::sync_channel(depth.max(1));
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            pending: Vec::new(),
            offset: 0,
            done: false,
        },
    )
}

/// Producer end. Dropping it (or `close`) ends the stream for the reader.
pub struct PipeWriter {
    tx: SyncSender<Chunk>,
}

impl PipeWriter {
    pub fn close(self) {
        drop(self);
    }

    /// Ends the stream with an error instead of a clean end-of-data.
    pub fn abort(self, err: Error) {
        let _ = self.tx.send(Chunk::Abort(err));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx.send(Chunk::Data(buf.to_vec())).map_err(|_| {
            Error::new(ErrorKind::Closed)
                .with_message("pipe reader is gone")
                .into_io()
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct PipeReader {
    rx: Receiver<Chunk>,
    pending: Vec<u8>,
    offset: usize,
    done: bool,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.offset < self.pending.len() {
                let n = buf.len().min(self.pending.len() - self.offset);
                buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }
            if self.done || buf.is_empty() {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Chunk::Data(data)) => {
                    self.pending = data;
                    self.offset = 0;
                }
                Ok(Chunk::Abort(err)) => {
                    self.done = true;
                    return Err(err.into_io());
                }
                Err(_) => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }
    }
}
