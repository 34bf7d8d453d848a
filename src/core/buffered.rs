//! Purpose: Byte channel that is writable and readable at the same time.
//! Exports: `BufferedRw`, `OverrunPolicy`, `copy_chunked`, `DEFAULT_CHUNK_SIZE`.
//! Role: Backing store for cached resources and for talker response bodies.
//! Invariants: A reader never observes bytes past the current write position.
//! Invariants: Reads block while the stream is unfinished; `Ok(0)` means finished and drained.
//! Invariants: Views share storage with their source but own their read cursor.
//! Invariants: `close` is idempotent and only drops this handle's share of the storage.
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_CHUNK_SIZE: usize = 81920;

/// What a write does when it would push the channel past its capacity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OverrunPolicy {
    /// Capacity is only an allocation hint; storage grows without bound.
    Grow,
    /// The whole write is rejected with `ErrorKind::Overrun`; nothing is appended.
    Fail,
}

struct Storage {
    state: Mutex<State>,
    ready: Condvar,
}

struct State {
    data: Vec<u8>,
    finished: bool,
}

impl Storage {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                data: Vec::with_capacity(capacity.min(DEFAULT_CHUNK_SIZE)),
                finished: false,
            }),
            ready: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Copy, Debug)]
enum Role {
    Owner {
        capacity: usize,
        policy: OverrunPolicy,
    },
    View {
        window: usize,
    },
}

pub struct BufferedRw {
    storage: Option<Arc<Storage>>,
    role: Role,
    pos: usize,
}

impl BufferedRw {
    pub fn new(capacity: usize, policy: OverrunPolicy) -> Self {
        Self {
            storage: Some(Storage::new(capacity)),
            role: Role::Owner { capacity, policy },
            pos: 0,
        }
    }

    /// Growable channel; `capacity` only sizes the first allocation.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, OverrunPolicy::Grow)
    }

    /// Seeds a finished snapshot with the full contents of `reader`.
    pub fn from_reader<R: Read>(capacity: usize, reader: R) -> Result<Self, Error> {
        let mut channel = Self::with_capacity(capacity);
        copy_chunked(reader, &mut channel, DEFAULT_CHUNK_SIZE)?;
        channel.finish();
        Ok(channel)
    }

    /// Independent read cursor over this channel's storage.
    ///
    /// The view sees everything written to the source so far and anything
    /// appended later, until the source is reset (the view keeps the old
    /// content) or finished. Each read returns at most `window` bytes. Views
    /// are read-only.
    pub fn view(&self, window: usize) -> Result<BufferedRw, Error> {
        let storage = self.storage.as_ref().ok_or_else(closed_error)?;
        Ok(Self {
            storage: Some(Arc::clone(storage)),
            role: Role::View {
                window: window.max(1),
            },
            pos: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        match self.role {
            Role::Owner { capacity, .. } => capacity,
            Role::View { window } => window,
        }
    }

    pub fn policy(&self) -> Option<OverrunPolicy> {
        match self.role {
            Role::Owner { policy, .. } => Some(policy),
            Role::View { .. } => None,
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self.role, Role::View { .. })
    }

    pub fn is_closed(&self) -> bool {
        self.storage.is_none()
    }

    pub fn is_finished(&self) -> bool {
        match &self.storage {
            Some(storage) => storage.lock().finished,
            None => true,
        }
    }

    /// Bytes written so far (the write position).
    pub fn len(&self) -> usize {
        match &self.storage {
            Some(storage) => storage.lock().data.len(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// This handle's read position.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.pos)
    }

    /// Copy of everything written so far, independent of the read position.
    pub fn to_vec(&self) -> Vec<u8> {
        match &self.storage {
            Some(storage) => storage.lock().data.clone(),
            None => Vec::new(),
        }
    }

    /// Marks the end of the stream; blocked readers wake and drain to `Ok(0)`.
    pub fn finish(&self) {
        if let Some(storage) = &self.storage {
            storage.lock().finished = true;
            storage.ready.notify_all();
        }
    }

    pub(crate) fn resume(&self) {
        if let (Some(storage), Role::Owner { .. }) = (&self.storage, self.role) {
            storage.lock().finished = false;
        }
    }

    /// Discards content and the read position. Capacity and policy are kept
    /// and the channel stays open; on a view only the cursor rewinds.
    pub fn reset(&mut self) {
        if self.storage.is_none() {
            return;
        }
        self.pos = 0;
        if let Role::Owner { capacity, .. } = self.role {
            let previous = self.storage.replace(Storage::new(capacity));
            if let Some(previous) = previous {
                previous.lock().finished = true;
                previous.ready.notify_all();
            }
        }
    }

    pub fn close(&mut self) {
        let Some(storage) = self.storage.take() else {
            return;
        };
        if let Role::Owner { .. } = self.role {
            storage.lock().finished = true;
            storage.ready.notify_all();
        }
    }

    fn append(&self, bytes: &[u8]) -> Result<usize, Error> {
        let Role::Owner { capacity, policy } = self.role else {
            return Err(Error::new(ErrorKind::Usage).with_message("buffered view is read-only"));
        };
        let storage = self.storage.as_ref().ok_or_else(closed_error)?;
        if bytes.is_empty() {
            return Ok(0);
        }
        let mut state = storage.lock();
        if state.finished {
            return Err(Error::new(ErrorKind::Closed).with_message("write after end of stream"));
        }
        if policy == OverrunPolicy::Fail && state.data.len() + bytes.len() > capacity {
            return Err(Error::new(ErrorKind::Overrun).with_message(format!(
                "write of {} bytes exceeds capacity {capacity} ({} buffered)",
                bytes.len(),
                state.data.len()
            )));
        }
        state.data.extend_from_slice(bytes);
        drop(state);
        storage.ready.notify_all();
        Ok(bytes.len())
    }

    fn take(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let storage = self.storage.as_ref().ok_or_else(closed_error)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let limit = match self.role {
            Role::Owner { .. } => buf.len(),
            Role::View { window } => buf.len().min(window),
        };
        let mut state = storage.lock();
        loop {
            if self.pos < state.data.len() {
                let n = limit.min(state.data.len() - self.pos);
                buf[..n].copy_from_slice(&state.data[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if state.finished {
                return Ok(0);
            }
            state = storage
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Read for BufferedRw {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.take(buf).map_err(Error::into_io)
    }
}

impl Write for BufferedRw {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf).map_err(Error::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.storage.is_none() {
            return Err(closed_error().into_io());
        }
        Ok(())
    }
}

impl Drop for BufferedRw {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for BufferedRw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedRw")
            .field("role", &self.role)
            .field("len", &self.len())
            .field("pos", &self.pos)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drains `reader` into `writer` in steps of at most `chunk_size` bytes.
pub fn copy_chunked<R, W>(mut reader: R, writer: &mut W, chunk_size: usize) -> Result<u64, Error>
where
    R: Read,
    W: Write + ?Sized,
{
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(Error::from_io(err)),
        };
        writer.write_all(&chunk[..n]).map_err(Error::from_io)?;
        total += n as u64;
    }
    Ok(total)
}

fn closed_error() -> Error {
    Error::new(ErrorKind::Closed).with_message("buffered channel is closed")
}
