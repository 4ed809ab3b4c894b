//! Disk-spilling queue of `u64` values.
//!
//! Small queues stay in a plain vector; once the vector fills, the whole
//! contents move to an unlinked scratch file and further writes stream to
//! it. Reading yields values in write order and returns `0` past the end,
//! which is safe as a sentinel because object identifiers are never zero.
//!
//! The graph passes use pairs of these as level queues (read one, write
//! the other, swap) and the dominator pass additionally needs a reversed
//! copy, so the lifecycle is explicit: write, [`start_reading`]
//! (flushes), read, [`rewind`] or [`reset`] and start over.
//!
//! [`start_reading`]: LongQueue::start_reading
//! [`rewind`]: LongQueue::rewind
//! [`reset`]: LongQueue::reset

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use crate::error::{HeapError, Result};

enum Backing {
    /// File exists but no stream is active.
    Idle(File),
    Writing(BufWriter<File>),
    Reading(BufReader<File>),
}

pub(crate) struct LongQueue {
    buffer: Vec<u64>,
    capacity: usize,
    backing: Option<Backing>,
    /// True once the buffer has spilled; from then on the file holds every
    /// value and the vector is dead weight until `reset`.
    spilled: bool,
    read_offset: usize,
    read_closed: bool,
    count: u64,
}

impl LongQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        LongQueue {
            buffer: Vec::with_capacity(capacity),
            capacity,
            backing: None,
            spilled: false,
            read_offset: 0,
            read_closed: false,
            count: 0,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.count
    }

    pub(crate) fn has_data(&self) -> bool {
        self.count > 0
    }

    pub(crate) fn write(&mut self, value: u64) -> Result<()> {
        self.count += 1;
        if !self.spilled && self.buffer.len() < self.capacity {
            self.buffer.push(value);
            return Ok(());
        }
        let mut writer = self.take_writer()?;
        writer.write_all(&value.to_be_bytes())?;
        self.backing = Some(Backing::Writing(writer));
        Ok(())
    }

    /// Next value in write order, `0` when exhausted.
    pub(crate) fn read(&mut self) -> Result<u64> {
        if !self.spilled {
            if self.read_offset < self.buffer.len() {
                let value = self.buffer[self.read_offset];
                self.read_offset += 1;
                return Ok(value);
            }
            return Ok(0);
        }
        if self.read_closed {
            return Ok(0);
        }
        let mut reader = match self.backing.take() {
            Some(Backing::Reading(reader)) => reader,
            other => {
                self.backing = other;
                return Err(HeapError::Internal(
                    "queue read before start_reading".into(),
                ));
            }
        };
        let mut bytes = [0u8; 8];
        let result = match reader.read_exact(&mut bytes) {
            Ok(()) => Ok(u64::from_be_bytes(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.read_closed = true;
                Ok(0)
            }
            Err(err) => Err(err.into()),
        };
        self.backing = Some(Backing::Reading(reader));
        result
    }

    /// Flushes any pending writes and positions the reader at the start.
    pub(crate) fn start_reading(&mut self) -> Result<()> {
        if let Some(Backing::Writing(writer)) = self.backing.take() {
            let file = into_file(writer)?;
            self.backing = Some(Backing::Idle(file));
        } else if let Some(other) = self.backing.take() {
            self.backing = Some(other);
        }
        self.rewind()
    }

    /// Repositions the reader at the first value without touching the
    /// contents.
    pub(crate) fn rewind(&mut self) -> Result<()> {
        self.read_offset = 0;
        self.read_closed = false;
        if self.spilled {
            let mut file = self.take_file()?;
            file.seek(SeekFrom::Start(0))?;
            self.backing = Some(Backing::Reading(BufReader::new(file)));
        }
        Ok(())
    }

    /// Empties the queue for reuse. The scratch file, if any, is kept and
    /// truncated lazily on the next spill.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.buffer.clear();
        self.count = 0;
        self.spilled = false;
        self.read_offset = 0;
        self.read_closed = false;
        if self.backing.is_some() {
            let file = self.take_file()?;
            self.backing = Some(Backing::Idle(file));
        }
        Ok(())
    }

    /// Builds a new queue holding this queue's values in reverse order,
    /// already positioned for reading. `self` must have been fully
    /// written; its read position is left unspecified.
    pub(crate) fn reversed(&mut self) -> Result<LongQueue> {
        let mut reverted = LongQueue::new(self.capacity);
        if !self.spilled {
            for value in self.buffer.iter().rev() {
                reverted.write(*value)?;
            }
        } else {
            let mut file = self.take_file()?;
            let len = file.seek(SeekFrom::End(0))?;
            let mut offset = len;
            let mut bytes = [0u8; 8];
            while offset >= 8 {
                offset -= 8;
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut bytes)?;
                reverted.write(u64::from_be_bytes(bytes))?;
            }
            self.backing = Some(Backing::Idle(file));
        }
        reverted.start_reading()?;
        Ok(reverted)
    }

    fn take_writer(&mut self) -> Result<BufWriter<File>> {
        match self.backing.take() {
            Some(Backing::Writing(writer)) => Ok(writer),
            Some(Backing::Idle(mut file)) => {
                if !self.spilled {
                    // Reused after reset: truncate before the new spill.
                    file.set_len(0)?;
                    file.seek(SeekFrom::Start(0))?;
                    self.spill_buffer_to(&mut file)?;
                } else {
                    file.seek(SeekFrom::End(0))?;
                }
                Ok(BufWriter::new(file))
            }
            Some(Backing::Reading(reader)) => {
                let mut file = reader.into_inner();
                file.seek(SeekFrom::End(0))?;
                Ok(BufWriter::new(file))
            }
            None => {
                let mut file = tempfile::tempfile()?;
                self.spill_buffer_to(&mut file)?;
                Ok(BufWriter::new(file))
            }
        }
    }

    fn spill_buffer_to(&mut self, file: &mut File) -> Result<()> {
        let mut writer = BufWriter::new(&mut *file);
        for value in &self.buffer {
            writer.write_all(&value.to_be_bytes())?;
        }
        writer.flush()?;
        drop(writer);
        self.spilled = true;
        Ok(())
    }

    fn take_file(&mut self) -> Result<File> {
        match self.backing.take() {
            Some(Backing::Idle(file)) => Ok(file),
            Some(Backing::Writing(writer)) => into_file(writer),
            Some(Backing::Reading(reader)) => Ok(reader.into_inner()),
            None => Err(HeapError::Internal("queue has no backing file".into())),
        }
    }
}

fn into_file(writer: BufWriter<File>) -> Result<File> {
    writer.into_inner().map_err(|err| HeapError::Io(err.into_error()))
}
