//! Random access over the dump file.
//!
//! [`DumpBuffer`] is the single gateway for every byte read in the crate.
//! It prefers a whole-file memory mapping and falls back to the bounded
//! [`paged`] reader when mapping fails or when the configuration forces
//! paging. All multi-byte values in the format are big endian.

pub(crate) mod paged;

use std::fs::File;
use std::path::Path;

use log::{debug, info};
use memmap2::Mmap;

use crate::config::HeapConfig;
use crate::error::{HeapError, Result};
use paged::PagedFile;

/// Smallest possible well-formed dump: the short magic plus id size and
/// timestamp. Anything below this is rejected before parsing.
const MINIMAL_SIZE: u64 = 30;

const MAGIC_101: &str = "JAVA PROFILE 1.0.1";
const MAGIC_102: &str = "JAVA PROFILE 1.0.2";

/// Dump format version, taken from the magic string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HprofVersion {
    V1_0_1,
    V1_0_2,
}

impl HprofVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HprofVersion::V1_0_1 => MAGIC_101,
            HprofVersion::V1_0_2 => MAGIC_102,
        }
    }
}

/// Parsed file header.
#[derive(Debug, Clone)]
pub struct Header {
    pub version: HprofVersion,
    /// Identifier width in bytes, 4 or 8.
    pub id_size: u32,
    /// Dump creation time, milliseconds since the epoch.
    pub timestamp_ms: u64,
    /// Offset of the first record, right after the header.
    pub(crate) header_size: u64,
}

enum DumpData {
    Mapped(Mmap),
    Paged(PagedFile),
}

/// Bounds-checked big-endian reader over the whole dump.
pub(crate) struct DumpBuffer {
    data: DumpData,
    header: Header,
    len: u64,
    sanity_limit: u64,
}

impl std::fmt::Debug for DumpBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpBuffer")
            .field("header", &self.header)
            .field("len", &self.len)
            .field("sanity_limit", &self.sanity_limit)
            .finish_non_exhaustive()
    }
}

impl DumpBuffer {
    pub(crate) fn open(path: &Path, config: &HeapConfig) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < MINIMAL_SIZE {
            return Err(HeapError::InvalidFormat(format!(
                "file too small ({len} bytes) to be a heap dump"
            )));
        }
        let data = if config.force_paged_reader {
            debug!("paged reader forced by configuration");
            DumpData::Paged(PagedFile::new(file, len, config.page_size, config.page_pool_pages))
        } else {
            // SAFETY: the mapping is read-only and the dump file is treated
            // as immutable for the lifetime of the analysis.
            match unsafe { Mmap::map(&file) } {
                Ok(mmap) => DumpData::Mapped(mmap),
                Err(err) => {
                    info!("memory mapping failed ({err}), falling back to paged reads");
                    DumpData::Paged(PagedFile::new(
                        file,
                        len,
                        config.page_size,
                        config.page_pool_pages,
                    ))
                }
            }
        };
        let mut buffer = DumpBuffer {
            data,
            header: Header {
                version: HprofVersion::V1_0_1,
                id_size: 0,
                timestamp_ms: 0,
                header_size: 0,
            },
            len,
            sanity_limit: config.sanity_limit,
        };
        buffer.header = buffer.parse_header()?;
        debug!(
            "opened dump: {} bytes, version {}, id size {}",
            len,
            buffer.header.version.as_str(),
            buffer.header.id_size
        );
        Ok(buffer)
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn id_size(&self) -> u32 {
        self.header.id_size
    }

    fn parse_header(&self) -> Result<Header> {
        // The magic is a NUL-terminated ASCII string at offset 0.
        let mut magic = Vec::with_capacity(MAGIC_101.len() + 1);
        let mut pos = 0u64;
        loop {
            if pos >= MINIMAL_SIZE {
                return Err(HeapError::InvalidFormat(
                    "unterminated version string in header".into(),
                ));
            }
            let byte = self.read_u8(pos)?;
            pos += 1;
            if byte == 0 {
                break;
            }
            magic.push(byte);
        }
        let magic = String::from_utf8(magic)
            .map_err(|_| HeapError::InvalidFormat("non-ASCII version string".into()))?;
        let version = match magic.as_str() {
            MAGIC_101 => HprofVersion::V1_0_1,
            MAGIC_102 => HprofVersion::V1_0_2,
            other => {
                return Err(HeapError::InvalidFormat(format!(
                    "unsupported version string {other:?}"
                )))
            }
        };
        let id_size = self.read_u32(pos)?;
        if id_size != 4 && id_size != 8 {
            return Err(HeapError::InvalidFormat(format!(
                "unsupported identifier size {id_size}"
            )));
        }
        let timestamp_ms = self.read_u64(pos + 4)?;
        Ok(Header { version, id_size, timestamp_ms, header_size: pos + 12 })
    }

    fn check(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset.checked_add(len as u64).ok_or(HeapError::OutOfBounds {
            offset,
            len,
            limit: self.len,
        })?;
        if end > self.len || end > self.sanity_limit {
            return Err(HeapError::OutOfBounds {
                offset,
                len,
                limit: self.len.min(self.sanity_limit),
            });
        }
        Ok(())
    }

    /// Full-length read, failing if any byte is past end of file.
    pub(crate) fn read_exact(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check(offset, buf.len())?;
        match &self.data {
            DumpData::Mapped(mmap) => {
                let start = offset as usize;
                buf.copy_from_slice(&mmap[start..start + buf.len()]);
                Ok(())
            }
            DumpData::Paged(paged) => paged.read_exact(offset, buf),
        }
    }

    /// Best-effort read near end of file: fills as much of `buf` as the
    /// file still covers and returns the byte count.
    pub(crate) fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let avail = ((self.len - offset) as usize).min(buf.len());
        self.read_exact(offset, &mut buf[..avail])?;
        Ok(avail)
    }

    pub(crate) fn read_u8(&self, offset: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(offset, &mut buf)?;
        Ok(buf[0])
    }

    pub(crate) fn read_u16(&self, offset: u64) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(offset, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub(crate) fn read_u32(&self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(offset, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub(crate) fn read_u64(&self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(offset, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads one identifier, widening 4-byte ids to `u64`.
    pub(crate) fn read_id(&self, offset: u64) -> Result<u64> {
        if self.header.id_size == 4 {
            Ok(self.read_u32(offset)? as u64)
        } else {
            self.read_u64(offset)
        }
    }
}
