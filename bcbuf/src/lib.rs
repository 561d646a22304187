//! Commented byte buffer used by the bytecode backend.
//!
//! Output is collected as a chain of spans, each carrying some bytes plus an
//! optional human-readable comment for listings. Backends append spans as
//! they emit code, record span handles or absolute offsets for values that
//! are not yet known (sizes, jump targets), and patch them later with the
//! fixup operations. All multi-byte values are written with [`util::Endian`]
//! (little-endian) no matter what the host byte order is.

use byteorder::ByteOrder;
use std::io;
use std::{error, fmt};
use util::Endian;


#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Replacement data does not match the size of the span being replaced.
    SizeMismatch { span: usize, data: usize },
    /// A fixup addressed bytes outside the buffer or straddling a span.
    BadFixup { addr: u32, size: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::SizeMismatch { span, data } => write!(
                f,
                "Replacement data size ({}) does not match span size ({}).",
                data, span
            ),
            Error::BadFixup { addr, size } => {
                write!(f, "Fixup of {} bytes at offset {} is out of range.", size, addr)
            }
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle to a span inside a [`ByteBuffer`]. Spans are never removed, so a
/// handle stays valid for the lifetime of the buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpanId(usize);

#[derive(Debug)]
pub struct OutputSpan {
    data: Vec<u8>,
    comment: Option<String>,
}

impl OutputSpan {
    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Default)]
pub struct ByteBuffer {
    spans: Vec<OutputSpan>,
    total_size: usize,
}

impl ByteBuffer {
    pub fn new() -> ByteBuffer {
        ByteBuffer {
            spans: Vec::new(),
            total_size: 0,
        }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn spans(&self) -> impl Iterator<Item = &OutputSpan> {
        self.spans.iter()
    }

    pub fn push(&mut self, data: &[u8], comment: Option<&str>) -> SpanId {
        let id = SpanId(self.spans.len());
        self.total_size += data.len();
        self.spans.push(OutputSpan {
            data: Vec::from(data),
            comment: comment.map(str::to_owned),
        });
        id
    }

    /// Append `size` zero bytes (reserved space).
    pub fn push_zeroes(&mut self, size: usize, comment: Option<&str>) -> SpanId {
        let id = SpanId(self.spans.len());
        self.total_size += size;
        self.spans.push(OutputSpan {
            data: vec![0; size],
            comment: comment.map(str::to_owned),
        });
        id
    }

    pub fn push_byte(&mut self, data: u8, comment: Option<&str>) -> SpanId {
        self.push(&[data], comment)
    }

    pub fn push_word(&mut self, data: u16, comment: Option<&str>) -> SpanId {
        let mut buf = [0u8; 2];
        Endian::write_u16(&mut buf, data);
        self.push(&buf, comment)
    }

    pub fn push_long(&mut self, data: u32, comment: Option<&str>) -> SpanId {
        let mut buf = [0u8; 4];
        Endian::write_u32(&mut buf, data);
        self.push(&buf, comment)
    }

    /// An empty span carrying only a comment for the listing.
    pub fn push_comment(&mut self, comment: &str) -> SpanId {
        self.push(&[], Some(comment))
    }

    /// Pad with zeroes up to the next multiple of `alignment`.
    /// Returns the number of padding bytes added.
    pub fn align(&mut self, alignment: usize) -> usize {
        let pad = alignment - (self.total_size % alignment);
        if pad != alignment {
            self.push_zeroes(pad, Some("(padding)"));
            pad
        } else {
            0
        }
    }

    /// Replace the contents of a span. The new data must have exactly the
    /// size of the original span.
    pub fn replace(&mut self, span: SpanId, data: &[u8], comment: Option<&str>) -> Result<()> {
        let sp = &mut self.spans[span.0];
        if sp.data.len() != data.len() {
            return Err(Error::SizeMismatch {
                span: sp.data.len(),
                data: data.len(),
            });
        }
        sp.data.copy_from_slice(data);
        if comment.is_some() {
            sp.comment = comment.map(str::to_owned);
        }
        Ok(())
    }

    pub fn replace_byte(&mut self, span: SpanId, data: u8, comment: Option<&str>) -> Result<()> {
        self.replace(span, &[data], comment)
    }

    pub fn replace_word(&mut self, span: SpanId, data: u16, comment: Option<&str>) -> Result<()> {
        let mut buf = [0u8; 2];
        Endian::write_u16(&mut buf, data);
        self.replace(span, &buf, comment)
    }

    pub fn replace_long(&mut self, span: SpanId, data: u32, comment: Option<&str>) -> Result<()> {
        let mut buf = [0u8; 4];
        Endian::write_u32(&mut buf, data);
        self.replace(span, &buf, comment)
    }

    /// Overwrite bytes at an absolute offset recorded earlier. The patched
    /// range must fall entirely within one span.
    pub fn fixup_data(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if data.len() > self.total_size {
            return Err(Error::BadFixup {
                addr,
                size: data.len(),
            });
        }
        let addr = addr as usize;
        let mut off = 0usize;
        for sp in self.spans.iter_mut() {
            if off <= addr && addr < off + sp.data.len() {
                if addr + data.len() > off + sp.data.len() {
                    break;
                }
                let start = addr - off;
                sp.data[start..start + data.len()].copy_from_slice(data);
                return Ok(());
            }
            off += sp.data.len();
        }
        Err(Error::BadFixup {
            addr: addr as u32,
            size: data.len(),
        })
    }

    pub fn fixup_byte(&mut self, addr: u32, data: u8) -> Result<()> {
        self.fixup_data(addr, &[data])
    }

    pub fn fixup_word(&mut self, addr: u32, data: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        Endian::write_u16(&mut buf, data);
        self.fixup_data(addr, &buf)
    }

    pub fn fixup_long(&mut self, addr: u32, data: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        Endian::write_u32(&mut buf, data);
        self.fixup_data(addr, &buf)
    }

    /// Write the raw bytes of every span, in order.
    pub fn write_to<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        for sp in &self.spans {
            writer.write_all(&sp.data)?;
        }
        Ok(())
    }
}
