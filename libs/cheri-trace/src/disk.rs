//! Byte-aligned big-endian records used for trace capture files.
//!
//! ```text
//! v1 (24 bytes): flags exception cycles:u16 instruction:u32 pc:u64 value2:u64
//! v2 (26 bytes): v1 record followed by thread:u8 asid:u8
//! ```
//!
//! `flags` carries the version in bits 0..3 and the branch flag in bit 6.
//! Bit 7 is only ever set in the v2 header record, which is `0x80 | 2`
//! followed by [`MAGIC`] and zero padding up to the record size.

use std::io::Write;

use bilge::prelude::*;
use nom::{
    bytes::complete::tag,
    combinator::all_consuming,
    multi::count,
    number::complete::{be_u16, be_u32, be_u64, be_u8},
    IResult,
};

use crate::{Error, Result, TraceEntry};

pub const MAGIC: &[u8; 16] = b"CheriStreamTrace";
pub const V1_RECORD_SIZE: usize = 24;
pub const V2_RECORD_SIZE: usize = 26;
const HEADER_MARKER: u8 = 0x80;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceFormat {
    V1,
    V2,
}

impl TraceFormat {
    pub fn record_size(&self) -> usize {
        match self {
            TraceFormat::V1 => V1_RECORD_SIZE,
            TraceFormat::V2 => V2_RECORD_SIZE,
        }
    }

    pub fn version(&self) -> u8 {
        match self {
            TraceFormat::V1 => 1,
            TraceFormat::V2 => 2,
        }
    }

    /// The record that opens a v2 file. v1 files have none.
    pub fn header(&self) -> Option<[u8; V2_RECORD_SIZE]> {
        match self {
            TraceFormat::V1 => None,
            TraceFormat::V2 => {
                let mut header = [0; V2_RECORD_SIZE];
                header[0] = HEADER_MARKER | self.version();
                header[1..1 + MAGIC.len()].copy_from_slice(MAGIC);
                Some(header)
            }
        }
    }
}

#[bitsize(8)]
#[derive(FromBits, Copy, Clone, DebugBits, PartialEq, Eq)]
struct Flags {
    version: u4,
    spare: u2,
    branch: bool,
    header: bool,
}

fn flags_of(entry: &TraceEntry) -> u8 {
    Flags::new(u4::new(entry.version & 0xf), u2::new(0), entry.branch, false).into()
}

fn common_fields(entry: &TraceEntry, out: &mut [u8]) {
    out[0] = flags_of(entry);
    out[1] = entry.exception;
    out[2..4].copy_from_slice(&entry.cycles.to_be_bytes());
    out[4..8].copy_from_slice(&entry.instruction.to_be_bytes());
    out[8..16].copy_from_slice(&entry.pc.to_be_bytes());
    out[16..24].copy_from_slice(&entry.value2.to_be_bytes());
}

pub fn encode_disk_v1(entry: &TraceEntry) -> [u8; V1_RECORD_SIZE] {
    let mut out = [0; V1_RECORD_SIZE];
    common_fields(entry, &mut out);
    out
}

pub fn encode_disk_v2(entry: &TraceEntry) -> [u8; V2_RECORD_SIZE] {
    let mut out = [0; V2_RECORD_SIZE];
    common_fields(entry, &mut out);
    out[24] = entry.thread;
    out[25] = entry.asid;
    out
}

fn record(format: TraceFormat) -> impl FnMut(&[u8]) -> IResult<&[u8], TraceEntry> {
    move |input| {
        let (input, flags) = be_u8(input)?;
        let (input, exception) = be_u8(input)?;
        let (input, cycles) = be_u16(input)?;
        let (input, instruction) = be_u32(input)?;
        let (input, pc) = be_u64(input)?;
        let (input, value2) = be_u64(input)?;
        let (input, thread, asid) = match format {
            TraceFormat::V1 => (input, 0, 0),
            TraceFormat::V2 => {
                let (input, thread) = be_u8(input)?;
                let (input, asid) = be_u8(input)?;
                (input, thread, asid)
            }
        };
        let flags = Flags::from(flags);
        Ok((
            input,
            TraceEntry {
                valid: true,
                version: flags.version().value(),
                exception,
                cycles,
                instruction,
                pc,
                value1: 0,
                value2,
                asid,
                thread,
                branch: flags.branch(),
            },
        ))
    }
}

/// Decodes one record. `bytes` must hold exactly one record of `format`.
pub fn decode_disk(bytes: &[u8], format: TraceFormat) -> Result<TraceEntry> {
    if bytes.len() != format.record_size() {
        return Err(Error::MalformedFile {
            len: bytes.len(),
            record_size: format.record_size(),
        });
    }
    let (_, entry) = all_consuming(record(format))(bytes).map_err(|_| Error::Parse(0))?;
    Ok(entry)
}

/// Recognises the v2 header record and returns the format version it names.
fn header(input: &[u8]) -> IResult<&[u8], u8> {
    let (input, marker) = be_u8(input)?;
    if marker & HEADER_MARKER == 0 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    let (input, _) = tag(&MAGIC[..])(input)?;
    Ok((input, marker & !HEADER_MARKER))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceFile {
    pub format: TraceFormat,
    pub entries: Vec<TraceEntry>,
}

impl TraceFile {
    /// Picks the record format from the first record, then decodes the rest
    /// of the file with it.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (format, body) = match header(bytes) {
            Ok((_, version)) if bytes.len() >= V2_RECORD_SIZE => {
                if version != TraceFormat::V2.version() {
                    return Err(Error::UnsupportedVersion(version));
                }
                // The rest of the header record is padding.
                (TraceFormat::V2, &bytes[V2_RECORD_SIZE..])
            }
            _ => (TraceFormat::V1, bytes),
        };
        log::debug!("Trace file: {:?}, {} bytes of records", format, body.len());

        let record_size = format.record_size();
        if body.len() % record_size != 0 {
            return Err(Error::MalformedFile {
                len: bytes.len(),
                record_size,
            });
        }
        let records = body.len() / record_size;
        let (remaining, entries) =
            count(record(format), records)(body).map_err(|e| match e {
                nom::Err::Error(e) | nom::Err::Failure(e) => {
                    Error::Parse(bytes.len() - e.input.len())
                }
                nom::Err::Incomplete(_) => Error::Parse(bytes.len()),
            })?;
        debug_assert!(remaining.is_empty());
        Ok(Self { format, entries })
    }
}

/// Writes a capture file, header first when the format has one.
pub struct TraceWriter<W: Write> {
    inner: W,
    format: TraceFormat,
    written: usize,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(mut inner: W, format: TraceFormat) -> Result<Self> {
        if let Some(header) = format.header() {
            inner.write_all(&header)?;
        }
        Ok(Self {
            inner,
            format,
            written: 0,
        })
    }

    pub fn write(&mut self, entry: &TraceEntry) -> Result<()> {
        match self.format {
            TraceFormat::V1 => self.inner.write_all(&encode_disk_v1(entry))?,
            TraceFormat::V2 => self.inner.write_all(&encode_disk_v2(entry))?,
        }
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
