// Copyright 2025 flightlog authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Binary container format shared by the recorder and the extractor.
//
// A log file is a flat stream of entries after an 8-byte file header:
//
//   file header:  magic:u32 "LOG!", version:u32
//   entry:        id:u32, len:u32, payload[len]
//
// Ids 0..255 are reserved for framing (source descriptions, LZ4 blocks,
// AES key material and AES blocks); every other id must have been declared
// by a preceding SOURCE_DESC entry. All integers are little-endian,
// unaligned. Strings are u16-length-prefixed and NUL-terminated, the
// length including the terminator.

use thiserror::Error;

/// Magic value at start of file, "LOG!" little-endian.
pub const FILE_MAGIC: u32 = 0x2147_4f4c;
/// Highest container version understood by this crate.
pub const FILE_VERSION: u32 = 3;
/// Size of the file header (magic + version).
pub const FILE_HEADER_SIZE: usize = 8;

/// Reserved entry ids.
pub const ID_SOURCE_DESC: u32 = 0;
pub const ID_LZ4: u32 = 1;
pub const ID_AES_DESC: u32 = 2;
pub const ID_AES: u32 = 3;
/// First id handed out to registered sources.
pub const ID_BASE: u32 = 256;

/// Refuse any single allocation above this while decoding.
pub const MAX_ALLOC_SIZE: usize = 32 * 1024 * 1024;

/// Size of an entry header on the wire.
pub const ENTRY_HEADER_SIZE: usize = 8;

pub const AES_BLOCK_SIZE: usize = 16;

/// Magic marking a valid telemetry metadata block, "TLM!" little-endian.
pub const TLM_MAGIC: u32 = 0x214d_4c54;
/// Tag preceding a telemetry section header inside a telemetry entry.
pub const TLM_TAG_HEADER: u8 = 0;
/// Tag preceding a telemetry sample inside a telemetry entry.
pub const TLM_TAG_SAMPLE: u8 = 1;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bad magic: {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported version: {0}")]
    BadVersion(u32),
    #[error("truncated data: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("entry too big: {0} bytes")]
    EntryTooBig(u32),
    #[error("string length is 0")]
    EmptyString,
    #[error("string is not nul-terminated")]
    UnterminatedString,
    #[error("telemetry metadata invalid: {0}")]
    BadTelemetryMetadata(&'static str),
}

pub type Result<T> = std::result::Result<T, FormatError>;

/// Header framing one entry of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub id: u32,
    pub len: u32,
}

impl EntryHeader {
    pub fn new(id: u32, len: u32) -> Self {
        Self { id, len }
    }

    pub fn to_bytes(self) -> [u8; ENTRY_HEADER_SIZE] {
        let mut buf = [0u8; ENTRY_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.len.to_le_bytes());
        buf
    }
}

/// Writable window over a byte buffer, used by sources to produce one
/// entry worth of data. All push methods return `false` without side
/// effect when the remaining room is too small.
pub struct LogData<'a> {
    buf: &'a mut [u8],
    used: usize,
}

impl<'a> LogData<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, used: 0 }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.used
    }

    /// Reserve `count` bytes the caller has already written in place.
    pub fn skip(&mut self, count: usize) -> bool {
        if count > self.remaining() {
            return false;
        }
        self.used += count;
        true
    }

    /// Current write position, for callers that fill bytes directly.
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.used..]
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.remaining() {
            return false;
        }
        self.buf[self.used..self.used + bytes.len()].copy_from_slice(bytes);
        self.used += bytes.len();
        true
    }

    pub fn push_u8(&mut self, val: u8) -> bool {
        self.push_bytes(&[val])
    }

    pub fn push_u16(&mut self, val: u16) -> bool {
        self.push_bytes(&val.to_le_bytes())
    }

    pub fn push_u32(&mut self, val: u32) -> bool {
        self.push_bytes(&val.to_le_bytes())
    }

    pub fn push_u64(&mut self, val: u64) -> bool {
        self.push_bytes(&val.to_le_bytes())
    }

    pub fn push_f64(&mut self, val: f64) -> bool {
        self.push_bytes(&val.to_le_bytes())
    }

    /// Push a string as u16 length (including NUL) + bytes + NUL.
    pub fn push_str(&mut self, val: &str) -> bool {
        self.push_str_reserved(val, val.len())
    }

    /// Push a string padded with NUL bytes up to `reserved` characters,
    /// so the field can later be rewritten in place with any value of
    /// the same or shorter length.
    pub fn push_str_reserved(&mut self, val: &str, reserved: usize) -> bool {
        if val.len() > reserved || reserved + 1 > u16::MAX as usize {
            return false;
        }
        let slen = (reserved + 1) as u16;
        if 2 + slen as usize > self.remaining() {
            return false;
        }
        self.push_u16(slen);
        self.push_bytes(val.as_bytes());
        for _ in val.len()..=reserved {
            self.push_u8(0);
        }
        true
    }
}

/// Wire size of a string encoded by [`LogData::push_str_reserved`].
pub fn string_wire_size(reserved: usize) -> usize {
    2 + reserved + 1
}

/// Read-only cursor over a decoded byte slice.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) -> bool {
        if pos > self.buf.len() {
            return false;
        }
        self.pos = pos;
        true
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(FormatError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a `(sec:u32, nsec:u32)` pair as microseconds.
    pub fn read_timestamp_us(&mut self) -> Result<i64> {
        let sec = self.read_u32()? as i64;
        let nsec = self.read_u32()? as i64;
        Ok(sec * 1_000_000 + nsec / 1000)
    }

    /// Read a u16-length-prefixed NUL-terminated string. The logical
    /// value stops at the first NUL, which allows padded rewritable
    /// fields to decode to their current value.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        if len == 0 {
            return Err(FormatError::EmptyString);
        }
        let raw = self.read_bytes(len)?;
        if raw[len - 1] != 0 {
            return Err(FormatError::UnterminatedString);
        }
        let end = raw.iter().position(|&b| b == 0).unwrap_or(len - 1);
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn read_entry_header(&mut self) -> Result<EntryHeader> {
        let id = self.read_u32()?;
        let len = self.read_u32()?;
        Ok(EntryHeader { id, len })
    }
}

/// Immutable description of one registered source. Emitted as a
/// SOURCE_DESC entry before the source's first data entry of each file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDesc {
    pub source_id: u32,
    pub version: u32,
    pub plugin: String,
    pub name: String,
}

impl SourceDesc {
    pub fn new(source_id: u32, plugin: &str, name: &str, version: u32) -> Self {
        Self {
            source_id,
            version,
            plugin: plugin.to_string(),
            name: name.to_string(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}-{}", self.plugin, self.name)
    }

    fn payload_size(&self) -> usize {
        4 + 4 + string_wire_size(self.plugin.len()) + string_wire_size(self.name.len())
    }

    /// Total wire size of the SOURCE_DESC entry, header included.
    pub fn wire_size(&self) -> usize {
        ENTRY_HEADER_SIZE + self.payload_size()
    }

    /// Encode the full SOURCE_DESC entry (header + payload) into `data`.
    pub fn encode_entry(&self, data: &mut LogData<'_>) -> bool {
        let hdr = EntryHeader::new(ID_SOURCE_DESC, self.payload_size() as u32);
        data.push_bytes(&hdr.to_bytes())
            && data.push_u32(self.source_id)
            && data.push_u32(self.version)
            && data.push_str(&self.plugin)
            && data.push_str(&self.name)
    }

    /// Encode the full SOURCE_DESC entry into a fresh buffer.
    pub fn to_entry_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.wire_size()];
        let mut data = LogData::new(&mut buf);
        // Cannot fail, the buffer was sized for it
        let ok = self.encode_entry(&mut data);
        debug_assert!(ok);
        buf
    }

    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        let source_id = reader.read_u32()?;
        let version = reader.read_u32()?;
        let plugin = reader.read_string()?;
        let name = reader.read_string()?;
        Ok(Self {
            source_id,
            version,
            plugin,
            name,
        })
    }
}

/// Element types of a telemetry variable description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TlmType {
    Bool = 0,
    U8 = 1,
    I8 = 2,
    U16 = 3,
    I16 = 4,
    U32 = 5,
    I32 = 6,
    U64 = 7,
    I64 = 8,
    F32 = 9,
    F64 = 10,
    String = 11,
    Binary = 12,
}

impl TlmType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(TlmType::Bool),
            1 => Some(TlmType::U8),
            2 => Some(TlmType::I8),
            3 => Some(TlmType::U16),
            4 => Some(TlmType::I16),
            5 => Some(TlmType::U32),
            6 => Some(TlmType::I32),
            7 => Some(TlmType::U64),
            8 => Some(TlmType::I64),
            9 => Some(TlmType::F32),
            10 => Some(TlmType::F64),
            11 => Some(TlmType::String),
            12 => Some(TlmType::Binary),
            _ => None,
        }
    }
}

/// One variable of a telemetry section layout.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDesc {
    pub name: String,
    pub ty: u32,
    pub size: u32,
    pub count: u32,
}

impl VarDesc {
    pub fn new(name: &str, ty: TlmType, size: u32, count: u32) -> Self {
        Self {
            name: name.to_string(),
            ty: ty as u32,
            size,
            count,
        }
    }

    pub fn is_array(&self) -> bool {
        self.count >= 2
    }
}

/// Fixed-size prefix of a variable description record on the wire:
/// reclen, namelen, type, size, count, flags.
const VAR_DESC_RECORD_SIZE: usize = 24;
const MAX_VAR_DESC_COUNT: u32 = 65536;

/// Parse a telemetry metadata block. Returns `None` when the block does
/// not start with the TLM magic (the section is not telemetry-shaped and
/// must be ignored, not rejected).
pub fn parse_telemetry_metadata(buf: &[u8]) -> Result<Option<Vec<VarDesc>>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != TLM_MAGIC {
        return Ok(None);
    }

    let mut reader = ByteReader::new(&buf[4..]);
    let count = reader.read_u32()?;
    if count > MAX_VAR_DESC_COUNT {
        return Err(FormatError::BadTelemetryMetadata("too many variables"));
    }

    let mut descs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        descs.push(read_var_desc(&mut reader)?);
    }
    Ok(Some(descs))
}

fn read_var_desc(reader: &mut ByteReader<'_>) -> Result<VarDesc> {
    let start = reader.pos();
    let reclen = reader.read_u32()? as usize;
    let namelen = reader.read_u32()? as usize;
    let ty = reader.read_u32()?;
    let size = reader.read_u32()?;
    let count = reader.read_u32()?;
    let _flags = reader.read_u32()?;

    if reclen < VAR_DESC_RECORD_SIZE + namelen + 1 {
        return Err(FormatError::BadTelemetryMetadata("record too small"));
    }
    let tail = reader.read_bytes(reclen - VAR_DESC_RECORD_SIZE)?;
    if tail[namelen] != 0 {
        return Err(FormatError::UnterminatedString);
    }
    let name = String::from_utf8_lossy(&tail[..namelen]).into_owned();

    debug_assert_eq!(reader.pos(), start + reclen);
    Ok(VarDesc {
        name,
        ty,
        size,
        count,
    })
}

/// Encode a telemetry metadata block (magic + count + records) the way
/// telemetry producers publish their section layout.
pub fn write_telemetry_metadata(descs: &[VarDesc]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&TLM_MAGIC.to_le_bytes());
    out.extend_from_slice(&(descs.len() as u32).to_le_bytes());
    for desc in descs {
        let namelen = desc.name.len();
        let reclen = (VAR_DESC_RECORD_SIZE + namelen + 1) as u32;
        out.extend_from_slice(&reclen.to_le_bytes());
        out.extend_from_slice(&(namelen as u32).to_le_bytes());
        out.extend_from_slice(&desc.ty.to_le_bytes());
        out.extend_from_slice(&desc.size.to_le_bytes());
        out.extend_from_slice(&desc.count.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(desc.name.as_bytes());
        out.push(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_header_roundtrip() {
        let hdr = EntryHeader::new(257, 42);
        let bytes = hdr.to_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_entry_header().unwrap(), hdr);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = [0u8; 64];
        let mut data = LogData::new(&mut buf);
        assert!(data.push_str("altitude"));
        let used = data.used();

        let mut reader = ByteReader::new(&buf[..used]);
        assert_eq!(reader.read_string().unwrap(), "altitude");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reserved_string_decodes_to_value() {
        let mut buf = [0u8; 64];
        let mut data = LogData::new(&mut buf);
        assert!(data.push_str_reserved("short", 20));
        assert_eq!(data.used(), string_wire_size(20));

        let used = data.used();
        let mut reader = ByteReader::new(&buf[..used]);
        assert_eq!(reader.read_string().unwrap(), "short");
    }

    #[test]
    fn test_string_rejects_missing_nul() {
        // length 4, last byte not NUL
        let raw = [4u8, 0, b'a', b'b', b'c', b'd'];
        let mut reader = ByteReader::new(&raw);
        assert!(matches!(
            reader.read_string(),
            Err(FormatError::UnterminatedString)
        ));
    }

    #[test]
    fn test_string_rejects_empty() {
        let raw = [0u8, 0];
        let mut reader = ByteReader::new(&raw);
        assert!(matches!(reader.read_string(), Err(FormatError::EmptyString)));
    }

    #[test]
    fn test_source_desc_roundtrip() {
        let desc = SourceDesc::new(256, "telemetry", "alt", 1);
        let bytes = desc.to_entry_bytes();

        let mut reader = ByteReader::new(&bytes);
        let hdr = reader.read_entry_header().unwrap();
        assert_eq!(hdr.id, ID_SOURCE_DESC);
        assert_eq!(hdr.len as usize, bytes.len() - ENTRY_HEADER_SIZE);
        let decoded = SourceDesc::decode(&mut reader).unwrap();
        assert_eq!(decoded, desc);
        assert_eq!(decoded.full_name(), "telemetry-alt");
    }

    #[test]
    fn test_telemetry_metadata_roundtrip() {
        let descs = vec![
            VarDesc::new("altitude", TlmType::F64, 8, 1),
            VarDesc::new("cell_voltage", TlmType::U16, 2, 3),
        ];
        let bytes = write_telemetry_metadata(&descs);
        let parsed = parse_telemetry_metadata(&bytes).unwrap().unwrap();
        assert_eq!(parsed, descs);
        assert!(parsed[1].is_array());
    }

    #[test]
    fn test_telemetry_metadata_wrong_magic() {
        let bytes = [0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0];
        assert!(parse_telemetry_metadata(&bytes).unwrap().is_none());
    }
}
