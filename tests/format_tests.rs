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

// Framing round-trip and failure-mode tests for the container codec.

use flightlog::format::{
    parse_telemetry_metadata, write_telemetry_metadata, ByteReader, EntryHeader, FormatError,
    LogData, SourceDesc, TlmType, VarDesc, ENTRY_HEADER_SIZE, ID_SOURCE_DESC, MAX_ALLOC_SIZE,
};

fn entry(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&EntryHeader::new(id, payload.len() as u32).to_bytes());
    out.extend_from_slice(payload);
    out
}

#[test]
fn test_entry_stream_roundtrip() {
    // Arbitrary sequence of (id, bytes) entries decodes identically
    let entries: Vec<(u32, Vec<u8>)> = vec![
        (256, b"first".to_vec()),
        (257, vec![0u8; 128]),
        (256, (0..255u8).collect()),
        (300, b"x".to_vec()),
    ];

    let mut stream = Vec::new();
    for (id, payload) in &entries {
        stream.extend_from_slice(&entry(*id, payload));
    }

    let mut reader = ByteReader::new(&stream);
    let mut decoded = Vec::new();
    while reader.remaining() >= ENTRY_HEADER_SIZE {
        let hdr = reader.read_entry_header().unwrap();
        let payload = reader.read_bytes(hdr.len as usize).unwrap();
        decoded.push((hdr.id, payload.to_vec()));
    }

    assert_eq!(decoded, entries);
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn test_truncated_trailing_entry() {
    let mut stream = entry(256, b"complete");
    // A header promising more bytes than present
    stream.extend_from_slice(&EntryHeader::new(256, 100).to_bytes());
    stream.extend_from_slice(b"short");

    let mut reader = ByteReader::new(&stream);
    let first = reader.read_entry_header().unwrap();
    reader.read_bytes(first.len as usize).unwrap();

    let second = reader.read_entry_header().unwrap();
    assert!(second.len as usize > reader.remaining());
    assert!(matches!(
        reader.read_bytes(second.len as usize),
        Err(FormatError::Truncated { .. })
    ));
}

#[test]
fn test_source_desc_rejects_unterminated_plugin() {
    let desc = SourceDesc::new(300, "telemetry", "nav", 1);
    let mut bytes = desc.to_entry_bytes();

    // Corrupt the NUL terminator of the plugin string:
    // header(8) + id(4) + version(4) + len(2) + "telemetry" (9) + NUL
    let nul_pos = 8 + 4 + 4 + 2 + 9;
    assert_eq!(bytes[nul_pos], 0);
    bytes[nul_pos] = b'!';

    let mut reader = ByteReader::new(&bytes);
    reader.read_entry_header().unwrap();
    assert!(matches!(
        SourceDesc::decode(&mut reader),
        Err(FormatError::UnterminatedString)
    ));
}

#[test]
fn test_source_desc_ids_reserved_below_256() {
    let desc = SourceDesc::new(256, "ulog", "main", 2);
    let bytes = desc.to_entry_bytes();
    let mut reader = ByteReader::new(&bytes);
    let hdr = reader.read_entry_header().unwrap();
    assert_eq!(hdr.id, ID_SOURCE_DESC);
    assert!(SourceDesc::decode(&mut reader).unwrap().source_id >= 256);
}

#[test]
fn test_logdata_refuses_overflow() {
    let mut buf = [0u8; 16];
    let mut data = LogData::new(&mut buf);
    assert!(data.push_u32(1));
    assert!(!data.push_bytes(&[0u8; 32]));
    // A failed push leaves the used count untouched
    assert_eq!(data.used(), 4);
    assert!(!data.skip(100));
}

#[test]
fn test_max_alloc_guard_value() {
    // The decoder treats anything above this as hostile
    assert_eq!(MAX_ALLOC_SIZE, 32 * 1024 * 1024);
}

#[test]
fn test_telemetry_metadata_array_fields() {
    let descs = vec![
        VarDesc::new("smartbattery.cell_voltage_now", TlmType::U16, 2, 3),
        VarDesc::new("user_telemetry.gps_latitude", TlmType::F64, 8, 1),
    ];
    let block = write_telemetry_metadata(&descs);
    let parsed = parse_telemetry_metadata(&block).unwrap().unwrap();

    assert_eq!(parsed.len(), 2);
    assert!(parsed[0].is_array());
    assert_eq!(parsed[0].count, 3);
    assert_eq!(parsed[1].ty, TlmType::F64 as u32);
}

#[test]
fn test_telemetry_metadata_rejects_cut_name() {
    let descs = vec![VarDesc::new("altitude", TlmType::F64, 8, 1)];
    let mut block = write_telemetry_metadata(&descs);
    // Overwrite the name's NUL terminator
    let last = block.len() - 1;
    block[last] = b'x';

    assert!(parse_telemetry_metadata(&block).is_err());
}

#[test]
fn test_strings_are_nul_terminated_on_wire() {
    let mut buf = [0u8; 64];
    let mut data = LogData::new(&mut buf);
    assert!(data.push_str("reason"));
    let used = data.used();

    // u16 length includes the NUL
    assert_eq!(used, 2 + "reason".len() + 1);
    assert_eq!(buf[0] as usize, "reason".len() + 1);
    assert_eq!(buf[used - 1], 0);
}
