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

// File reader tests over hand-assembled container bytes.

use std::path::PathBuf;

use flightlog::format::{EntryHeader, LogData, SourceDesc, FILE_MAGIC, FILE_VERSION};
use flightlog::reader::{EventParam, FileReader};

fn entry(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&EntryHeader::new(id, payload.len() as u32).to_bytes());
    out.extend_from_slice(payload);
    out
}

fn file_with(version: u32, chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&FILE_MAGIC.to_le_bytes());
    out.extend_from_slice(&version.to_le_bytes());
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

fn write_file(dir: &tempfile::TempDir, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join("log.bin");
    std::fs::write(&path, bytes).unwrap();
    path
}

fn kv_payload(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = vec![0u8; 1024];
    let mut data = LogData::new(&mut buf);
    for (key, value) in pairs {
        assert!(data.push_str(key));
        assert!(data.push_str(value));
    }
    let used = data.used();
    buf.truncate(used);
    buf
}

fn header_chunks() -> Vec<Vec<u8>> {
    vec![
        SourceDesc::new(256, "internal", "header", FILE_VERSION).to_entry_bytes(),
        entry(
            256,
            &kv_payload(&[("index", "0"), ("takeoff", "1"), ("date", "20240102T030405+0000")]),
        ),
    ]
}

fn ulog_record(ts_us: u64, message: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"gcsproxy\0");
    payload.extend_from_slice(&0x05u32.to_le_bytes());
    payload.extend_from_slice(b"CONTROLLER\0");
    payload.extend_from_slice(message.as_bytes());
    payload.push(0);

    let mut out = Vec::new();
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&9u32.to_le_bytes()); // pid
    out.extend_from_slice(&9u32.to_le_bytes()); // tid
    out.extend_from_slice(&((ts_us / 1_000_000) as u32).to_le_bytes());
    out.extend_from_slice(&(((ts_us % 1_000_000) * 1000) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // euid
    out.extend_from_slice(&payload);
    out
}

#[test]
fn test_event_decoding_from_ulog_payload() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut chunks = header_chunks();
    chunks.push(SourceDesc::new(300, "ulog", "main", 1).to_entry_bytes());
    chunks.push(entry(300, &ulog_record(1234, "EVTS:CONTROLLER;name='Foo'")));
    let path = write_file(&dir, &file_with(FILE_VERSION, &chunks));

    let mut reader = FileReader::new(path);
    reader.load_contents().unwrap();

    let events = reader
        .get("ulog-main")
        .and_then(|ds| ds.as_event())
        .unwrap();
    assert_eq!(events.events().len(), 1);
    let event = &events.events()[0];
    assert_eq!(event.timestamp, 1234);
    assert_eq!(event.name, "CONTROLLER");
    assert_eq!(
        event.params,
        vec![EventParam {
            name: "name".to_string(),
            value: "Foo".to_string()
        }]
    );
}

#[test]
fn test_header_only_stops_early() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut chunks = header_chunks();
    chunks.push(SourceDesc::new(300, "ulog", "main", 1).to_entry_bytes());
    chunks.push(entry(300, &ulog_record(1, "EVT:AUTOPILOT;flying_state=landed")));
    let path = write_file(&dir, &file_with(FILE_VERSION, &chunks));

    let mut reader = FileReader::new(path);
    reader.load_info().unwrap();

    let header = reader.header().unwrap();
    assert_eq!(header.get("takeoff"), Some("1"));
    // Decoding stopped at the header, the ulog entries were not read
    assert!(reader.get("ulog-main").map(|ds| ds.as_event().unwrap().events().is_empty()).unwrap_or(true));
}

#[test]
fn test_bad_magic_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut bytes = file_with(FILE_VERSION, &header_chunks());
    bytes[0] ^= 0xff;
    let path = write_file(&dir, &bytes);

    let mut reader = FileReader::new(path);
    assert!(reader.load_contents().is_err());
}

#[test]
fn test_newer_version_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_file(&dir, &file_with(FILE_VERSION + 1, &header_chunks()));

    let mut reader = FileReader::new(path);
    assert!(reader.load_contents().is_err());
}

#[test]
fn test_unknown_source_id_dropped() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut chunks = header_chunks();
    // Entry for an id that was never described
    chunks.push(entry(999, b"orphan bytes"));
    chunks.push(SourceDesc::new(300, "ulog", "main", 1).to_entry_bytes());
    chunks.push(entry(300, &ulog_record(5, "EVT:GPS;event=fixed")));
    let path = write_file(&dir, &file_with(FILE_VERSION, &chunks));

    let mut reader = FileReader::new(path);
    reader.load_contents().unwrap();

    // Later entries still decode
    let events = reader
        .get("ulog-main")
        .and_then(|ds| ds.as_event())
        .unwrap();
    assert_eq!(events.events().len(), 1);
}

#[test]
fn test_unknown_plugin_is_opaque() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut chunks = header_chunks();
    chunks.push(SourceDesc::new(300, "properties", "sys", 1).to_entry_bytes());
    chunks.push(entry(300, b"whatever format this plugin uses"));
    let path = write_file(&dir, &file_with(FILE_VERSION, &chunks));

    let mut reader = FileReader::new(path);
    reader.load_contents().unwrap();
    assert!(reader.get("properties-sys").is_none());
    assert!(reader.header().is_some());
}

#[test]
fn test_truncated_trailing_entry_tolerated() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut bytes = file_with(FILE_VERSION, &header_chunks());
    // Promise 64 payload bytes, deliver 3
    bytes.extend_from_slice(&EntryHeader::new(256, 64).to_bytes());
    bytes.extend_from_slice(&[1, 2, 3]);
    let path = write_file(&dir, &bytes);

    let mut reader = FileReader::new(path);
    reader.load_contents().unwrap();
    assert_eq!(reader.header().unwrap().get("date"), Some("20240102T030405+0000"));
}

#[test]
fn test_settings_entries_become_changed_events() {
    let dir = tempfile::TempDir::new().unwrap();

    // One BOOL setting: ts, name, type, value
    let mut buf = vec![0u8; 256];
    let mut data = LogData::new(&mut buf);
    assert!(data.push_u32(1)); // sec
    assert!(data.push_u32(500_000)); // nsec
    assert!(data.push_str("video.stabilization"));
    assert!(data.push_u8(0)); // boolean
    assert!(data.push_u8(1)); // true
    let used = data.used();
    buf.truncate(used);

    let mut chunks = header_chunks();
    chunks.push(SourceDesc::new(300, "settings", "settings", 1).to_entry_bytes());
    chunks.push(entry(300, &buf));
    let path = write_file(&dir, &file_with(FILE_VERSION, &chunks));

    let mut reader = FileReader::new(path);
    reader.load_contents().unwrap();

    let events = reader
        .get("settings-settings")
        .and_then(|ds| ds.as_event())
        .unwrap();
    assert_eq!(events.events().len(), 1);
    let event = &events.events()[0];
    assert_eq!(event.name, "CHANGED");
    assert_eq!(event.timestamp, 1_000_500);
    assert_eq!(event.param("name"), Some("video.stabilization"));
    assert_eq!(event.param("type"), Some("BOOL"));
    assert_eq!(event.param("value"), Some("true"));
}

#[test]
fn test_duplicate_full_names_get_suffixes() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut chunks = header_chunks();
    chunks.push(SourceDesc::new(300, "ulog", "main", 1).to_entry_bytes());
    chunks.push(SourceDesc::new(301, "ulog", "main", 2).to_entry_bytes());
    let path = write_file(&dir, &file_with(FILE_VERSION, &chunks));

    let mut reader = FileReader::new(path);
    reader.load_contents().unwrap();
    assert!(reader.get("ulog-main").is_some());
    assert!(reader.get("ulog-main-1").is_some());
}
