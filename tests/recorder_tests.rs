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

// End-to-end recorder tests: telemetry round-trips, mid-file
// re-description, direct writers and multi-source merging.

use std::collections::VecDeque;

use flightlog::format::{
    write_telemetry_metadata, LogData, TlmType, VarDesc, TLM_TAG_HEADER, TLM_TAG_SAMPLE,
};
use flightlog::reader::{FileReader, TlmView};
use flightlog::recorder::{LogManager, Recorder, RecorderOptions};
use flightlog::source::LogSource;

/// Source producing one prebuilt entry per poll.
struct ScriptedSource {
    chunks: VecDeque<Vec<u8>>,
    period_ms: u32,
}

impl ScriptedSource {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            period_ms: 100,
        }
    }
}

impl LogSource for ScriptedSource {
    fn read_data(&mut self, data: &mut LogData<'_>) -> usize {
        match self.chunks.pop_front() {
            Some(chunk) => {
                assert!(data.push_bytes(&chunk));
                chunk.len()
            }
            None => 0,
        }
    }

    fn period_ms(&self) -> u32 {
        self.period_ms
    }
}

fn tlm_header_chunk(descs: &[VarDesc], sample_size: u32, rate: u32) -> Vec<u8> {
    let meta = write_telemetry_metadata(descs);
    let mut out = vec![TLM_TAG_HEADER];
    out.extend_from_slice(&100u32.to_le_bytes()); // sample count hint
    out.extend_from_slice(&sample_size.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    out.extend_from_slice(&meta);
    out
}

fn tlm_sample_chunk(ts_us: u64, seqnum: u32, values: &[f64]) -> Vec<u8> {
    let mut out = vec![TLM_TAG_SAMPLE];
    out.extend_from_slice(&((ts_us / 1_000_000) as u32).to_le_bytes());
    out.extend_from_slice(&(((ts_us % 1_000_000) * 1000) as u32).to_le_bytes());
    out.extend_from_slice(&seqnum.to_le_bytes());
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn ulog_record(ts_us: u64, message: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"flightd\0");
    payload.extend_from_slice(&0x06u32.to_le_bytes());
    payload.extend_from_slice(b"EVENT\0");
    payload.extend_from_slice(message.as_bytes());
    payload.push(0);

    let mut out = Vec::new();
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&42u32.to_le_bytes()); // pid
    out.extend_from_slice(&42u32.to_le_bytes()); // tid
    out.extend_from_slice(&((ts_us / 1_000_000) as u32).to_le_bytes());
    out.extend_from_slice(&(((ts_us % 1_000_000) * 1000) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // euid
    out.extend_from_slice(&payload);
    out
}

#[test]
fn test_single_telemetry_roundtrip() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut recorder = Recorder::new(RecorderOptions::new(dir.path()));

    let descs = vec![VarDesc::new("altitude", TlmType::F64, 8, 1)];
    let source = ScriptedSource::new(vec![
        tlm_header_chunk(&descs, 8, 10),
        tlm_sample_chunk(100, 0, &[1.0]),
        tlm_sample_chunk(200, 1, &[2.0]),
        tlm_sample_chunk(300, 2, &[3.0]),
    ]);
    recorder.add_log_source(Box::new(source), "telemetry", "alt", 1);

    recorder.start();
    for _ in 0..3 {
        recorder.poll_sources(true);
    }
    recorder.stop();

    let mut reader = FileReader::new(dir.path().join("log.bin"));
    reader.load_contents().unwrap();

    let tlm = reader
        .get("telemetry-alt")
        .and_then(|ds| ds.as_telemetry())
        .expect("telemetry source missing");
    assert_eq!(tlm.sample_count(), 3);
    assert_eq!(tlm.sample_rate(), 10);

    let altitude = tlm.data_set("altitude").unwrap();
    let expected = [(100i64, 1.0f64), (200, 2.0), (300, 3.0)];
    for (i, (ts, value)) in expected.iter().enumerate() {
        let sample = altitude.sample(i, 0);
        assert_eq!(sample.timestamp, *ts);
        assert_eq!(sample.value, *value);
    }

    let footer = reader
        .get("internal-footer")
        .and_then(|ds| ds.as_internal())
        .unwrap();
    assert_eq!(footer.get("reason"), Some("EXITING"));
}

#[test]
fn test_telemetry_redescription_creates_second_source() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut recorder = Recorder::new(RecorderOptions::new(dir.path()));

    let first = vec![VarDesc::new("x", TlmType::F64, 8, 1)];
    let second = vec![
        VarDesc::new("x", TlmType::F64, 8, 1),
        VarDesc::new("y", TlmType::F64, 8, 1),
    ];
    let source = ScriptedSource::new(vec![
        tlm_header_chunk(&first, 8, 5),
        tlm_sample_chunk(10, 0, &[1.0]),
        tlm_sample_chunk(20, 1, &[2.0]),
        tlm_sample_chunk(30, 2, &[3.0]),
        tlm_header_chunk(&second, 16, 5),
        tlm_sample_chunk(40, 3, &[4.0, 40.0]),
        tlm_sample_chunk(50, 4, &[5.0, 50.0]),
    ]);
    recorder.add_log_source(Box::new(source), "telemetry", "nav", 1);

    recorder.start();
    recorder.poll_sources(true);
    recorder.stop();

    let mut reader = FileReader::new(dir.path().join("log.bin"));
    reader.load_contents().unwrap();

    let old = reader
        .get("telemetry-nav")
        .and_then(|ds| ds.as_telemetry())
        .expect("original layout missing");
    assert_eq!(old.sample_count(), 3);
    assert!(old.data_set("x").is_some());
    assert!(old.data_set("y").is_none());

    let new = reader
        .get("telemetry-nav-1")
        .and_then(|ds| ds.as_telemetry())
        .expect("re-described layout missing");
    assert_eq!(new.sample_count(), 2);
    assert_eq!(new.data_set("y").unwrap().sample(1, 0).value, 50.0);
    assert_eq!(new.data_set("y").unwrap().sample(1, 0).timestamp, 50);
}

#[test]
fn test_direct_writer_coexists_with_compressed_stream() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut recorder = Recorder::new(RecorderOptions::new(dir.path()));

    let descs = vec![VarDesc::new("altitude", TlmType::F64, 8, 1)];
    let source = ScriptedSource::new(vec![
        tlm_header_chunk(&descs, 8, 10),
        tlm_sample_chunk(100, 0, &[12.5]),
    ]);
    recorder.add_log_source(Box::new(source), "telemetry", "alt", 1);

    recorder.start();
    let writer = recorder.direct_writer("ulog", 1);
    recorder.direct_write(
        writer,
        &ulog_record(1000, "EVT:AUTOPILOT;flying_state=takeoff"),
    );
    recorder.direct_write(
        writer,
        &ulog_record(2000, "plain log line, not an event"),
    );
    recorder.poll_sources(true);
    recorder.stop();

    let mut reader = FileReader::new(dir.path().join("log.bin"));
    reader.load_contents().unwrap();

    // Uncompressed ulog stream: one parsed event, two raw records
    let events = reader
        .get("ulog-flightlogd")
        .and_then(|ds| ds.as_event())
        .expect("ulog event source missing");
    assert_eq!(events.events().len(), 1);
    assert_eq!(events.events()[0].name, "AUTOPILOT");
    assert_eq!(events.events()[0].timestamp, 1000);

    let raw = reader.data_sources().iter().find_map(|ds| match ds {
        flightlog::reader::DataSource::Ulog(logs) => Some(logs),
        _ => None,
    });
    assert_eq!(raw.unwrap().entry_count(), 2);

    // The compressed telemetry stream decodes from the same file
    let tlm = reader
        .get("telemetry-alt")
        .and_then(|ds| ds.as_telemetry())
        .unwrap();
    assert_eq!(tlm.sample_count(), 1);
}

#[test]
fn test_multi_telemetry_merge_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut recorder = Recorder::new(RecorderOptions::new(dir.path()));

    let alt = vec![VarDesc::new("alt", TlmType::F64, 8, 1)];
    let fast = ScriptedSource::new(vec![
        tlm_header_chunk(&alt, 8, 10),
        tlm_sample_chunk(100, 0, &[1.0]),
        tlm_sample_chunk(200, 1, &[2.0]),
        tlm_sample_chunk(300, 2, &[3.0]),
    ]);
    let vbat = vec![VarDesc::new("vbat", TlmType::F64, 8, 1)];
    let slow = ScriptedSource::new(vec![
        tlm_header_chunk(&vbat, 8, 1),
        tlm_sample_chunk(90, 0, &[11.5]),
        tlm_sample_chunk(290, 1, &[11.1]),
    ]);
    recorder.add_log_source(Box::new(fast), "telemetry", "fast", 1);
    recorder.add_log_source(Box::new(slow), "telemetry", "slow", 1);

    recorder.start();
    recorder.poll_sources(true);
    recorder.stop();

    let mut reader = FileReader::new(dir.path().join("log.bin"));
    reader.load_contents().unwrap();

    let views: Vec<TlmView> = reader
        .data_sources()
        .iter()
        .filter_map(|ds| ds.as_telemetry())
        .map(|tlm| TlmView::from_source(tlm, &["alt", "vbat"]))
        .collect();
    assert_eq!(views.len(), 2);

    let merged = TlmView::merge(&views);
    assert_eq!(merged.sample_count(), 3);
    assert_eq!(merged.data()[&100], vec![1.0, 11.5]);
    assert_eq!(merged.data()[&200], vec![2.0, 11.1]);
    assert_eq!(merged.data()[&300], vec![3.0, 11.1]);
}

#[test]
fn test_disabled_recorder_writes_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut recorder = Recorder::new(RecorderOptions::new(dir.path()));

    recorder.set_enabled(false);
    recorder.poll_sources(true);
    assert!(!recorder.is_opened());
    assert!(!dir.path().join("log.bin").exists());

    recorder.set_enabled(true);
    assert!(recorder.is_opened());
    recorder.stop();
    assert!(dir.path().join("log.bin").exists());
}

#[test]
fn test_rotate_reopens_with_fresh_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut recorder = Recorder::new(RecorderOptions::new(dir.path()));

    recorder.start();
    recorder.rotate();
    assert!(recorder.is_opened());
    recorder.stop();

    // One rotated file with reason ROTATE, one current with EXITING
    let mut rotated = FileReader::new(dir.path().join("log-1.bin"));
    rotated.load_contents().unwrap();
    assert_eq!(
        rotated
            .get("internal-footer")
            .and_then(|ds| ds.as_internal())
            .unwrap()
            .get("reason"),
        Some("ROTATE")
    );
}
