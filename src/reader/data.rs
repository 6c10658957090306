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

// In-memory representations of decoded log data.

use tracing::warn;

use crate::format::TlmType;

/// A decoded data set, one per source occurrence in the file.
pub enum DataSource {
    Internal(InternalDataSource),
    Event(EventDataSource),
    Telemetry(TelemetryDataSource),
    Ulog(LogDataSource),
}

impl DataSource {
    pub fn name(&self) -> &str {
        match self {
            DataSource::Internal(ds) => ds.name(),
            DataSource::Event(ds) => ds.name(),
            DataSource::Telemetry(ds) => ds.name(),
            DataSource::Ulog(ds) => ds.name(),
        }
    }

    pub fn as_internal(&self) -> Option<&InternalDataSource> {
        match self {
            DataSource::Internal(ds) => Some(ds),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventDataSource> {
        match self {
            DataSource::Event(ds) => Some(ds),
            _ => None,
        }
    }

    pub fn as_telemetry(&self) -> Option<&TelemetryDataSource> {
        match self {
            DataSource::Telemetry(ds) => Some(ds),
            _ => None,
        }
    }

    pub(crate) fn as_internal_mut(&mut self) -> Option<&mut InternalDataSource> {
        match self {
            DataSource::Internal(ds) => Some(ds),
            _ => None,
        }
    }

    pub(crate) fn as_event_mut(&mut self) -> Option<&mut EventDataSource> {
        match self {
            DataSource::Event(ds) => Some(ds),
            _ => None,
        }
    }
}

/// Insertion-ordered key/value mapping, used for the file header and
/// footer records. Duplicated keys keep their first position, the last
/// written value wins.
pub struct InternalDataSource {
    name: String,
    fields: Vec<(String, String)>,
}

impl InternalDataSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_field(&mut self, key: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.fields.push((key.to_string(), value.to_string())),
        }
    }

    pub fn contains_field(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value for `key`, empty string when absent.
    pub fn value(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParam {
    pub name: String,
    pub value: String,
}

/// One timestamped event with ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Event {
    pub timestamp: i64,
    pub name: String,
    pub params: Vec<EventParam>,
}

impl Event {
    pub fn new(timestamp: i64, name: &str, params: Vec<EventParam>) -> Self {
        Self {
            timestamp,
            name: name.to_string(),
            params,
        }
    }

    /// Parse the textual event grammar embedded in log messages:
    /// `EVT:NAME(;KEY=VALUE)*` or `EVTS:NAME(;KEY=VALUE)*`, where VALUE
    /// may be single-quoted and the quotes are stripped.
    pub fn from_text(text: &str, timestamp: i64) -> Option<Self> {
        let msg = text
            .strip_prefix("EVTS:")
            .or_else(|| text.strip_prefix("EVT:"))?;

        let mut fields = msg.split(';');
        let name = fields.next()?;

        let mut params = Vec::new();
        for field in fields {
            let (key, value) = field.split_once('=')?;
            let value = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .unwrap_or(value);
            params.push(EventParam {
                name: key.to_string(),
                value: value.to_string(),
            });
        }

        Some(Event::new(timestamp, name, params))
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// Ordered sequence of events decoded from one source.
pub struct EventDataSource {
    name: String,
    events: Vec<Event>,
}

impl EventDataSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

/// Description of one telemetry data set (column group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSetDesc {
    pub name: String,
    pub item_count: usize,
}

impl DataSetDesc {
    pub fn new(name: &str, item_count: usize) -> Self {
        Self {
            name: name.to_string(),
            item_count,
        }
    }

    pub fn is_array(&self) -> bool {
        self.item_count > 1
    }
}

/// Timestamped value of one item of one data set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataSample {
    pub timestamp: i64,
    pub value: f64,
}

struct DataSet {
    desc: DataSetDesc,
    /// Offset of the first item within a sample row, in values.
    offset: usize,
}

/// Telemetry samples of one section layout: the declared data sets plus
/// two synthetic leading columns (`time_us`, `seqnum`), a contiguous
/// row-major backing store, and the sorted timestamp index.
pub struct TelemetryDataSource {
    name: String,
    sets: Vec<DataSet>,
    row_len: usize,
    sample_rate: u32,
    timestamps: Vec<i64>,
    values: Vec<f64>,
}

impl TelemetryDataSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sets: Vec::new(),
            row_len: 0,
            sample_rate: 0,
            timestamps: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Install the section layout. Must happen before any sample; the
    /// synthetic `time_us` and `seqnum` sets are added in front.
    pub fn set_descs(&mut self, descs: &[DataSetDesc]) {
        assert!(self.sets.is_empty());
        assert!(self.timestamps.is_empty());

        let mut offset = 0usize;
        let mut add = |sets: &mut Vec<DataSet>, desc: DataSetDesc| {
            if sets.iter().any(|s| s.desc.name == desc.name) {
                warn!(
                    "Ignoring duplicate data set '{}' in '{}'",
                    desc.name, self.name
                );
            } else {
                sets.push(DataSet {
                    offset,
                    desc: desc.clone(),
                });
            }
            // Row width always advances, duplicates included
            offset += desc.item_count;
        };

        add(&mut self.sets, DataSetDesc::new("time_us", 1));
        add(&mut self.sets, DataSetDesc::new("seqnum", 1));
        for desc in descs {
            add(&mut self.sets, desc.clone());
        }
        self.row_len = offset;
    }

    /// Append one sample row. Samples older than the last stored one
    /// are discarded.
    pub fn add_sample(&mut self, timestamp: i64, seqnum: u32, values: &[f64]) {
        if let Some(&last) = self.timestamps.last() {
            if timestamp < last {
                warn!(
                    "Unordered timestamp for '{}': {} < {}",
                    self.name, timestamp, last
                );
                return;
            }
        }

        if values.len() + 2 != self.row_len {
            warn!(
                "Unable to write sample for '{}': {} values, layout has {}",
                self.name,
                values.len(),
                self.row_len - 2
            );
            return;
        }

        self.values.push(timestamp as f64);
        self.values.push(seqnum as f64);
        self.values.extend_from_slice(values);
        self.timestamps.push(timestamp);
    }

    pub fn sample_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn descs(&self) -> impl Iterator<Item = &DataSetDesc> {
        self.sets.iter().map(|s| &s.desc)
    }

    pub fn data_set(&self, name: &str) -> Option<DataSetView<'_>> {
        let idx = self.sets.iter().position(|s| s.desc.name == name)?;
        Some(DataSetView {
            source: self,
            set: idx,
        })
    }
}

/// Random access view over one data set of a telemetry source.
#[derive(Clone, Copy)]
pub struct DataSetView<'a> {
    source: &'a TelemetryDataSource,
    set: usize,
}

impl<'a> DataSetView<'a> {
    pub fn desc(&self) -> &'a DataSetDesc {
        &self.source.sets[self.set].desc
    }

    pub fn sample_count(&self) -> usize {
        self.source.sample_count()
    }

    /// Value of item `item_idx` in sample `sample_idx`. An out-of-range
    /// item yields the sample timestamp with value 0.0.
    pub fn sample(&self, sample_idx: usize, item_idx: usize) -> DataSample {
        let timestamp = self.source.timestamps[sample_idx];
        let set = &self.source.sets[self.set];

        if item_idx >= set.desc.item_count {
            return DataSample {
                timestamp,
                value: 0.0,
            };
        }

        let off = sample_idx * self.source.row_len + set.offset + item_idx;
        DataSample {
            timestamp,
            value: self.source.values[off],
        }
    }
}

/// Raw system log records, kept in wire format.
pub struct LogDataSource {
    name: String,
    entries: Vec<Vec<u8>>,
}

impl LogDataSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_entry(&mut self, entry: Vec<u8>) {
        self.entries.push(entry);
    }

    pub fn entry(&self, idx: usize) -> &[u8] {
        &self.entries[idx]
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Size of the fixed system log record header.
pub const ULOG_HEADER_LEN: usize = 24;

/// One parsed system log record.
/// Format: payload_len:u16, hdr_len:u16 (= 24), pid:u32, tid:u32,
/// sec:u32, nsec:u32, euid:u32, then the payload
/// `<pname>\0[<tname>\0]<priority:u32><tag>\0<message>` where the
/// thread name is present only when pid != tid.
#[derive(Debug, Clone, Default)]
pub struct UlogRecord {
    pub timestamp: i64,
    pub level: u8,
    pub binary: bool,
    pub tag: String,
    /// Text message; `None` for binary or unformatted records.
    pub message: Option<String>,
}

pub fn parse_ulog_record(buf: &[u8]) -> Option<UlogRecord> {
    if buf.len() < ULOG_HEADER_LEN {
        return None;
    }
    let payload_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let hdr_len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    if hdr_len != ULOG_HEADER_LEN || buf.len() < hdr_len + payload_len {
        return None;
    }

    let pid = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let tid = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let sec = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]) as i64;
    let nsec = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]) as i64;
    let timestamp = sec * 1_000_000 + nsec / 1000;

    fn read_cstr(payload: &[u8], pos: &mut usize) -> Option<(usize, usize)> {
        let start = *pos;
        let nul = payload[*pos..].iter().position(|&b| b == 0)?;
        *pos += nul + 1;
        Some((start, start + nul))
    }

    let payload = &buf[hdr_len..hdr_len + payload_len];
    let mut pos = 0usize;

    // Process name, and thread name when the record came from a thread
    read_cstr(payload, &mut pos)?;
    if pid != tid {
        read_cstr(payload, &mut pos)?;
    }

    if payload.len() - pos < 4 {
        // Unformatted record
        return Some(UlogRecord {
            timestamp,
            ..Default::default()
        });
    }
    let priority = u32::from_le_bytes([
        payload[pos],
        payload[pos + 1],
        payload[pos + 2],
        payload[pos + 3],
    ]);
    pos += 4;

    let Some((tag_start, tag_end)) = read_cstr(payload, &mut pos) else {
        return Some(UlogRecord {
            timestamp,
            ..Default::default()
        });
    };
    let tag = String::from_utf8_lossy(&payload[tag_start..tag_end]).into_owned();

    let level = (priority & 0x7) as u8;
    let binary = (priority & 0x80) != 0;
    let message = if binary {
        None
    } else {
        let mut msg = &payload[pos..];
        while let [head @ .., b'\0' | b'\n'] = msg {
            msg = head;
        }
        Some(String::from_utf8_lossy(msg).into_owned())
    };

    Some(UlogRecord {
        timestamp,
        level,
        binary,
        tag,
        message,
    })
}

/// Convert one raw telemetry element to f64 according to its declared
/// type and size. Unknown combinations decode as 0.0.
pub fn element_to_f64(buf: &[u8], ty: u32) -> f64 {
    let Some(ty) = TlmType::from_u32(ty) else {
        return 0.0;
    };
    match (ty, buf.len()) {
        (TlmType::Bool, 1) | (TlmType::U8, 1) => buf[0] as f64,
        (TlmType::I8, 1) => buf[0] as i8 as f64,
        (TlmType::U16, 2) => u16::from_le_bytes([buf[0], buf[1]]) as f64,
        (TlmType::I16, 2) => i16::from_le_bytes([buf[0], buf[1]]) as f64,
        (TlmType::U32, 4) => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
        (TlmType::I32, 4) => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
        (TlmType::U64, 8) | (TlmType::I64, 8) | (TlmType::F64, 8) => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(buf);
            match ty {
                TlmType::U64 => u64::from_le_bytes(arr) as f64,
                TlmType::I64 => i64::from_le_bytes(arr) as f64,
                _ => f64::from_le_bytes(arr),
            }
        }
        (TlmType::F32, 4) => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_from_text() {
        let event = Event::from_text("EVT:AUTOPILOT;flying_state=takeoff", 42).unwrap();
        assert_eq!(event.name, "AUTOPILOT");
        assert_eq!(event.timestamp, 42);
        assert_eq!(event.param("flying_state"), Some("takeoff"));
    }

    #[test]
    fn test_event_from_text_strips_quotes() {
        let event = Event::from_text("EVTS:CONTROLLER;name='Foo'", 1234).unwrap();
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
    fn test_event_from_text_rejects_non_event() {
        assert!(Event::from_text("starting up", 0).is_none());
        assert!(Event::from_text("EVT:NAME;broken", 0).is_none());
    }

    #[test]
    fn test_internal_last_write_wins() {
        let mut ds = InternalDataSource::new("internal-header");
        ds.add_field("date", "19700101T000000+0000");
        ds.add_field("date", "20240102T030405+0000");
        assert_eq!(ds.get("date"), Some("20240102T030405+0000"));
        assert_eq!(ds.fields().len(), 1);
    }

    #[test]
    fn test_telemetry_sample_access() {
        let mut ds = TelemetryDataSource::new("telemetry-nav");
        ds.set_descs(&[
            DataSetDesc::new("alt", 1),
            DataSetDesc::new("speed", 2),
        ]);
        ds.add_sample(100, 0, &[1.0, 2.0, 3.0]);
        ds.add_sample(200, 1, &[4.0, 5.0, 6.0]);

        let alt = ds.data_set("alt").unwrap();
        assert_eq!(alt.sample(1, 0), DataSample { timestamp: 200, value: 4.0 });

        let speed = ds.data_set("speed").unwrap();
        assert_eq!(speed.sample(0, 1).value, 3.0);

        let time = ds.data_set("time_us").unwrap();
        assert_eq!(time.sample(1, 0).value, 200.0);

        // Out-of-range item decodes as timestamp + 0.0
        assert_eq!(speed.sample(0, 5), DataSample { timestamp: 100, value: 0.0 });
    }

    #[test]
    fn test_telemetry_rejects_unordered_sample() {
        let mut ds = TelemetryDataSource::new("telemetry-nav");
        ds.set_descs(&[DataSetDesc::new("alt", 1)]);
        ds.add_sample(200, 0, &[1.0]);
        ds.add_sample(100, 1, &[2.0]);
        ds.add_sample(200, 2, &[3.0]);
        assert_eq!(ds.sample_count(), 2);
        assert_eq!(ds.timestamps(), &[200, 200]);
    }

    #[test]
    fn test_parse_ulog_record() {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"flightd\0");
        payload.extend_from_slice(&0x06u32.to_le_bytes()); // level 6, not binary
        payload.extend_from_slice(b"AUTOPILOT\0");
        payload.extend_from_slice(b"EVT:AUTOPILOT;flying_state=landed\n");

        let mut buf = Vec::new();
        buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(ULOG_HEADER_LEN as u16).to_le_bytes());
        buf.extend_from_slice(&7u32.to_le_bytes()); // pid
        buf.extend_from_slice(&7u32.to_le_bytes()); // tid == pid, no tname
        buf.extend_from_slice(&12u32.to_le_bytes()); // sec
        buf.extend_from_slice(&500_000u32.to_le_bytes()); // nsec
        buf.extend_from_slice(&0u32.to_le_bytes()); // euid
        buf.extend_from_slice(&payload);

        let record = parse_ulog_record(&buf).unwrap();
        assert_eq!(record.timestamp, 12_000_500);
        assert_eq!(record.level, 6);
        assert_eq!(record.tag, "AUTOPILOT");
        assert_eq!(
            record.message.as_deref(),
            Some("EVT:AUTOPILOT;flying_state=landed")
        );
    }

    #[test]
    fn test_element_to_f64() {
        assert_eq!(element_to_f64(&1.5f64.to_le_bytes(), TlmType::F64 as u32), 1.5);
        assert_eq!(element_to_f64(&(-2i16).to_le_bytes(), TlmType::I16 as u32), -2.0);
        assert_eq!(element_to_f64(&[1], TlmType::Bool as u32), 1.0);
        assert_eq!(element_to_f64(&[0, 0], TlmType::F64 as u32), 0.0);
    }
}
