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

// Streaming decoder for the container format: walks the entry stream,
// decompresses LZ4 blocks recursively, and dispatches payloads to
// per-plugin decoders that fill the typed data sources.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use super::data::{
    element_to_f64, parse_ulog_record, DataSetDesc, DataSource, Event, EventDataSource,
    EventParam, InternalDataSource, LogDataSource, TelemetryDataSource, ULOG_HEADER_LEN,
};
use crate::buffer::decompress_frame;
use crate::crypto::SealDesc;
use crate::format::{
    self, parse_telemetry_metadata, ByteReader, FormatError, SourceDesc, VarDesc,
    ENTRY_HEADER_SIZE, ID_AES, ID_AES_DESC, ID_LZ4, ID_SOURCE_DESC, MAX_ALLOC_SIZE,
    TLM_TAG_HEADER, TLM_TAG_SAMPLE,
};

enum Decoder {
    Internal { ds: usize, is_header: bool },
    Settings { ds: usize },
    Telemetry(TlmDecoder),
    Ulog(UlogDecoder),
    Opaque,
}

struct TlmDecoder {
    ds: usize,
    /// Base full name, reused when a re-description forces a fresh
    /// (suffixed) data source.
    full_name: String,
    sample_size: u32,
    sample_rate: u32,
    var_descs: Vec<VarDesc>,
    is_tlm: bool,
}

struct UlogDecoder {
    events: usize,
    logs: Option<usize>,
    full_name: String,
}

pub(super) struct FileDecoder<'a> {
    arena: &'a mut Vec<DataSource>,
    decoders: HashMap<u32, Decoder>,
    name_counts: HashMap<String, usize>,
    header_only: bool,
    header_found: bool,
    encrypted: bool,
    aes_warned: bool,
}

impl<'a> FileDecoder<'a> {
    pub(super) fn new(arena: &'a mut Vec<DataSource>, header_only: bool) -> Self {
        Self {
            arena,
            decoders: HashMap::new(),
            name_counts: HashMap::new(),
            header_only,
            header_found: false,
            encrypted: false,
            aes_warned: false,
        }
    }

    pub(super) fn header_found(&self) -> bool {
        self.header_found
    }

    pub(super) fn encrypted(&self) -> bool {
        self.encrypted
    }

    /// Decode one flat stream of entries. Errors are fatal for this
    /// stream only; the LZ4 recursion catches them per block.
    pub(super) fn read_entries(&mut self, reader: &mut ByteReader<'_>) -> format::Result<()> {
        while reader.remaining() >= ENTRY_HEADER_SIZE {
            if self.header_only && self.header_found {
                break;
            }

            let hdr = reader.read_entry_header()?;
            if hdr.len == 0 {
                warn!("Empty entry");
                break;
            }
            if hdr.len as usize > MAX_ALLOC_SIZE {
                error!("Entry too big: {}", hdr.len);
                return Err(FormatError::EntryTooBig(hdr.len));
            }
            if hdr.len as usize > reader.remaining() {
                if !self.header_only {
                    warn!("Truncated entry");
                }
                break;
            }
            let payload = reader.read_bytes(hdr.len as usize)?;

            match hdr.id {
                ID_SOURCE_DESC => self.read_source_desc(payload)?,
                ID_LZ4 => {
                    if self.header_only {
                        // The header precedes the first compressed
                        // block; nothing more to find here.
                        break;
                    }
                    match decompress_frame(payload) {
                        Err(err) => warn!("Failed to decompress lz4 block: {}", err),
                        Ok(block) => {
                            if let Err(err) = self.read_entries(&mut ByteReader::new(&block)) {
                                warn!("Stopped decoding lz4 block: {}", err);
                            }
                        }
                    }
                }
                ID_AES_DESC => match SealDesc::decode(payload) {
                    Ok(desc) => {
                        self.encrypted = true;
                        info!(
                            "Encrypted log, sealed key is {} bytes",
                            desc.sealed_key.len()
                        );
                    }
                    Err(err) => warn!("Invalid encryption description: {}", err),
                },
                ID_AES => {
                    if !self.aes_warned {
                        warn!("Skipping encrypted blocks, no private key support");
                        self.aes_warned = true;
                    }
                }
                id => self.dispatch(id, payload),
            }
        }
        Ok(())
    }

    fn read_source_desc(&mut self, payload: &[u8]) -> format::Result<()> {
        let mut reader = ByteReader::new(payload);
        let desc = SourceDesc::decode(&mut reader)?;
        info!(
            "Source: id={} version={} plugin={} name={}",
            desc.source_id, desc.version, desc.plugin, desc.name
        );

        if self.decoders.contains_key(&desc.source_id) {
            warn!("Source with id={} already added", desc.source_id);
            return Ok(());
        }

        let full_name = desc.full_name();
        let decoder = match desc.plugin.as_str() {
            "internal" => {
                let is_header = desc.name == "header";
                let ds = self.add_data_source(&full_name, |name| {
                    DataSource::Internal(InternalDataSource::new(name))
                });
                Decoder::Internal { ds, is_header }
            }
            "settings" => {
                let ds = self.add_data_source(&full_name, |name| {
                    DataSource::Event(EventDataSource::new(name))
                });
                Decoder::Settings { ds }
            }
            "telemetry" => {
                let ds = self.add_data_source(&full_name, |name| {
                    DataSource::Telemetry(TelemetryDataSource::new(name))
                });
                Decoder::Telemetry(TlmDecoder {
                    ds,
                    full_name,
                    sample_size: 0,
                    sample_rate: 0,
                    var_descs: Vec::new(),
                    is_tlm: false,
                })
            }
            "ulog" => {
                let events = self.add_data_source(&full_name, |name| {
                    DataSource::Event(EventDataSource::new(name))
                });
                Decoder::Ulog(UlogDecoder {
                    events,
                    logs: None,
                    full_name,
                })
            }
            _ => Decoder::Opaque,
        };
        self.decoders.insert(desc.source_id, decoder);
        Ok(())
    }

    /// Store a new data source under `base`, disambiguated with a `-N`
    /// suffix when the name is already taken.
    fn add_data_source(&mut self, base: &str, make: impl FnOnce(&str) -> DataSource) -> usize {
        let count = self.name_counts.entry(base.to_string()).or_insert(0);
        let name = if *count > 0 {
            format!("{}-{}", base, count)
        } else {
            base.to_string()
        };
        *count += 1;

        self.arena.push(make(&name));
        self.arena.len() - 1
    }

    fn dispatch(&mut self, id: u32, payload: &[u8]) {
        let Self {
            arena,
            decoders,
            name_counts,
            header_found,
            ..
        } = self;

        let Some(decoder) = decoders.get_mut(&id) else {
            warn!("Source with id={} not found", id);
            return;
        };

        match decoder {
            Decoder::Internal { ds, is_header } => {
                internal_entry(&mut arena[*ds], payload);
                if *is_header {
                    *header_found = true;
                }
            }
            Decoder::Settings { ds } => settings_entry(&mut arena[*ds], payload),
            Decoder::Telemetry(tlm) => telemetry_entry(arena, name_counts, tlm, payload),
            Decoder::Ulog(ulog) => {
                if ulog.logs.is_none() {
                    let count = name_counts.entry(ulog.full_name.clone()).or_insert(0);
                    let name = if *count > 0 {
                        format!("{}-{}", ulog.full_name, count)
                    } else {
                        ulog.full_name.clone()
                    };
                    *count += 1;
                    arena.push(DataSource::Ulog(LogDataSource::new(&name)));
                    ulog.logs = Some(arena.len() - 1);
                }
                ulog_entry(arena, ulog, payload);
            }
            Decoder::Opaque => debug!("Ignoring {} bytes for opaque source {}", payload.len(), id),
        }
    }
}

fn internal_entry(ds: &mut DataSource, payload: &[u8]) {
    let Some(internal) = ds.as_internal_mut() else {
        return;
    };
    let mut reader = ByteReader::new(payload);
    while reader.remaining() > 0 {
        let (key, value) = match (reader.read_string(), reader.read_string()) {
            (Ok(key), Ok(value)) => (key, value),
            _ => {
                warn!("Malformed field in '{}'", internal.name());
                break;
            }
        };
        internal.add_field(&key, &value);
    }
}

const SETTING_TYPE_BOOLEAN: u8 = 0;
const SETTING_TYPE_INT: u8 = 1;
const SETTING_TYPE_DOUBLE: u8 = 2;
const SETTING_TYPE_STRING: u8 = 3;

/// Timestamped typed setting changes become CHANGED events.
fn settings_entry(ds: &mut DataSource, payload: &[u8]) {
    let Some(events) = ds.as_event_mut() else {
        return;
    };
    let mut reader = ByteReader::new(payload);
    while reader.remaining() > 0 {
        let decoded = (|| -> format::Result<Event> {
            let timestamp = reader.read_timestamp_us()?;
            let name = reader.read_string()?;
            let type_num = reader.read_u8()?;
            let (type_str, value) = match type_num {
                SETTING_TYPE_BOOLEAN => {
                    let v = reader.read_u8()?;
                    ("BOOL", if v != 0 { "true".into() } else { "false".into() })
                }
                SETTING_TYPE_INT => ("INT", reader.read_i32()?.to_string()),
                SETTING_TYPE_DOUBLE => ("DOUBLE", format!("{:.6}", reader.read_f64()?)),
                SETTING_TYPE_STRING => ("STRING", format!("'{}'", reader.read_string()?)),
                unknown => {
                    error!("Unknown setting type: {}", unknown);
                    return Err(FormatError::Truncated {
                        needed: 0,
                        available: 0,
                    });
                }
            };
            Ok(Event::new(
                timestamp,
                "CHANGED",
                vec![
                    EventParam {
                        name: "name".to_string(),
                        value: name,
                    },
                    EventParam {
                        name: "type".to_string(),
                        value: type_str.to_string(),
                    },
                    EventParam {
                        name: "value".to_string(),
                        value,
                    },
                ],
            ))
        })();

        match decoded {
            Ok(event) => events.add_event(event),
            Err(_) => break,
        }
    }
}

fn telemetry_entry(
    arena: &mut Vec<DataSource>,
    name_counts: &mut HashMap<String, usize>,
    tlm: &mut TlmDecoder,
    payload: &[u8],
) {
    let mut reader = ByteReader::new(payload);
    let mut values = Vec::new();

    while reader.remaining() >= 1 {
        let Ok(tag) = reader.read_u8() else {
            break;
        };
        match tag {
            TLM_TAG_HEADER => {
                let header = (|| -> format::Result<(u32, u32, u32, u32)> {
                    Ok((
                        reader.read_u32()?,
                        reader.read_u32()?,
                        reader.read_u32()?,
                        reader.read_u32()?,
                    ))
                })();
                let Ok((_sample_count, sample_size, sample_rate, metadata_size)) = header
                else {
                    warn!("Tlm '{}': truncated header", tlm_name(arena, tlm));
                    return;
                };

                if sample_size as usize > MAX_ALLOC_SIZE {
                    error!(
                        "Tlm '{}': sample size too big: {}",
                        tlm_name(arena, tlm),
                        sample_size
                    );
                    return;
                }
                if metadata_size as usize > MAX_ALLOC_SIZE {
                    error!(
                        "Tlm '{}': metadata size too big: {}",
                        tlm_name(arena, tlm),
                        metadata_size
                    );
                    return;
                }

                tlm.sample_size = sample_size;
                tlm.sample_rate = sample_rate;

                if metadata_size == 0 {
                    continue;
                }
                if reader.remaining() < metadata_size as usize {
                    error!("Tlm '{}': truncated header", tlm_name(arena, tlm));
                    return;
                }
                let Ok(metadata) = reader.read_bytes(metadata_size as usize) else {
                    return;
                };

                match parse_telemetry_metadata(metadata) {
                    Err(err) => {
                        error!("Tlm '{}': {}", tlm_name(arena, tlm), err);
                        return;
                    }
                    Ok(None) => tlm.is_tlm = false,
                    Ok(Some(descs)) => {
                        if tlm.var_descs.is_empty() {
                            tlm.var_descs = descs;
                            tlm.is_tlm = setup_layout(arena, tlm);
                        } else if !same_layout(&tlm.var_descs, &descs) {
                            // The section was re-described mid file: the
                            // old data source stays, a fresh one with a
                            // disambiguated name takes over.
                            info!(
                                "Tlm '{}': new description different from previous",
                                tlm_name(arena, tlm)
                            );
                            let count =
                                name_counts.entry(tlm.full_name.clone()).or_insert(0);
                            let name = if *count > 0 {
                                format!("{}-{}", tlm.full_name, count)
                            } else {
                                tlm.full_name.clone()
                            };
                            *count += 1;
                            arena.push(DataSource::Telemetry(TelemetryDataSource::new(&name)));
                            tlm.ds = arena.len() - 1;
                            tlm.var_descs = descs;
                            tlm.is_tlm = setup_layout(arena, tlm);
                        }
                    }
                }
            }
            TLM_TAG_SAMPLE => {
                let sample = (|| -> format::Result<(i64, u32)> {
                    Ok((reader.read_timestamp_us()?, reader.read_u32()?))
                })();
                let Ok((timestamp, seqnum)) = sample else {
                    warn!("Tlm '{}': truncated sample", tlm_name(arena, tlm));
                    return;
                };
                let Ok(raw) = reader.read_bytes(tlm.sample_size as usize) else {
                    warn!("Tlm '{}': truncated sample", tlm_name(arena, tlm));
                    return;
                };

                if !tlm.is_tlm {
                    continue;
                }

                values.clear();
                let mut off = 0usize;
                for desc in &tlm.var_descs {
                    for _ in 0..desc.count {
                        let size = desc.size as usize;
                        values.push(element_to_f64(&raw[off..off + size], desc.ty));
                        off += size;
                    }
                }

                if let Some(DataSource::Telemetry(ds)) = arena.get_mut(tlm.ds) {
                    ds.add_sample(timestamp, seqnum, &values);
                }
            }
            unknown => {
                error!("Tlm '{}': unknown tag: {}", tlm_name(arena, tlm), unknown);
                return;
            }
        }
    }
}

fn tlm_name<'a>(arena: &'a [DataSource], tlm: &TlmDecoder) -> &'a str {
    arena.get(tlm.ds).map(|ds| ds.name()).unwrap_or("?")
}

/// Install the decoded layout on the decoder's data source. Fails when
/// the declared variables overflow the sample size.
fn setup_layout(arena: &mut [DataSource], tlm: &TlmDecoder) -> bool {
    let mut off = 0u64;
    let mut descs = Vec::with_capacity(tlm.var_descs.len());
    for var in &tlm.var_descs {
        descs.push(DataSetDesc::new(&var.name, var.count as usize));
        off += var.size as u64 * var.count as u64;
    }

    if off > tlm.sample_size as u64 {
        error!(
            "Tlm '{}': invalid description size: {}({})",
            tlm_name(arena, tlm),
            off,
            tlm.sample_size
        );
        return false;
    }

    let Some(DataSource::Telemetry(ds)) = arena.get_mut(tlm.ds) else {
        return false;
    };
    ds.set_sample_rate(tlm.sample_rate);
    ds.set_descs(&descs);
    true
}

/// Two layouts are the same when the variable names match pairwise.
fn same_layout(a: &[VarDesc], b: &[VarDesc]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.name == y.name)
}

fn ulog_entry(arena: &mut [DataSource], ulog: &UlogDecoder, payload: &[u8]) {
    let mut reader = ByteReader::new(payload);

    while reader.remaining() >= ULOG_HEADER_LEN {
        // Peek the lengths, then consume the whole record
        let pos = reader.pos();
        let Ok(payload_len) = reader.read_u16() else {
            break;
        };
        let Ok(hdr_len) = reader.read_u16() else {
            break;
        };
        reader.seek(pos);

        if hdr_len as usize != ULOG_HEADER_LEN {
            error!("Invalid ulog header size: {}({})", hdr_len, ULOG_HEADER_LEN);
            return;
        }
        let total = hdr_len as usize + payload_len as usize;
        if reader.remaining() < total {
            error!("Truncated ulog entry");
            break;
        }
        let Ok(raw) = reader.read_bytes(total) else {
            break;
        };

        if let Some(logs) = ulog.logs {
            if let Some(DataSource::Ulog(ds)) = arena.get_mut(logs) {
                ds.add_entry(raw.to_vec());
            }
        }

        match parse_ulog_record(raw) {
            None => warn!("Failed to parse ulog record"),
            Some(record) => {
                if let Some(message) = record.message {
                    if let Some(event) = Event::from_text(&message, record.timestamp) {
                        if let Some(DataSource::Event(ds)) = arena.get_mut(ulog.events) {
                            ds.add_event(event);
                        }
                    }
                }
            }
        }
    }
}
