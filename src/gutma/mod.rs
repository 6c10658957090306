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

// Conversion of one log file into a GUTMA flight logging exchange
// document: join the header, the merged telemetry rows and the
// translated event stream on a common start time, then lay the result
// out as JSON.

mod events;
mod header;

pub use events::{EvtView, GutmaEvent, GutmaEventKind};
pub use header::HdrView;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::reader::{DataSetDesc, DataSource, FileReader, TlmView};
use header::{aircraft_field, battery_field};

const FLIGHT_LOGGING_VERSION: &str = "1.0.0";

/// Header property carrying the firmware version.
const VERSION_PROPERTY: &str = "ro.build.version";
/// Oldest firmware whose logs convert cleanly.
const MIN_SUPPORTED_VERSION: (u32, u32, u32) = (1, 6, 0);

// Telemetry section names consumed by the converter.
const GPS_LONGITUDE: &str = "user_telemetry.gps_longitude";
const GPS_LATITUDE: &str = "user_telemetry.gps_latitude";
const GPS_ALTITUDE: &str = "user_telemetry.gps_wgs84_altitude";
const GPS_LATITUDE_ACCURACY: &str = "user_telemetry.gps_latitude_accuracy";
const GPS_LONGITUDE_ACCURACY: &str = "user_telemetry.gps_longitude_accuracy";
const SPEED_X: &str = "navdata.speed_horiz_x_m_s";
const SPEED_Y: &str = "navdata.speed_horiz_y_m_s";
const SPEED_Z: &str = "navdata.speed_horiz_z_m_s";
const BATTERY_REMAINING_CAP: &str = "smartbattery.remaining_cap";
const BATTERY_FULL_CHARGE_CAP: &str = "smartbattery.full_charge_cap";
const BATTERY_VOLTAGE_NOW: &str = "smartbattery.voltage_now";
const BATTERY_CURRENT_NOW: &str = "smartbattery.current_now";
const BATTERY_CELL_VOLTAGE: &str = "smartbattery.cell_voltage_now";
const WIFI_SIGNAL_0: &str = "wifi.signal_0";
const WIFI_SIGNAL_1: &str = "wifi.signal_1";
const GNSS_SV_NUM: &str = "gnss.sv_num";
const ANGLE_PHI: &str = "user_telemetry.angle_phi";
const ANGLE_PSI: &str = "user_telemetry.angle_psi";
const ANGLE_THETA: &str = "user_telemetry.angle_theta";

/// Telemetry sections pulled out of each source before merging.
const WANTED_TLM: &[&str] = &[
    GPS_LONGITUDE,
    GPS_LATITUDE,
    GPS_ALTITUDE,
    GPS_LATITUDE_ACCURACY,
    GPS_LONGITUDE_ACCURACY,
    SPEED_X,
    SPEED_Y,
    SPEED_Z,
    BATTERY_REMAINING_CAP,
    BATTERY_FULL_CHARGE_CAP,
    BATTERY_VOLTAGE_NOW,
    BATTERY_CURRENT_NOW,
    BATTERY_CELL_VOLTAGE,
    WIFI_SIGNAL_0,
    WIFI_SIGNAL_1,
    GNSS_SV_NUM,
    ANGLE_PHI,
    ANGLE_PSI,
    ANGLE_THETA,
];

#[derive(Debug, Clone, Copy)]
enum ColumnKind {
    /// Copied straight from one flattened telemetry column.
    Plain(&'static str),
    BatteryPercent,
    BatteryVoltage,
    CellVoltage(usize),
    BatteryCurrent,
    WifiSignal,
    GpsAvailable,
    GpsAccuracy,
    SvNumber,
}

struct ColumnSpec {
    json_name: &'static str,
    kind: ColumnKind,
}

/// Output column order of `flight_logging_items`.
const JSON_VAR_ORDER: &[ColumnSpec] = &[
    ColumnSpec { json_name: "gps_lon", kind: ColumnKind::Plain(GPS_LONGITUDE) },
    ColumnSpec { json_name: "gps_lat", kind: ColumnKind::Plain(GPS_LATITUDE) },
    ColumnSpec { json_name: "gps_altitude", kind: ColumnKind::Plain(GPS_ALTITUDE) },
    ColumnSpec { json_name: "speed_vx", kind: ColumnKind::Plain(SPEED_X) },
    ColumnSpec { json_name: "speed_vy", kind: ColumnKind::Plain(SPEED_Y) },
    ColumnSpec { json_name: "speed_vz", kind: ColumnKind::Plain(SPEED_Z) },
    ColumnSpec { json_name: "battery_percent", kind: ColumnKind::BatteryPercent },
    ColumnSpec { json_name: "battery_voltage", kind: ColumnKind::BatteryVoltage },
    ColumnSpec { json_name: "battery_cell_voltage_0", kind: ColumnKind::CellVoltage(0) },
    ColumnSpec { json_name: "battery_cell_voltage_1", kind: ColumnKind::CellVoltage(1) },
    ColumnSpec { json_name: "battery_cell_voltage_2", kind: ColumnKind::CellVoltage(2) },
    ColumnSpec { json_name: "battery_current", kind: ColumnKind::BatteryCurrent },
    ColumnSpec { json_name: "wifi_signal", kind: ColumnKind::WifiSignal },
    ColumnSpec { json_name: "product_gps_available", kind: ColumnKind::GpsAvailable },
    ColumnSpec { json_name: "product_gps_position_error", kind: ColumnKind::GpsAccuracy },
    ColumnSpec { json_name: "product_gps_sv_number", kind: ColumnKind::SvNumber },
    ColumnSpec { json_name: "angle_phi", kind: ColumnKind::Plain(ANGLE_PHI) },
    ColumnSpec { json_name: "angle_psi", kind: ColumnKind::Plain(ANGLE_PSI) },
    ColumnSpec { json_name: "angle_theta", kind: ColumnKind::Plain(ANGLE_THETA) },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertStatus {
    Ok,
    Error,
    NoFlight,
    UnsupportedVersion,
}

impl ConvertStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            ConvertStatus::Ok => 0,
            ConvertStatus::Error => 1,
            ConvertStatus::NoFlight => 2,
            ConvertStatus::UnsupportedVersion => 3,
        }
    }
}

/// Convert `input` into a GUTMA exchange document at `output`. With
/// `only_flight`, sessions without a takeoff are skipped and no output
/// file is written.
pub fn convert(input: &Path, output: &Path, only_flight: bool) -> ConvertStatus {
    match convert_inner(input, output, only_flight) {
        Ok(status) => status,
        Err(err) => {
            error!("conversion failed: {:#}", err);
            ConvertStatus::Error
        }
    }
}

fn convert_inner(input: &Path, output: &Path, only_flight: bool) -> Result<ConvertStatus> {
    let mut reader = FileReader::new(input);
    reader.load_contents()?;

    let mut hdr = None;
    let mut tlm_views = Vec::new();
    let mut evts = Vec::new();
    for ds in reader.data_sources() {
        // Settings changes are events too, but not flight events
        if ds.name().starts_with("settings-") {
            continue;
        }
        match ds {
            DataSource::Internal(internal) if ds.name() == "internal-header" => {
                hdr = Some(internal);
            }
            DataSource::Telemetry(tlm) => tlm_views.push(TlmView::from_source(tlm, WANTED_TLM)),
            DataSource::Event(events) => evts.push(events),
            _ => {}
        }
    }

    let Some(hdr) = hdr else {
        warn!("No header record in '{}'", input.display());
        return Ok(ConvertStatus::Error);
    };

    if !hdr.contains_field(VERSION_PROPERTY) {
        warn!("Firmware version not found in header");
        return Ok(ConvertStatus::Error);
    }
    let version = hdr.value(VERSION_PROPERTY);
    match check_version(&version) {
        VersionCheck::Invalid => {
            warn!("Failed to parse firmware version: {}", version);
            return Ok(ConvertStatus::Error);
        }
        VersionCheck::Unsupported => {
            warn!("Unsupported version for gutma export: {}", version);
            return Ok(ConvertStatus::UnsupportedVersion);
        }
        VersionCheck::Dev | VersionCheck::Supported => {}
    }

    if only_flight && hdr.get("takeoff") == Some("0") {
        info!("No takeoff during this session");
        return Ok(ConvertStatus::NoFlight);
    }

    if tlm_views.is_empty() || evts.is_empty() {
        warn!("Missing telemetry or event data in '{}'", input.display());
        return Ok(ConvertStatus::Error);
    }

    let merged = TlmView::merge(&tlm_views);
    let hdr_view = HdrView::new(hdr);
    let evt_view = EvtView::from_sources(&evts);

    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let document = exchange_document(&file_name, &merged, &evt_view, &hdr_view);

    let file = std::fs::File::create(output)
        .with_context(|| format!("create('{}')", output.display()))?;
    serde_json::to_writer_pretty(file, &document).context("Failed to write document")?;

    Ok(ConvertStatus::Ok)
}

enum VersionCheck {
    Supported,
    Unsupported,
    Dev,
    Invalid,
}

/// Semantic compare against the minimum supported firmware version.
/// Development builds (0.0.0-...) bypass the gate.
fn check_version(version: &str) -> VersionCheck {
    let numeric: String = version
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = numeric.split('.');
    let (Some(major), Some(minor), Some(patch)) = (parts.next(), parts.next(), parts.next())
    else {
        return VersionCheck::Invalid;
    };
    let (Ok(major), Ok(minor), Ok(patch)) =
        (major.parse::<u32>(), minor.parse::<u32>(), patch.parse::<u32>())
    else {
        return VersionCheck::Invalid;
    };

    if (major, minor, patch) == (0, 0, 0) {
        return VersionCheck::Dev;
    }
    if (major, minor, patch) < MIN_SUPPORTED_VERSION {
        VersionCheck::Unsupported
    } else {
        VersionCheck::Supported
    }
}

/// Map flattened column names (array sets expand to `name_<i>`) to
/// their position in a merged row.
fn flatten_columns(descs: &[DataSetDesc]) -> HashMap<String, usize> {
    let mut cols = HashMap::new();
    let mut idx = 0usize;
    for desc in descs {
        if desc.item_count == 1 {
            cols.entry(desc.name.clone()).or_insert(idx);
            idx += 1;
        } else {
            for item in 0..desc.item_count {
                cols.entry(format!("{}_{}", desc.name, item)).or_insert(idx);
                idx += 1;
            }
        }
    }
    cols
}

struct RowCtx<'a> {
    cols: &'a HashMap<String, usize>,
    row: &'a [f64],
}

impl RowCtx<'_> {
    fn get(&self, name: &str) -> f64 {
        self.cols
            .get(name)
            .and_then(|&idx| self.row.get(idx))
            .copied()
            .unwrap_or(0.0)
    }
}

impl ColumnSpec {
    fn present(&self, cols: &HashMap<String, usize>) -> bool {
        match self.kind {
            ColumnKind::Plain(name) => cols.contains_key(name),
            // The third cell is genuinely absent on 2-cell packs
            ColumnKind::CellVoltage(2) => {
                cols.contains_key(&format!("{}_{}", BATTERY_CELL_VOLTAGE, 2))
            }
            _ => true,
        }
    }

    fn value(&self, ctx: &RowCtx<'_>) -> f64 {
        match self.kind {
            ColumnKind::Plain(name) => ctx.get(name),
            ColumnKind::BatteryPercent => {
                let full = ctx.get(BATTERY_FULL_CHARGE_CAP);
                if full == 0.0 {
                    -1.0
                } else {
                    round2(ctx.get(BATTERY_REMAINING_CAP) / full * 100.0)
                }
            }
            ColumnKind::BatteryVoltage => millis_or_missing(ctx.get(BATTERY_VOLTAGE_NOW)),
            ColumnKind::CellVoltage(cell) => {
                millis_or_missing(ctx.get(&format!("{}_{}", BATTERY_CELL_VOLTAGE, cell)))
            }
            ColumnKind::BatteryCurrent => {
                let current = ctx.get(BATTERY_CURRENT_NOW);
                if current == 0.0 {
                    -1.0
                } else {
                    -current / 1000.0
                }
            }
            ColumnKind::WifiSignal => ctx.get(WIFI_SIGNAL_0).max(ctx.get(WIFI_SIGNAL_1)),
            ColumnKind::GpsAvailable => {
                let lat = ctx.get(GPS_LATITUDE);
                let lon = ctx.get(GPS_LONGITUDE);
                if lat == 500.0 && lon == 500.0 {
                    0.0
                } else {
                    1.0
                }
            }
            ColumnKind::GpsAccuracy => ctx
                .get(GPS_LATITUDE_ACCURACY)
                .hypot(ctx.get(GPS_LONGITUDE_ACCURACY)),
            ColumnKind::SvNumber => {
                if ctx.cols.contains_key(GNSS_SV_NUM) {
                    ctx.get(GNSS_SV_NUM)
                } else {
                    (0..3)
                        .map(|i| ctx.get(&format!("{}_{}", GNSS_SV_NUM, i)))
                        .sum()
                }
            }
        }
    }
}

/// Battery values are recorded in millivolts/milliamps; zero means the
/// reading was missing.
fn millis_or_missing(value: f64) -> f64 {
    if value == 0.0 {
        -1.0
    } else {
        value / 1000.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn file_section(out_name: &str) -> Value {
    let creation = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%z").to_string();
    json!({
        "version": FLIGHT_LOGGING_VERSION,
        "logging_type": "GUTMA_DX_JSON",
        "filename": out_name,
        "creation_dtg": creation,
    })
}

fn flight_data_section(hdr: &HdrView<'_>) -> Value {
    let mut aircraft = Map::new();
    let mut battery = Map::new();
    let mut mecha = String::new();
    let mut motherboard = String::new();

    for (key, value) in hdr.fields() {
        if let Some(name) = battery_field(key) {
            let mut value = value.clone();
            if name == "design_capacity" {
                let capacity: f64 = value.parse().unwrap_or(0.0);
                value = format!("{:.3}", capacity / 1000.0);
            }
            battery.insert(name.to_string(), json!(value));
        } else if let Some(name) = aircraft_field(key) {
            match name {
                "hardware_version" => mecha = value.clone(),
                "motherboard_version" => motherboard = value.clone(),
                "product_id" => {
                    // Stored in hex, exported in decimal
                    if let Ok(id) = i64::from_str_radix(value.trim_start_matches("0x"), 16) {
                        aircraft.insert(name.to_string(), json!(id.to_string()));
                    }
                }
                _ => {
                    aircraft.insert(name.to_string(), json!(value));
                }
            }
        }
    }

    if mecha.is_empty() {
        mecha = "1.0".to_string();
    }
    aircraft.insert(
        "manufacturer".to_string(),
        json!(hdr.value("ro.product.manufacturer")),
    );
    aircraft.insert(
        "hardware_version".to_string(),
        json!(format!("m{}-b{}", mecha, motherboard)),
    );

    battery.insert("type".to_string(), json!("battery"));

    json!({
        "aircraft": aircraft,
        "gcs": {
            "type": hdr.gcs_type(),
            "name": hdr.gcs_name(),
        },
        "payload": [battery],
        "flight_id": hdr.value("control.flight.uuid"),
    })
}

fn flight_logging_section(merged: &TlmView, evts: &EvtView, hdr: &HdrView<'_>) -> Value {
    let tlm_start = merged.start_ts().unwrap_or(i64::MAX);
    let evt_start = evts.start_ts().unwrap_or(i64::MAX);
    let start_ts = tlm_start.min(evt_start);

    let cols = flatten_columns(merged.descs());
    let present: Vec<&ColumnSpec> = JSON_VAR_ORDER
        .iter()
        .filter(|spec| spec.present(&cols))
        .collect();

    let mut items = Vec::new();
    for (&ts, row) in merged.data() {
        let ctx = RowCtx {
            cols: &cols,
            row,
        };
        let mut jrow = Vec::with_capacity(present.len() + 1);
        jrow.push(json!(round3((ts - start_ts) as f64 / 1_000_000.0)));
        for spec in &present {
            jrow.push(json!(spec.value(&ctx)));
        }
        items.push(Value::Array(jrow));
    }

    let mut events = Vec::new();
    let mut last_flight_info = "";
    for (ts, event) in evts.iter() {
        // Coalesce consecutive duplicate flight state symbols
        if event.kind == GutmaEventKind::Flight {
            if event.info == last_flight_info {
                continue;
            }
            last_flight_info = event.info;
        }

        let mut obj = Map::new();
        obj.insert("event_type".to_string(), json!(event.kind.as_str()));
        obj.insert("event_info".to_string(), json!(event.info));
        obj.insert(
            "event_timestamp".to_string(),
            json!(format!("{:.3}", (ts - start_ts) as f64 / 1_000_000.0)),
        );
        if let Some(media_name) = &event.media_name {
            obj.insert("media_name".to_string(), json!(media_name));
        }
        events.push(Value::Object(obj));
    }

    let mut section = Map::new();
    section.insert("uom_system".to_string(), json!("Metric"));
    section.insert("altitude_system".to_string(), json!("WGS84"));
    section.insert(
        "logging_start_dtg".to_string(),
        json!(hdr.start_datetime(start_ts)),
    );
    section.insert("events".to_string(), Value::Array(events));

    if !items.is_empty() {
        let mut keys = vec![json!("timestamp")];
        keys.extend(present.iter().map(|spec| json!(spec.json_name)));
        section.insert("flight_logging_keys".to_string(), Value::Array(keys));
        section.insert("flight_logging_items".to_string(), Value::Array(items));
    }

    Value::Object(section)
}

fn exchange_document(
    out_name: &str,
    merged: &TlmView,
    evts: &EvtView,
    hdr: &HdrView<'_>,
) -> Value {
    json!({
        "exchange": {
            "exchange_type": "flight_logging",
            "message": {
                "flight_data": flight_data_section(hdr),
                "file": file_section(out_name),
                "flight_logging": flight_logging_section(merged, evts, hdr),
                "message_type": "flight_logging_submission",
            },
        },
    })
}
