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

// View over the decoded file header: reference time reconstruction,
// ground-control-station fields, and the property maps feeding the
// flight-data section.

use chrono::{FixedOffset, TimeZone};

use crate::reader::{Event, InternalDataSource};

pub struct HdrView<'a> {
    hdr: &'a InternalDataSource,
    gcs_name: String,
    gcs_type: String,
}

impl<'a> HdrView<'a> {
    pub fn new(hdr: &'a InternalDataSource) -> Self {
        let gcs_name = parse_gcs_field(hdr, "gcs.name", "name");
        let gcs_type = parse_gcs_field(hdr, "gcs.type", "type");
        Self {
            hdr,
            gcs_name,
            gcs_type,
        }
    }

    pub fn gcs_name(&self) -> &str {
        &self.gcs_name
    }

    pub fn gcs_type(&self) -> &str {
        &self.gcs_type
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.hdr.contains_field(key)
    }

    pub fn value(&self, key: &str) -> String {
        self.hdr.value(key)
    }

    pub fn fields(&self) -> &[(String, String)] {
        self.hdr.fields()
    }

    /// Wall-clock anchor of the monotonic timeline: epoch seconds and
    /// UTC offset parsed from the `reftime.monotonic` event text.
    fn monotonic_anchor(&self) -> (i64, i32) {
        let Some(monotonic) = self.hdr.get("reftime.monotonic") else {
            return (0, 0);
        };
        let Some(event) = Event::from_text(monotonic, 0) else {
            return (0, 0);
        };

        // Fields arrive as date='2024-01-02' and time='T030405+0200'
        let mut date = String::new();
        let mut time = String::new();
        for param in &event.params {
            match param.name.as_str() {
                "date" => date = param.value.clone(),
                "time" => time = param.value.clone(),
                _ => {}
            }
        }

        let combined = format!("{}{}", date, time);
        match chrono::DateTime::parse_from_str(&combined, "%Y-%m-%dT%H%M%S%z") {
            Ok(dt) => (dt.timestamp(), dt.offset().local_minus_utc()),
            Err(_) => (0, 0),
        }
    }

    /// Monotonic microsecond timestamp recorded alongside the anchor.
    fn absolute_ref(&self) -> i64 {
        self.hdr
            .get("reftime.absolute")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
    }

    /// Local date-time of one monotonic sample timestamp.
    pub fn sample_datetime(&self, ts: i64) -> String {
        let (epoch, offset) = self.monotonic_anchor();
        let epoch = epoch + (ts - self.absolute_ref()) / 1_000_000;
        format_local(epoch, offset)
    }

    /// Local date-time of the start of logging.
    pub fn start_datetime(&self, start_ts: i64) -> String {
        let (epoch, offset) = self.monotonic_anchor();
        let epoch = epoch - self.absolute_ref() / 1_000_000 + start_ts / 1_000_000;
        format_local(epoch, offset)
    }
}

/// GCS identity fields are stored as event text, e.g.
/// `EVT:GCS;name='...'`; pull one parameter out.
fn parse_gcs_field(hdr: &InternalDataSource, field: &str, param: &str) -> String {
    let Some(value) = hdr.get(field) else {
        return String::new();
    };
    let Some(event) = Event::from_text(value, -1) else {
        return String::new();
    };
    event.param(param).unwrap_or_default().to_string()
}

fn format_local(epoch: i64, offset: i32) -> String {
    let Some(tz) = FixedOffset::east_opt(offset) else {
        return String::new();
    };
    match tz.timestamp_opt(epoch, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%dT%H:%M:%S%z").to_string(),
        _ => String::new(),
    }
}

/// Header property key -> aircraft JSON field.
pub fn aircraft_field(property: &str) -> Option<&'static str> {
    match property {
        "ro.product.model" => Some("model"),
        "ro.build.version" => Some("firmware_version"),
        "ro.factory.serial" => Some("serial_number"),
        "ro.mech.revision" => Some("hardware_version"),
        "ro.revision" => Some("motherboard_version"),
        "ro.hardware" => Some("product_name"),
        "ro.product.model.id" => Some("product_id"),
        _ => None,
    }
}

/// Header property key -> battery JSON field.
pub fn battery_field(property: &str) -> Option<&'static str> {
    match property {
        "ro.smartbattery.serial" => Some("serial_number"),
        "ro.smartbattery.hw_version" => Some("hardware_version"),
        "ro.smartbattery.version" => Some("firmware_version"),
        "ro.smartbattery.cycle_count" => Some("cycle_count"),
        "ro.smartbattery.design_cap" => Some("design_capacity"),
        "ro.smartbattery.device_name" => Some("model"),
        _ => None,
    }
}
