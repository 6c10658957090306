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

// Translation of raw log events into the exchange document's fixed
// event taxonomy.

use std::collections::BTreeMap;

use crate::reader::{Event, EventDataSource};

/// Category of an output event, written as `event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GutmaEventKind {
    /// Flight state transitions (takeoff, landing, ...)
    Flight,
    Alert,
    Media,
    Connection,
    Gps,
}

impl GutmaEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GutmaEventKind::Flight => "CONTROLLER_EVENT",
            GutmaEventKind::Alert => "CONTROLLER_ALERT",
            GutmaEventKind::Media => "CONTROLLER_MEDIA",
            GutmaEventKind::Connection => "CONTROLLER_CONNECTION",
            GutmaEventKind::Gps => "CONTROLLER_GPS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GutmaEvent {
    pub kind: GutmaEventKind,
    pub info: &'static str,
    pub media_name: Option<String>,
}

/// Selected and translated events, ordered by timestamp. At most one
/// output event per timestamp, the last translation winning.
pub struct EvtView {
    events: BTreeMap<i64, GutmaEvent>,
}

impl EvtView {
    pub fn from_sources(sources: &[&EventDataSource]) -> Self {
        let mut view = Self {
            events: BTreeMap::new(),
        };

        for source in sources {
            for event in source.events() {
                match event.name.as_str() {
                    "AUTOPILOT" => {
                        view.process_alerts(event);
                        view.process_flying_state(event);
                    }
                    "COLIBRY" | "ESC" | "GIMBAL" | "SMARTBATTERY" | "STORAGE" | "VISION" => {
                        view.process_alerts(event)
                    }
                    "PHOTO" | "RECORD" => view.process_media(event),
                    "CONTROLLER" => view.process_connection(event),
                    "GPS" => view.process_gps(event),
                    _ => {}
                }
            }
        }
        view
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn start_ts(&self) -> Option<i64> {
        self.events.keys().next().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &GutmaEvent)> {
        self.events.iter().map(|(&ts, evt)| (ts, evt))
    }

    fn add(&mut self, timestamp: i64, kind: GutmaEventKind, info: &'static str) {
        self.events.insert(
            timestamp,
            GutmaEvent {
                kind,
                info,
                media_name: None,
            },
        );
    }

    fn process_flying_state(&mut self, event: &Event) {
        let Some(state) = event.param("flying_state") else {
            return;
        };
        let info = match state {
            "emergency" => "EME",
            "user_takeoff" | "takeoff" => "TOF",
            "landing" => "LDG",
            "landed" => "LND",
            "flying" => "ENR",
            _ => return,
        };
        self.add(event.timestamp, GutmaEventKind::Flight, info);
    }

    fn process_alerts(&mut self, event: &Event) {
        match event.name.as_str() {
            "AUTOPILOT" => {
                self.simple_alert(event, "alert", "CUT_OUT", "CUT OUT MOTOR");
                self.simple_alert(event, "alert", "BATTERY_LOW", "BATTERY LOW");
                self.propeller_alert(event);
            }
            "COLIBRY" => {
                self.simple_alert(event, "event", "defective_motor", "MOTOR BROKEN")
            }
            "ESC" => self.simple_alert(event, "error_m", "temperature", "MOTOR TEMPERATURE"),
            "GIMBAL" => {
                self.simple_alert(event, "alert", "critical", "GIMBAL ERROR");
                self.simple_alert(event, "alert", "calibration", "CALIBRATION REQUIRED");
            }
            "SMARTBATTERY" => {
                self.simple_alert(
                    event,
                    "temperature_alert",
                    "low critical",
                    "BATTERY LOW TEMPERATURE",
                );
                self.simple_alert(
                    event,
                    "temperature_alert",
                    "high critical",
                    "BATTERY HIGH TEMPERATURE",
                );
            }
            "STORAGE" => self.storage_alert(event),
            "VISION" => self.vision_alert(event),
            _ => {}
        }
    }

    /// Alert triggered by a parameter whose name contains `param` and
    /// whose value contains `needle`.
    fn simple_alert(&mut self, event: &Event, param: &str, needle: &str, info: &'static str) {
        let hit = event
            .params
            .iter()
            .any(|p| p.name.contains(param) && p.value.contains(needle));
        if hit {
            self.add(event.timestamp, GutmaEventKind::Alert, info);
        }
    }

    fn propeller_alert(&mut self, event: &Event) {
        let info = match event.param("vibration_level") {
            Some("WARNING") => "PROPELLER UNSCREWED",
            Some("CRITICAL") => "PROPELLER BROKEN",
            _ => return,
        };
        self.add(event.timestamp, GutmaEventKind::Alert, info);
    }

    fn storage_alert(&mut self, event: &Event) {
        const INTERNAL_STORAGE_ID: i32 = 0;
        const EXTERNAL_STORAGE_ID: i32 = 1;

        let id: i32 = match event.param("storage_id").and_then(|v| v.parse().ok()) {
            Some(id) => id,
            None => return,
        };
        let info = match (id, event.param("event")) {
            (INTERNAL_STORAGE_ID, Some("full")) => "INTERNAL MEMORY FULL",
            (INTERNAL_STORAGE_ID, Some("almost_full")) => "INTERNAL MEMORY ALMOST FULL",
            (EXTERNAL_STORAGE_ID, Some("full")) => "SDCARD FULL",
            (EXTERNAL_STORAGE_ID, Some("almost_full")) => "SDCARD ALMOST FULL",
            _ => return,
        };
        self.add(event.timestamp, GutmaEventKind::Alert, info);
    }

    fn vision_alert(&mut self, event: &Event) {
        let optical_flow = event.param("feature") == Some("optical_flow");
        let defective = event.param("event") == Some("defective");
        if optical_flow && defective {
            self.add(event.timestamp, GutmaEventKind::Alert, "VERTICAL CAMERA ERROR");
        }
    }

    fn process_media(&mut self, event: &Event) {
        let Some(path) = event.param("path") else {
            return;
        };
        let media_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let info = if event.name == "RECORD" {
            "VIDEO"
        } else {
            "PHOTO"
        };
        self.events.insert(
            event.timestamp,
            GutmaEvent {
                kind: GutmaEventKind::Media,
                info,
                media_name: Some(media_name),
            },
        );
    }

    fn process_connection(&mut self, event: &Event) {
        let info = match event.param("event") {
            Some("connected") => "CONTROLLER CONNECTED",
            Some("disconnected") => "CONTROLLER DISCONNECTED",
            _ => return,
        };
        self.add(event.timestamp, GutmaEventKind::Connection, info);
    }

    fn process_gps(&mut self, event: &Event) {
        let info = match event.param("event") {
            Some("fixed") => "GPS FIX",
            Some("unfixed") => "GPS FIX LOST",
            _ => return,
        };
        self.add(event.timestamp, GutmaEventKind::Gps, info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Event;

    fn sources(events: Vec<Event>) -> EventDataSource {
        let mut ds = EventDataSource::new("ulog-main");
        for event in events {
            ds.add_event(event);
        }
        ds
    }

    #[test]
    fn test_flying_state_translation() {
        let ds = sources(vec![
            Event::from_text("EVT:AUTOPILOT;flying_state=takeoff", 100).unwrap(),
            Event::from_text("EVT:AUTOPILOT;flying_state=flying", 200).unwrap(),
            Event::from_text("EVT:AUTOPILOT;flying_state=hovering", 300).unwrap(),
        ]);
        let view = EvtView::from_sources(&[&ds]);

        let infos: Vec<&str> = view.iter().map(|(_, e)| e.info).collect();
        assert_eq!(infos, vec!["TOF", "ENR"]);
    }

    #[test]
    fn test_storage_alert_translation() {
        let ds = sources(vec![Event::from_text(
            "EVT:STORAGE;storage_id=1;event=almost_full",
            50,
        )
        .unwrap()]);
        let view = EvtView::from_sources(&[&ds]);
        let (ts, event) = view.iter().next().unwrap();
        assert_eq!(ts, 50);
        assert_eq!(event.info, "SDCARD ALMOST FULL");
        assert_eq!(event.kind, GutmaEventKind::Alert);
    }

    #[test]
    fn test_media_event_keeps_basename() {
        let ds = sources(vec![Event::from_text(
            "EVT:RECORD;event=start;path='/data/media/video_001.mp4'",
            75,
        )
        .unwrap()]);
        let view = EvtView::from_sources(&[&ds]);
        let (_, event) = view.iter().next().unwrap();
        assert_eq!(event.info, "VIDEO");
        assert_eq!(event.media_name.as_deref(), Some("video_001.mp4"));
    }

    #[test]
    fn test_unknown_events_ignored() {
        let ds = sources(vec![Event::from_text("EVT:TIME;date='2024-01-01'", 10).unwrap()]);
        let view = EvtView::from_sources(&[&ds]);
        assert!(view.is_empty());
    }
}
