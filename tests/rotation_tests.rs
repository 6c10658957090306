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

// Rotation, retention and index-monotonicity tests.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use flightlog::frontend::{CloseReason, LogFrontend};
use flightlog::reader::{read_log_header, FileReader};
use flightlog::recorder::{LogIdxManager, PropertyStore, RecorderOptions};
use flightlog::storage::FileBackend;

fn new_frontend(opt: RecorderOptions) -> LogFrontend {
    let backend = Box::new(FileBackend::new(&opt.output_dir));
    LogFrontend::new(opt, backend, 256, 257)
}

fn log_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("log"))
        .collect();
    names.sort();
    names
}

/// Run one open/close session, optionally marking a takeoff.
fn session(frontend: &mut LogFrontend, takeoff: bool) {
    frontend.open().unwrap();
    if takeoff {
        frontend.update_takeoff(true);
    }
    frontend.close(CloseReason::Exiting);
}

#[test]
fn test_rotation_renames_previous_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut frontend = new_frontend(RecorderOptions::new(dir.path()));

    session(&mut frontend, false);
    session(&mut frontend, false);

    let files = log_files(dir.path());
    assert_eq!(files, vec!["log-1.bin".to_string(), "log.bin".to_string()]);
}

#[test]
fn test_rotation_index_grows_past_siblings() {
    let dir = tempfile::TempDir::new().unwrap();

    // A sibling with a high index from a previous deployment
    std::fs::write(dir.path().join("log-41.bin"), b"junk").unwrap();

    let mut frontend = new_frontend(RecorderOptions::new(dir.path()));
    session(&mut frontend, false);
    session(&mut frontend, false);

    let files = log_files(dir.path());
    assert!(files.contains(&"log-42.bin".to_string()), "{:?}", files);
}

#[test]
fn test_rotation_by_size() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut opt = RecorderOptions::new(dir.path());
    opt.max_log_size = 4096;
    let mut frontend = new_frontend(opt);

    frontend.open().unwrap();

    // One oversized payload entry closes the file and reopens a new one
    frontend.write(&[0u8; 8192], false);

    assert!(frontend.is_opened());
    let files = log_files(dir.path());
    assert_eq!(files, vec!["log-1.bin".to_string(), "log.bin".to_string()]);

    // The rotated file carries the close reason, the new one holds just
    // a header
    let mut reader = FileReader::new(dir.path().join("log-1.bin"));
    reader.load_contents().unwrap();
    let footer = reader
        .get("internal-footer")
        .and_then(|ds| ds.as_internal())
        .unwrap();
    assert_eq!(footer.get("reason"), Some("FILE_TOO_BIG"));
    assert!(std::fs::metadata(dir.path().join("log.bin")).unwrap().len() < 4096);

    frontend.close(CloseReason::Exiting);
}

#[test]
fn test_eviction_prefers_non_flight_logs() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut opt = RecorderOptions::new(dir.path());
    opt.max_log_count = 3;
    let mut frontend = new_frontend(opt);

    // Sessions: takeoff, ground, ground; each open rotates the previous
    session(&mut frontend, true);
    session(&mut frontend, false);
    session(&mut frontend, false);
    // Fourth open trips the count limit with siblings log-1 and log-2
    frontend.open().unwrap();
    frontend.close(CloseReason::Exiting);

    let files = log_files(dir.path());
    // The ground log went first even though the flight log is older
    assert!(files.contains(&"log-1.bin".to_string()), "{:?}", files);
    assert!(!files.contains(&"log-2.bin".to_string()), "{:?}", files);
    assert!(files.contains(&"log-3.bin".to_string()), "{:?}", files);

    let header = read_log_header(dir.path().join("log-1.bin")).unwrap();
    assert_eq!(header.get("takeoff"), Some("1"));
}

struct SharedIdx(Rc<RefCell<u32>>);

impl LogIdxManager for SharedIdx {
    fn get_index(&self) -> u32 {
        *self.0.borrow()
    }

    fn set_index(&mut self, index: u32) {
        *self.0.borrow_mut() = index;
    }

    fn index_str(&self) -> String {
        self.0.borrow().to_string()
    }
}

#[test]
fn test_lifetime_index_floor() {
    let dir = tempfile::TempDir::new().unwrap();
    let idx = Rc::new(RefCell::new(7u32));

    let mut opt = RecorderOptions::new(dir.path());
    opt.log_idx_manager = Some(Box::new(SharedIdx(idx.clone())));
    let mut frontend = new_frontend(opt);

    session(&mut frontend, false);
    session(&mut frontend, false);

    // The rotated file index is strictly above the persisted counter;
    // the counter itself catches up from the sibling scan of the next
    // session
    let files = log_files(dir.path());
    assert!(files.contains(&"log-8.bin".to_string()), "{:?}", files);
    assert_eq!(*idx.borrow(), 7);

    let header = read_log_header(dir.path().join("log.bin")).unwrap();
    assert_eq!(header.get("lifetime.index"), Some("7"));

    session(&mut frontend, false);
    assert_eq!(*idx.borrow(), 8);
}

struct BootProps;

impl PropertyStore for BootProps {
    fn get(&self, key: &str) -> String {
        match key {
            "ro.boot.uuid" => "ab12cd34ef56".to_string(),
            _ => String::new(),
        }
    }
}

#[test]
fn test_rotation_name_carries_uuid_and_date() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut opt = RecorderOptions::new(dir.path());
    opt.properties = Some(Box::new(BootProps));
    let mut frontend = new_frontend(opt);

    session(&mut frontend, false);
    session(&mut frontend, false);

    let files = log_files(dir.path());
    // log-<idx>-<uuid prefix>-<date>.bin
    assert!(
        files.iter().any(|f| f.starts_with("log-1-ab12c-")),
        "{:?}",
        files
    );
}

#[test]
fn test_eviction_frees_requested_size() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut frontend = new_frontend(RecorderOptions::new(dir.path()));

    session(&mut frontend, false);
    session(&mut frontend, false);
    session(&mut frontend, false);
    drop(frontend);

    // Ask the backend directly to reclaim more than one sibling's worth
    let sibling_size = std::fs::metadata(dir.path().join("log-1.bin")).unwrap().len();
    let mut backend = FileBackend::new(dir.path());
    use flightlog::storage::LogBackend;
    backend.rotate(sibling_size + 1, 0);

    let files = log_files(dir.path());
    assert!(!files.contains(&"log-1.bin".to_string()), "{:?}", files);
    assert!(!files.contains(&"log-2.bin".to_string()), "{:?}", files);
    assert!(files.contains(&"log-3.bin".to_string()), "{:?}", files);
}
