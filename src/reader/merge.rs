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

// Time-aligned view over telemetry sources.
//
// A view selects columns of one source into timestamp-indexed rows;
// several views merge by joining every other source onto the
// highest-frequency one with a nearest-neighbor rule.

use std::collections::BTreeMap;

use super::data::{DataSetDesc, TelemetryDataSource};

pub struct TlmView {
    descs: Vec<DataSetDesc>,
    data: BTreeMap<i64, Vec<f64>>,
    sample_count: usize,
}

impl TlmView {
    /// Project the wanted data sets of `source` into rows indexed by
    /// sample timestamp. Row values are laid out data set by data set,
    /// in the source's declaration order.
    pub fn from_source(source: &TelemetryDataSource, wanted: &[&str]) -> Self {
        let mut descs = Vec::new();
        let mut data: BTreeMap<i64, Vec<f64>> = BTreeMap::new();

        for desc in source.descs() {
            if !wanted.contains(&desc.name.as_str()) {
                continue;
            }
            let Some(set) = source.data_set(&desc.name) else {
                continue;
            };
            descs.push(desc.clone());

            for sample_idx in 0..source.sample_count() {
                for item_idx in 0..desc.item_count {
                    let sample = set.sample(sample_idx, item_idx);
                    data.entry(sample.timestamp).or_default().push(sample.value);
                }
            }
        }

        Self {
            descs,
            data,
            sample_count: source.sample_count(),
        }
    }

    /// Merge several views into one, using the view with the most
    /// samples as the timeline. For every timeline timestamp the other
    /// views contribute their nearest row, ties breaking toward the
    /// earlier sample; a view that runs out keeps contributing its last
    /// row.
    pub fn merge(views: &[TlmView]) -> Self {
        let views: Vec<&TlmView> = views.iter().filter(|v| !v.data.is_empty()).collect();
        if views.is_empty() {
            return Self {
                descs: Vec::new(),
                data: BTreeMap::new(),
                sample_count: 0,
            };
        }

        // First view with the highest sample count wins ties
        let mut hf = 0;
        for (i, view) in views.iter().enumerate() {
            if view.sample_count > views[hf].sample_count {
                hf = i;
            }
        }

        // Column order: timeline view first, then the others in input
        // order, matching the row layout built below.
        let mut descs = views[hf].descs.clone();
        for (i, view) in views.iter().enumerate() {
            if i != hf {
                descs.extend(view.descs.iter().cloned());
            }
        }

        let others: Vec<(Vec<i64>, Vec<&Vec<f64>>)> = views
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != hf)
            .map(|(_, v)| {
                (
                    v.data.keys().copied().collect(),
                    v.data.values().collect(),
                )
            })
            .collect();
        let mut cursors = vec![0usize; others.len()];

        let mut data = BTreeMap::new();
        for (&cur, hf_row) in &views[hf].data {
            let mut row = hf_row.clone();

            for (k, (timestamps, rows)) in others.iter().enumerate() {
                let prev = &mut cursors[k];
                while *prev + 1 < timestamps.len()
                    && (cur - timestamps[*prev]).abs() > (cur - timestamps[*prev + 1]).abs()
                {
                    *prev += 1;
                }
                row.extend_from_slice(rows[*prev]);
            }

            data.insert(cur, row);
        }

        let sample_count = data.len();
        Self {
            descs,
            data,
            sample_count,
        }
    }

    pub fn descs(&self) -> &[DataSetDesc] {
        &self.descs
    }

    pub fn data(&self) -> &BTreeMap<i64, Vec<f64>> {
        &self.data
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Timestamp of the first row.
    pub fn start_ts(&self) -> Option<i64> {
        self.data.keys().next().copied()
    }
}
