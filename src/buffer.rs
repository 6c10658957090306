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

// Write-side accumulation buffer.
//
// Sources write entries directly into the buffer's tail. Once the
// committed size crosses the flush threshold, the whole region is
// compressed as a single LZ4 frame wrapped in an LZ4 entry and, when a
// seal context is installed, padded and encrypted into an AES entry.

use std::io::Write;

use anyhow::Result;
use lz4_flex::frame::{FrameEncoder, FrameInfo};
use tracing::{debug, error, warn};

use crate::crypto::SealContext;
use crate::format::{EntryHeader, ENTRY_HEADER_SIZE, ID_AES, ID_LZ4};
use crate::frontend::LogFrontend;

/// Staging area between the sources and the frontend: a contiguous
/// scratch region sources write into, and the compression/encryption
/// pipeline draining it.
pub struct LogBuffer {
    write_buffer: Vec<u8>,
    flush_threshold: usize,
    used: usize,
    seal: Option<SealContext>,
}

impl LogBuffer {
    /// `flush_threshold` is the committed size that triggers compression;
    /// `min_space` is the contiguous room still guaranteed to a source
    /// polled right below the threshold.
    pub fn new(flush_threshold: usize, min_space: usize) -> Self {
        Self {
            write_buffer: vec![0u8; flush_threshold + min_space],
            flush_threshold,
            used: 0,
            seal: None,
        }
    }

    /// Writable tail of the buffer.
    pub fn write_head(&mut self) -> &mut [u8] {
        &mut self.write_buffer[self.used..]
    }

    pub fn write_space(&self) -> usize {
        self.write_buffer.len() - self.used
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Commit `size` bytes produced at the write head, flushing when the
    /// threshold is reached.
    pub fn push(&mut self, size: usize, frontend: &mut LogFrontend) {
        if size > self.write_space() {
            error!(
                "cannot push {} bytes, buffer only has {} bytes left",
                size,
                self.write_space()
            );
            return;
        }
        debug!("pushed {} bytes", size);
        self.used += size;
        if self.used >= self.flush_threshold {
            self.flush(frontend);
        }
    }

    /// Compress and hand the pending region to the frontend. No-op when
    /// nothing is pending.
    pub fn flush(&mut self, frontend: &mut LogFrontend) {
        if self.used == 0 {
            return;
        }

        let pending = self.used;
        self.used = 0;

        let frame = match compress_frame(&self.write_buffer[..pending]) {
            Ok(frame) => frame,
            Err(err) => {
                error!("lz4 frame compression of {} bytes failed: {}", pending, err);
                return;
            }
        };

        let mut block = Vec::with_capacity(ENTRY_HEADER_SIZE + frame.len() + 16);
        block.extend_from_slice(&EntryHeader::new(ID_LZ4, frame.len() as u32).to_bytes());
        block.extend_from_slice(&frame);

        match &mut self.seal {
            None => frontend.write(&block, false),
            Some(seal) => {
                seal.seal_in_place(&mut block);
                let mut entry = Vec::with_capacity(ENTRY_HEADER_SIZE + block.len());
                entry.extend_from_slice(
                    &EntryHeader::new(ID_AES, block.len() as u32).to_bytes(),
                );
                entry.extend_from_slice(&block);
                frontend.write(&entry, false);
            }
        }
    }

    /// Discard uncommitted bytes and destroy the cipher context. The
    /// next session must re-enable encryption before any write.
    pub fn reset(&mut self) {
        if self.used > 0 {
            warn!("dropping {} uncommitted bytes", self.used);
        }
        self.used = 0;
        self.seal = None;
    }

    pub fn is_encrypted(&self) -> bool {
        self.seal.is_some()
    }

    /// Install a fresh per-file seal context and emit its AES_DESC entry
    /// uncompressed through the frontend.
    pub fn enable_encryption(
        &mut self,
        pub_key_path: &std::path::Path,
        frontend: &mut LogFrontend,
    ) -> Result<()> {
        let seal = SealContext::create(pub_key_path)?;
        frontend.write(seal.desc_entry(), false);
        self.seal = Some(seal);
        Ok(())
    }
}

/// Compress `data` as one self-contained LZ4 frame with content checksum.
fn compress_frame(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let info = FrameInfo::new().content_checksum(true);
    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    let mut encoder = FrameEncoder::with_frame_info(info, &mut out);
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(out)
}

/// Decompress one LZ4 frame. Exposed for the read side.
pub fn decompress_frame(data: &[u8]) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let mut decoder = lz4_flex::frame::FrameDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let data: Vec<u8> = b"telemetry sample ".repeat(64);
        let frame = compress_frame(&data).unwrap();
        assert!(frame.len() < data.len());
        assert_eq!(decompress_frame(&frame).unwrap(), data);
    }

    #[test]
    fn test_frame_rejects_garbage() {
        assert!(decompress_frame(&[0u8; 32]).is_err());
    }
}
