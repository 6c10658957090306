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

// Sealed encryption of compressed blocks.
//
// Each encrypted file carries a single AES_DESC entry up front with three
// u32-length-prefixed fields: the SHA-256 of the recipient public key in
// SPKI DER form, the RSA-sealed AES-256 content key, and the CBC IV. The
// content key and IV are regenerated for every file. Block padding is
// PKCS#7, applied by the caller so that ciphertext lengths stay an exact
// multiple of the AES block size, and the CBC state chains across all
// AES entries of one file.

use std::path::Path;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::format::{EntryHeader, AES_BLOCK_SIZE, ID_AES_DESC};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// Per-file seal state: the AES_DESC entry to emit once, and the chained
/// CBC cipher used for every subsequent flush.
pub struct SealContext {
    desc_entry: Vec<u8>,
    cipher: Aes256CbcEnc,
}

impl SealContext {
    /// Load the recipient public key and set up a fresh content key.
    pub fn create<P: AsRef<Path>>(pub_key_path: P) -> Result<Self> {
        let pem = std::fs::read_to_string(pub_key_path.as_ref()).with_context(|| {
            format!(
                "Failed to read public key '{}'",
                pub_key_path.as_ref().display()
            )
        })?;
        let pub_key = RsaPublicKey::from_public_key_pem(&pem).with_context(|| {
            format!(
                "Failed to load public key '{}'",
                pub_key_path.as_ref().display()
            )
        })?;

        // Key identifier: sha256 of the ASN.1 DER form of the public key
        let der = pub_key
            .to_public_key_der()
            .context("Failed to convert public key")?;
        let key_hash = Sha256::digest(der.as_bytes());

        let mut content_key = [0u8; 32];
        OsRng.fill_bytes(&mut content_key);
        let mut iv = [0u8; AES_BLOCK_SIZE];
        OsRng.fill_bytes(&mut iv);

        let sealed_key = pub_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &content_key)
            .context("Failed to seal content key")?;

        let desc_entry = build_desc_entry(&key_hash, &sealed_key, &iv);
        let cipher = Aes256CbcEnc::new(&content_key.into(), &iv.into());

        Ok(Self { desc_entry, cipher })
    }

    /// The AES_DESC entry, written uncompressed at session start.
    pub fn desc_entry(&self) -> &[u8] {
        &self.desc_entry
    }

    /// PKCS#7-pad `buf` to a whole number of AES blocks, then encrypt it
    /// in place with the chained CBC state.
    pub fn seal_in_place(&mut self, buf: &mut Vec<u8>) {
        let rem = buf.len() % AES_BLOCK_SIZE;
        let pad = if rem == 0 {
            AES_BLOCK_SIZE
        } else {
            AES_BLOCK_SIZE - rem
        };
        buf.resize(buf.len() + pad, pad as u8);

        for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}

fn build_desc_entry(key_hash: &[u8], sealed_key: &[u8], iv: &[u8]) -> Vec<u8> {
    let payload_len = 3 * 4 + key_hash.len() + sealed_key.len() + iv.len();
    let mut out = Vec::with_capacity(crate::format::ENTRY_HEADER_SIZE + payload_len);
    out.extend_from_slice(&EntryHeader::new(ID_AES_DESC, payload_len as u32).to_bytes());
    for field in [key_hash, sealed_key, iv] {
        out.extend_from_slice(&(field.len() as u32).to_le_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// Key material decoded from an AES_DESC entry payload.
#[derive(Debug, Clone)]
pub struct SealDesc {
    pub key_hash: Vec<u8>,
    pub sealed_key: Vec<u8>,
    pub iv: Vec<u8>,
}

impl SealDesc {
    pub fn decode(payload: &[u8]) -> crate::format::Result<Self> {
        let mut reader = crate::format::ByteReader::new(payload);
        let mut fields = Vec::with_capacity(3);
        for _ in 0..3 {
            let len = reader.read_u32()? as usize;
            fields.push(reader.read_bytes(len)?.to_vec());
        }
        let iv = fields.pop().unwrap_or_default();
        let sealed_key = fields.pop().unwrap_or_default();
        let key_hash = fields.pop().unwrap_or_default();
        Ok(Self {
            key_hash,
            sealed_key,
            iv,
        })
    }
}
