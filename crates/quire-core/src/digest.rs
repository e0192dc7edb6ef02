// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Entry digests and the packaged on-wire entry format.
//!
//! A packaged entry is laid out as:
//!
//! ```text
//! +-----------+----------+--------------------+--------+--------+---------+
//! | ledger_id | entry_id | last_add_confirmed | length | digest | payload |
//! |    u64    |   u64    |   i64 (-1 = none)  |  u64   |  8/32  |   ...   |
//! +-----------+----------+--------------------+--------+--------+---------+
//! ```
//!
//! All integers are big-endian. The digest covers the header and the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DigestError;
use crate::types::{EntryId, LedgerId};

type HmacSha256 = Hmac<Sha256>;

/// Size of the fixed header preceding the digest.
pub const HEADER_SIZE: usize = 32;

/// Digest algorithm used to protect ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestType {
    /// CRC32 checksum.
    #[default]
    Crc32,
    /// HMAC-SHA256 keyed by the ledger password.
    Mac,
}

impl DigestType {
    /// Returns the digest length in bytes.
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Crc32 => 8,
            Self::Mac => 32,
        }
    }
}

/// An entry unpacked from its on-wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedEntry {
    /// Ledger the entry belongs to.
    pub ledger_id: LedgerId,
    /// Entry id.
    pub entry_id: EntryId,
    /// Last-add-confirmed marker at the time of packaging.
    pub last_add_confirmed: Option<EntryId>,
    /// Entry payload.
    pub payload: Bytes,
}

/// Computes and verifies digests for one ledger's entries.
#[derive(Clone)]
pub struct DigestManager {
    ledger_id: LedgerId,
    digest_type: DigestType,
    mac: HmacSha256,
}

impl std::fmt::Debug for DigestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestManager")
            .field("ledger_id", &self.ledger_id)
            .field("digest_type", &self.digest_type)
            .finish_non_exhaustive()
    }
}

impl DigestManager {
    /// Creates a digest manager for `ledger_id`.
    pub fn new(ledger_id: LedgerId, digest_type: DigestType, password: &[u8]) -> Self {
        // The password hash zero-padded to the HMAC block size.
        let mut key = Key::<HmacSha256>::default();
        key[..32].copy_from_slice(&Sha256::digest(password));
        let mac = <HmacSha256 as KeyInit>::new(&key);
        Self { ledger_id, digest_type, mac }
    }

    /// Packages an entry for sending to a bookie.
    ///
    /// Identical inputs always produce identical output.
    pub fn package(
        &self,
        entry_id: EntryId,
        last_add_confirmed: Option<EntryId>,
        length: u64,
        payload: &[u8],
    ) -> Bytes {
        let mut header = BytesMut::with_capacity(HEADER_SIZE);
        header.put_u64(self.ledger_id);
        header.put_u64(entry_id);
        header.put_i64(last_add_confirmed.map_or(-1, |lac| lac as i64));
        header.put_u64(length);

        let digest = self.compute(&header, payload);

        let mut out = BytesMut::with_capacity(HEADER_SIZE + digest.len() + payload.len());
        out.put_slice(&header);
        out.put_slice(&digest);
        out.put_slice(payload);
        out.freeze()
    }

    /// Verifies a packaged entry and returns its contents.
    pub fn verify(&self, packaged: &[u8]) -> Result<PackagedEntry, DigestError> {
        let digest_len = self.digest_type.digest_len();
        if packaged.len() < HEADER_SIZE + digest_len {
            return Err(DigestError::Truncated { len: packaged.len() });
        }

        let (header, rest) = packaged.split_at(HEADER_SIZE);
        let (digest, payload) = rest.split_at(digest_len);

        let mut cursor = header;
        let ledger_id = cursor.get_u64();
        let entry_id = cursor.get_u64();
        let last_add_confirmed = cursor.get_i64();
        let length = cursor.get_u64();

        if ledger_id != self.ledger_id {
            return Err(DigestError::LedgerMismatch { expected: self.ledger_id, found: ledger_id });
        }
        if length != payload.len() as u64 {
            return Err(DigestError::LengthMismatch { expected: length, found: payload.len() as u64 });
        }
        if !self.matches(header, payload, digest) {
            return Err(DigestError::BadDigest { entry_id });
        }

        Ok(PackagedEntry {
            ledger_id,
            entry_id,
            last_add_confirmed: u64::try_from(last_add_confirmed).ok(),
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Checks `digest` against the header and payload.
    ///
    /// MACs are compared in constant time.
    fn matches(&self, header: &[u8], payload: &[u8], digest: &[u8]) -> bool {
        match self.digest_type {
            DigestType::Crc32 => self.compute(header, payload) == digest,
            DigestType::Mac => {
                let mut mac = self.mac.clone();
                mac.update(header);
                mac.update(payload);
                mac.verify_slice(digest).is_ok()
            }
        }
    }

    fn compute(&self, header: &[u8], payload: &[u8]) -> Vec<u8> {
        match self.digest_type {
            DigestType::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(header);
                hasher.update(payload);
                u64::from(hasher.finalize()).to_be_bytes().to_vec()
            }
            DigestType::Mac => {
                let mut mac = self.mac.clone();
                mac.update(header);
                mac.update(payload);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }
}
