//! Binary envelope layer
//!
//! Wraps any entry store and frames values in a magic-prefixed,
//! length-prefixed binary envelope on write. Reads detect the envelope
//! and unwrap it; any other shape is returned untouched, which keeps
//! historical un-enveloped data readable. The layer preserves the
//! `EntryStore` contract exactly.

use crate::store::{EntryRef, EntryStore};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snapkv_common::Result;
use std::collections::HashMap;

/// First bytes of every enveloped value.
const MAGIC: &[u8; 4] = b"SKV\x01";

/// Payload flags. Only `RAW` is produced today; the field keeps the
/// frame open for compressed payloads.
const FLAG_RAW: u8 = 0;

#[derive(Serialize, Deserialize)]
struct Envelope {
    flags: u8,
    payload: Vec<u8>,
}

fn encode(value: &[u8]) -> Bytes {
    let envelope = Envelope {
        flags: FLAG_RAW,
        payload: value.to_vec(),
    };
    let mut framed = MAGIC.to_vec();
    // Vec<u8> serializes as a length-prefixed byte run
    framed.extend(bincode::serialize(&envelope).unwrap_or_default());
    Bytes::from(framed)
}

fn decode(value: Bytes) -> Bytes {
    if !value.starts_with(MAGIC) {
        return value;
    }
    match bincode::deserialize::<Envelope>(&value[MAGIC.len()..]) {
        Ok(envelope) if envelope.flags == FLAG_RAW => Bytes::from(envelope.payload),
        // unknown flags or a value that merely resembles a frame
        _ => value,
    }
}

/// Transparent enveloping wrapper around any entry store
pub struct EnvelopeStore<S> {
    inner: S,
}

impl<S> EnvelopeStore<S> {
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: EntryStore> EntryStore for EnvelopeStore<S> {
    async fn put_one(&self, key: EntryRef, value: Bytes) -> Result<()> {
        self.inner.put_one(key, encode(&value)).await
    }

    async fn get_one(&self, key: &EntryRef) -> Result<Option<Bytes>> {
        Ok(self.inner.get_one(key).await?.map(decode))
    }

    async fn put_many(&self, entries: Vec<(EntryRef, Bytes)>) -> Result<()> {
        let encoded = entries
            .into_iter()
            .map(|(key, value)| (key, encode(&value)))
            .collect();
        self.inner.put_many(encoded).await
    }

    async fn get_many(&self, keys: Vec<EntryRef>) -> Result<HashMap<EntryRef, Option<Bytes>>> {
        let raw = self.inner.get_many(keys).await?;
        Ok(raw
            .into_iter()
            .map(|(key, value)| (key, value.map(decode)))
            .collect())
    }
}
