//! Content writes for KvEngine.
//!
//! Handles: insert, upsert, replace, append, prepend, counter

use super::state::{live, KeyState, Stored};
use super::{check_cas, not_found, KvEngine};
use crate::config::CounterFloor;
use crate::document::{validate_key, Document};
use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use tracing::debug;

enum Splice {
    Append,
    Prepend,
}

impl KvEngine {
    /// Create a document; fails if a live document already holds the key.
    pub fn insert(&self, doc: &Document) -> Result<Document> {
        let key = doc.id();
        validate_key(key)?;
        let mut shard = self.shard(key);
        let now = self.now();

        if live(&mut shard, key, now).is_some() {
            return Err(Error::DocumentAlreadyExists {
                key: key.to_string(),
            });
        }
        let value = Stored::new(doc.content().clone(), self.next_cas(), doc.expiry(), now);
        let stored = self.commit(&mut shard, key, value);
        debug!(key, cas = stored.cas(), "insert");
        Ok(stored)
    }

    /// Create or overwrite. A non-zero cas turns this into a conditional replace.
    pub fn upsert(&self, doc: &Document) -> Result<Document> {
        if doc.cas() != 0 {
            return self.replace(doc);
        }
        let key = doc.id();
        validate_key(key)?;
        let mut shard = self.shard(key);
        let now = self.now();

        if let Some(state) = live(&mut shard, key, now) {
            check_cas(key, state, 0)?;
        }
        let value = Stored::new(doc.content().clone(), self.next_cas(), doc.expiry(), now);
        let stored = self.commit(&mut shard, key, value);
        debug!(key, cas = stored.cas(), "upsert");
        Ok(stored)
    }

    /// Overwrite an existing document, checking cas when one is given.
    pub fn replace(&self, doc: &Document) -> Result<Document> {
        let key = doc.id();
        validate_key(key)?;
        let mut shard = self.shard(key);
        let now = self.now();

        let state = live(&mut shard, key, now).ok_or_else(|| not_found(key))?;
        check_cas(key, state, doc.cas())?;
        let value = Stored::new(doc.content().clone(), self.next_cas(), doc.expiry(), now);
        let stored = self.commit(&mut shard, key, value);
        debug!(key, cas = stored.cas(), "replace");
        Ok(stored)
    }

    pub fn append(&self, doc: &Document) -> Result<Document> {
        self.splice(doc, Splice::Append)
    }

    pub fn prepend(&self, doc: &Document) -> Result<Document> {
        self.splice(doc, Splice::Prepend)
    }

    fn splice(&self, doc: &Document, side: Splice) -> Result<Document> {
        let key = doc.id();
        validate_key(key)?;
        let mut shard = self.shard(key);
        let now = self.now();

        let state = live(&mut shard, key, now).ok_or_else(|| not_found(key))?;
        check_cas(key, state, doc.cas())?;

        let current = state.value();
        let mut content = BytesMut::with_capacity(current.content.len() + doc.content().len());
        match side {
            Splice::Append => {
                content.extend_from_slice(&current.content);
                content.extend_from_slice(doc.content());
            }
            Splice::Prepend => {
                content.extend_from_slice(doc.content());
                content.extend_from_slice(&current.content);
            }
        }
        // Postcondition: nothing lost or invented while splicing
        debug_assert_eq!(
            content.len(),
            current.content.len() + doc.content().len(),
            "Postcondition violated: spliced length on '{}'",
            key
        );
        // Splicing keeps the stored expiry.
        let value = Stored {
            content: content.freeze(),
            cas: self.next_cas(),
            expiry: current.expiry,
            expires_at: current.expires_at,
        };
        let stored = self.commit(&mut shard, key, value);
        debug!(key, cas = stored.cas(), "splice");
        Ok(stored)
    }

    /// Add `delta` to a decimal counter, creating it from `initial` when absent.
    ///
    /// `expiry` only applies when the counter is created.
    pub fn counter(
        &self,
        key: &str,
        delta: i64,
        initial: Option<i64>,
        expiry: u32,
    ) -> Result<Document> {
        validate_key(key)?;
        let floor = self.config().counter_floor;
        let mut shard = self.shard(key);
        let now = self.now();

        let value = match live(&mut shard, key, now) {
            None => {
                let initial = initial.ok_or_else(|| not_found(key))?;
                if floor == CounterFloor::Zero && initial < 0 {
                    return Err(Error::invalid(format!(
                        "counter {} cannot start below zero",
                        key
                    )));
                }
                Stored::new(counter_bytes(initial), self.next_cas(), expiry, now)
            }
            Some(KeyState::Locked { .. }) => {
                return Err(Error::Locked {
                    key: key.to_string(),
                });
            }
            Some(KeyState::Present(current)) => {
                let number = parse_counter(key, &current.content)?;
                let next = number
                    .checked_add(delta)
                    .ok_or(Error::CounterOverflow {
                        key: key.to_string(),
                        current: number,
                        delta,
                    })?;
                let next = match floor {
                    CounterFloor::Zero => next.max(0),
                    CounterFloor::Unbounded => next,
                };
                debug_assert!(
                    floor == CounterFloor::Unbounded || next >= 0,
                    "Postcondition violated: counter '{}' fell below the zero floor",
                    key
                );
                Stored {
                    content: counter_bytes(next),
                    cas: self.next_cas(),
                    expiry: current.expiry,
                    expires_at: current.expires_at,
                }
            }
        };

        let stored = self.commit(&mut shard, key, value);
        debug!(key, delta, cas = stored.cas(), "counter");
        Ok(stored)
    }
}

fn counter_bytes(value: i64) -> Bytes {
    Bytes::from(value.to_string())
}

fn parse_counter(key: &str, content: &[u8]) -> Result<i64> {
    std::str::from_utf8(content)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| Error::NotNumeric {
            key: key.to_string(),
        })
}
