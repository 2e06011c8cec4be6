// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of ddbstore.
//
// ddbstore is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// ddbstore is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with ddbstore.  If not,
// see <http://www.gnu.org/licenses/>.

//! # storage
//!
//! The two contracts through which a feature-flag evaluation engine consumes this crate: a
//! general [PersistentDataStore] (arbitrary collections of versioned, serialized items) and a
//! read-only [BigSegmentStore].
//!
//! Both traits are object-safe, so a host can hold an `Arc<dyn PersistentDataStore + Send + Sync>`
//! without caring which backend sits underneath.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug)]
pub struct Error {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error {
            source: Box::new(err),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        data store types                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A named collection of items ("features", "segments", ...)
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct DataKind {
    name: String,
}

impl DataKind {
    pub fn new(name: impl Into<String>) -> DataKind {
        DataKind { name: name.into() }
    }
    pub fn features() -> DataKind {
        DataKind::new("features")
    }
    pub fn segments() -> DataKind {
        DataKind::new("segments")
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A versioned item, serialized by the host.
///
/// We never look inside `serialized_item`; deletions, in particular, are represented by the host as
/// a serialized "deleted" placeholder carrying a newer version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SerializedItemDescriptor {
    pub version: i64,
    pub serialized_item: Vec<u8>,
}

impl SerializedItemDescriptor {
    pub fn new(version: i64, serialized_item: impl Into<Vec<u8>>) -> SerializedItemDescriptor {
        SerializedItemDescriptor {
            version,
            serialized_item: serialized_item.into(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyedSerializedItemDescriptor {
    pub key: String,
    pub item: SerializedItemDescriptor,
}

impl KeyedSerializedItemDescriptor {
    pub fn new(key: impl Into<String>, item: SerializedItemDescriptor) -> Self {
        KeyedSerializedItemDescriptor {
            key: key.into(),
            item,
        }
    }
}

/// All the items of one [DataKind]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SerializedCollection {
    pub kind: DataKind,
    pub items: Vec<KeyedSerializedItemDescriptor>,
}

#[async_trait]
pub trait PersistentDataStore {
    /// Replace the entire data set with `all_data`.
    ///
    /// This is not atomic: readers may observe a partially-written data set, and a failure part-way
    /// through leaves whatever was already written in place.
    async fn init(&self, all_data: &[SerializedCollection]) -> Result<(), Error>;
    /// Retrieve a single item; `None` means there's no such item.
    async fn get(
        &self,
        kind: &DataKind,
        key: &str,
    ) -> Result<Option<SerializedItemDescriptor>, Error>;
    /// Retrieve every item of the given kind.
    async fn get_all(&self, kind: &DataKind) -> Result<Vec<KeyedSerializedItemDescriptor>, Error>;
    /// Write `item` if there's no item at `kind`/`key` or if the existing item has a lower version;
    /// return true if the write took place, false if it was declined.
    async fn upsert(
        &self,
        kind: &DataKind,
        key: &str,
        item: &SerializedItemDescriptor,
    ) -> Result<bool, Error>;
    /// True if `init` has completed at least once against this store. Failures read as `false`.
    async fn is_initialized(&self) -> bool;
    /// Best-effort connectivity probe
    async fn is_store_available(&self) -> bool;
    /// Cancel any in-flight operations; subsequent operations will fail.
    async fn close(&self) -> Result<(), Error>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      Big Segment types                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The state of the externally-synchronized Big Segment data
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct BigSegmentStoreMetadata {
    /// Milliseconds since the Unix epoch at which the synchronizer last brought the data
    /// up-to-date; zero means "never"
    #[serde(rename = "lastUpToDate")]
    pub last_up_to_date: u64,
}

/// The Big Segment memberships of one context
///
/// [Default] is the explicit "looked it up, found nothing" result.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct BigSegmentMembership {
    included: HashSet<String>,
    excluded: HashSet<String>,
}

impl BigSegmentMembership {
    pub fn from_segment_refs<I, E>(included: I, excluded: E) -> BigSegmentMembership
    where
        I: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
    {
        BigSegmentMembership {
            included: included.into_iter().collect(),
            excluded: excluded.into_iter().collect(),
        }
    }
    /// `Some(true)` if the context is included in `segment_ref`, `Some(false)` if it's excluded,
    /// `None` if there's no membership data for that segment. Inclusion wins if a ref somehow
    /// appears in both sets.
    pub fn check_membership(&self, segment_ref: &str) -> Option<bool> {
        if self.included.contains(segment_ref) {
            Some(true)
        } else if self.excluded.contains(segment_ref) {
            Some(false)
        } else {
            None
        }
    }
    pub fn included(&self) -> &HashSet<String> {
        &self.included
    }
    pub fn excluded(&self) -> &HashSet<String> {
        &self.excluded
    }
    pub fn is_empty(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty()
    }
}

#[async_trait]
pub trait BigSegmentStore {
    /// Absence of the metadata record is reported as a zero watermark, not an error.
    async fn get_metadata(&self) -> Result<BigSegmentStoreMetadata, Error>;
    /// Absence of a membership record is reported as an empty membership, not an error.
    async fn get_membership(&self, context_hash_key: &str) -> Result<BigSegmentMembership, Error>;
    async fn close(&self) -> Result<(), Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn membership() {
        let m = BigSegmentMembership::from_segment_refs(
            vec!["seg1".to_string(), "both".to_string()],
            vec!["seg2".to_string(), "both".to_string()],
        );
        assert_eq!(m.check_membership("seg1"), Some(true));
        assert_eq!(m.check_membership("seg2"), Some(false));
        assert_eq!(m.check_membership("both"), Some(true));
        assert_eq!(m.check_membership("seg3"), None);
        assert!(!m.is_empty());
        assert!(BigSegmentMembership::default().is_empty());
    }
}
