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

//! # In-Memory Table
//!
//! An in-process [Table] with the semantics of a single DynamoDB table keyed on
//! (`namespace`, `key`): consistent reads, conditional puts, paged queries & scans, projection of
//! key attributes, and `BatchWriteItem`'s limits (no more than 25 requests, no duplicate keys).
//!
//! It also lets tests inject the failures a real table would only produce under duress: a table
//! that's unreachable, one whose batch writes start failing part-way through an operation, and one
//! whose calls never complete.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use snafu::Snafu;

use crate::{
    attrs,
    batch::MAX_BATCH_SIZE,
    schema::{self, Item},
    table::{self, Page, PutCondition, PutOutcome, Query, Table, WriteRequest},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Provided list of item keys contains duplicates"))]
    DuplicateKeys,
    #[snafu(display("Injected failure in {operation}"))]
    Injected { operation: &'static str },
    #[snafu(display("Record is missing its {attr} attribute"))]
    MissingKey { attr: &'static str },
    #[snafu(display("Too many items requested for the BatchWriteItem call: {count}"))]
    TooManyRequests { count: usize },
}

type Key = (String, String);

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<Key, Item>,
    unavailable: bool,
    stalled: bool,
    /// `Some(n)`: accept `n` more batches, then fail every one after
    batches_until_failure: Option<usize>,
    batch_sizes: Vec<usize>,
}

#[derive(Debug)]
pub struct InMemoryTable {
    name: String,
    page_size: usize,
    state: Mutex<State>,
}

fn key_of(item: &Item) -> table::Result<Key> {
    let (namespace, key) = schema::namespace_and_key(item);
    if namespace.is_empty() {
        return Err(table::Error::new(
            MissingKeySnafu {
                attr: schema::PARTITION_KEY,
            }
            .build(),
        ));
    }
    if key.is_empty() {
        return Err(table::Error::new(
            MissingKeySnafu {
                attr: schema::SORT_KEY,
            }
            .build(),
        ));
    }
    Ok((namespace, key))
}

fn project_keys(item: &Item) -> Item {
    item.iter()
        .filter(|(name, _)| name.as_str() == schema::PARTITION_KEY || name.as_str() == schema::SORT_KEY)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

impl InMemoryTable {
    pub fn new(name: impl Into<String>) -> InMemoryTable {
        InMemoryTable {
            name: name.into(),
            page_size: 100,
            state: Mutex::new(State::default()),
        }
    }
    /// Return at most `page_size` records per query or scan page
    pub fn with_page_size(mut self, page_size: usize) -> InMemoryTable {
        self.page_size = page_size.max(1);
        self
    }
    /// Make every subsequent call fail (or succeed again)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }
    /// Make every subsequent call hang forever (or not)
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }
    /// Accept `n` more `BatchWriteItem` calls, then fail the rest
    pub fn fail_batches_after(&self, n: usize) {
        self.state().batches_until_failure = Some(n);
    }
    /// The sizes of all the batches accepted so far, in order
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state().batch_sizes.clone()
    }
    pub fn len(&self) -> usize {
        self.state().records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The raw record at `namespace`/`key`, if any
    pub fn raw_item(&self, namespace: &str, key: &str) -> Option<Item> {
        self.state()
            .records
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }
    /// Store `item` unconditionally, bypassing any validation of its non-key attributes
    pub fn put_raw(&self, item: Item) -> table::Result<()> {
        let key = key_of(&item)?;
        self.state().records.insert(key, item);
        Ok(())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock can only come from a failed test assertion
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
    async fn enter(&self, operation: &'static str) -> table::Result<()> {
        let (unavailable, stalled) = {
            let state = self.state();
            (state.unavailable, state.stalled)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        if unavailable {
            return Err(table::Error::new(InjectedSnafu { operation }.build()));
        }
        Ok(())
    }
    fn page<'a>(
        &self,
        records: impl Iterator<Item = (&'a Key, &'a Item)>,
        exclusive_start_key: Option<Item>,
        keys_only: bool,
    ) -> Page {
        let start = exclusive_start_key.map(|k| schema::namespace_and_key(&k));
        let mut remaining = records
            .filter(|(k, _)| match &start {
                Some(start) => *k > start,
                None => true,
            })
            .peekable();
        let mut items = Vec::new();
        let mut last = None;
        while items.len() < self.page_size {
            match remaining.next() {
                Some((k, item)) => {
                    items.push(if keys_only {
                        project_keys(item)
                    } else {
                        item.clone()
                    });
                    last = Some(k);
                }
                None => break,
            }
        }
        let last_evaluated_key = match (remaining.peek(), last) {
            (Some(_), Some((namespace, key))) => Some(schema::key(namespace, key)),
            _ => None,
        };
        Page {
            items,
            last_evaluated_key,
        }
    }
}

#[async_trait]
impl Table for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }
    async fn get_item(&self, key: Item) -> table::Result<Option<Item>> {
        self.enter("GetItem").await?;
        let key = key_of(&key)?;
        Ok(self.state().records.get(&key).cloned())
    }
    async fn query(&self, query: &Query, exclusive_start_key: Option<Item>) -> table::Result<Page> {
        self.enter("Query").await?;
        let state = self.state();
        Ok(self.page(
            state
                .records
                .iter()
                .filter(|((namespace, _), _)| *namespace == query.namespace),
            exclusive_start_key,
            query.keys_only,
        ))
    }
    async fn scan_keys(&self, exclusive_start_key: Option<Item>) -> table::Result<Page> {
        self.enter("Scan").await?;
        let state = self.state();
        Ok(self.page(state.records.iter(), exclusive_start_key, true))
    }
    async fn put_item(&self, item: Item, condition: PutCondition) -> table::Result<PutOutcome> {
        self.enter("PutItem").await?;
        let key = key_of(&item)?;
        let mut state = self.state();
        if let PutCondition::NewerVersion(version) = condition {
            if let Some(existing) = state.records.get(&key) {
                if attrs::to_int(existing.get(schema::VERSION_ATTR)) >= version {
                    return Ok(PutOutcome::ConditionFailed);
                }
            }
        }
        state.records.insert(key, item);
        Ok(PutOutcome::Written)
    }
    async fn batch_write_item(&self, requests: Vec<WriteRequest>) -> table::Result<()> {
        self.enter("BatchWriteItem").await?;
        if requests.len() > MAX_BATCH_SIZE {
            return Err(table::Error::new(
                TooManyRequestsSnafu {
                    count: requests.len(),
                }
                .build(),
            ));
        }
        let keyed = requests
            .into_iter()
            .map(|request| match &request {
                WriteRequest::Put(item) | WriteRequest::Delete(item) => {
                    key_of(item).map(|key| (key, request))
                }
            })
            .collect::<table::Result<Vec<(Key, WriteRequest)>>>()?;
        if keyed.iter().map(|(key, _)| key).collect::<HashSet<_>>().len() != keyed.len() {
            return Err(table::Error::new(DuplicateKeysSnafu.build()));
        }

        let mut state = self.state();
        match state.batches_until_failure {
            Some(0) => {
                return Err(table::Error::new(
                    InjectedSnafu {
                        operation: "BatchWriteItem",
                    }
                    .build(),
                ))
            }
            Some(n) => state.batches_until_failure = Some(n - 1),
            None => (),
        }
        state.batch_sizes.push(keyed.len());
        for (key, request) in keyed {
            match request {
                WriteRequest::Put(item) => {
                    state.records.insert(key, item);
                }
                WriteRequest::Delete(_) => {
                    state.records.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use futures::TryStreamExt;

    use crate::{storage::SerializedItemDescriptor, table::paginate};

    fn record(namespace: &str, key: &str, version: i64) -> Item {
        schema::encode_item(
            namespace,
            key,
            &SerializedItemDescriptor::new(version, format!("{{\"version\":{}}}", version)),
        )
    }

    #[tokio::test]
    async fn conditional_puts() {
        let table = InMemoryTable::new("test");
        let put = |v| table.put_item(record("features", "flag1", v), PutCondition::NewerVersion(v));
        assert_eq!(put(2).await.unwrap(), PutOutcome::Written);
        assert_eq!(put(2).await.unwrap(), PutOutcome::ConditionFailed);
        assert_eq!(put(1).await.unwrap(), PutOutcome::ConditionFailed);
        assert_eq!(put(3).await.unwrap(), PutOutcome::Written);
        let stored = table.raw_item("features", "flag1").unwrap();
        assert_eq!(attrs::to_int(stored.get(schema::VERSION_ATTR)), 3);
        // Unconditional puts always land
        table
            .put_item(record("features", "flag1", 1), PutCondition::Always)
            .await
            .unwrap();
        let stored = table.raw_item("features", "flag1").unwrap();
        assert_eq!(attrs::to_int(stored.get(schema::VERSION_ATTR)), 1);
    }

    #[tokio::test]
    async fn paged_queries() {
        let table = InMemoryTable::new("test").with_page_size(3);
        for i in 0..8 {
            table
                .put_item(record("features", &format!("flag{}", i), 1), PutCondition::Always)
                .await
                .unwrap();
        }
        table
            .put_item(record("segments", "seg1", 1), PutCondition::Always)
            .await
            .unwrap();

        let query = Query::keys("features");
        let pages = paginate(|start| table.query(&query, start))
            .try_collect::<Vec<Page>>()
            .await
            .unwrap();
        assert_eq!(
            pages.iter().map(|p| p.items.len()).collect::<Vec<_>>(),
            vec![3, 3, 2]
        );
        // Projection
        assert!(pages
            .iter()
            .flat_map(|p| p.items.iter())
            .all(|item| item.len() == 2));

        let pages = paginate(|start| table.scan_keys(start))
            .try_collect::<Vec<Page>>()
            .await
            .unwrap();
        assert_eq!(pages.iter().map(|p| p.items.len()).sum::<usize>(), 9);
    }

    #[tokio::test]
    async fn batch_limits() {
        let table = InMemoryTable::new("test");
        let too_many = (0..26)
            .map(|i| WriteRequest::Put(record("features", &format!("flag{}", i), 1)))
            .collect::<Vec<_>>();
        assert!(table.batch_write_item(too_many).await.is_err());
        let dupes = vec![
            WriteRequest::Put(record("features", "flag1", 1)),
            WriteRequest::Delete(schema::key("features", "flag1")),
        ];
        assert!(table.batch_write_item(dupes).await.is_err());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn unavailable() {
        let table = InMemoryTable::new("test");
        table.set_unavailable(true);
        assert!(table.get_item(schema::key("a", "b")).await.is_err());
        table.set_unavailable(false);
        assert!(table.get_item(schema::key("a", "b")).await.unwrap().is_none());
    }
}
