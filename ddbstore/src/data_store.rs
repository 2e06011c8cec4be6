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

//! # data_store
//!
//! [DynamoDataStore] is the [PersistentDataStore] implementation: it owns the host's full,
//! versioned data set.
//!
//! There are no transactions here. A full reload ([init]) and single-item updates ([upsert]) are
//! independent operations that may be issued concurrently, from any number of processes, against
//! the same table; the only concurrency primitive is the conditional put in [upsert], which
//! declines to overwrite a record whose version is at least as new as the incoming one.
//!
//! [init] is therefore careful about ordering. It snapshots the keys already present in every
//! namespace it's about to replace, writes the new data, and only then deletes keys that are in
//! the snapshot but not in the new data, finally writing the "initialized" sentinel. Everything
//! goes through [batch::write_requests], which means a failure part-way through leaves the earlier
//! batches applied; there's no rollback. If an [upsert] races an [init], the worst outcome is a
//! stale key left behind, which the next write for that key will correct.
//!
//! Items too large for DynamoDB are never written. Each one is logged at error level and
//! otherwise ignored, so one oversized flag can't make the rest of the data set unusable.
//!
//! [init]: PersistentDataStore::init
//! [upsert]: PersistentDataStore::upsert

use std::{
    collections::{hash_map::Entry, BTreeSet, HashMap},
    pin::pin,
    sync::Arc,
};

use async_trait::async_trait;
use futures::{future::BoxFuture, TryStreamExt};
use snafu::{prelude::*, Backtrace};
use tracing::{debug, error, info, warn};

use crate::{
    batch,
    lifetime::{Cancelled, Lifetime},
    schema::{self, Item, Prefix},
    storage::{
        self, DataKind, KeyedSerializedItemDescriptor, PersistentDataStore, SerializedCollection,
        SerializedItemDescriptor,
    },
    table::{self, PutCondition, PutOutcome, Query, Table, WriteRequest},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Closed { source: Cancelled },
    #[snafu(display("Failed to read {namespace}/{key}: {source}"))]
    Get {
        namespace: String,
        key: String,
        source: table::Error,
    },
    #[snafu(display("The record at {namespace}/{key} is malformed"))]
    InvalidItem {
        namespace: String,
        key: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to write {namespace}/{key}: {source}"))]
    Put {
        namespace: String,
        key: String,
        source: table::Error,
    },
    #[snafu(display("Failed to query {namespace}: {source}"))]
    Query {
        namespace: String,
        source: table::Error,
    },
    #[snafu(display("Failed to write {count} request(s): {source}"))]
    WriteBatches { count: usize, source: batch::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Test hook run inside [upsert](PersistentDataStore::upsert), just before the conditional put
pub type UpdateHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A [PersistentDataStore] backed by a DynamoDB table (or anything else implementing [Table])
pub struct DynamoDataStore {
    table: Arc<dyn Table + Send + Sync>,
    prefix: Prefix,
    lifetime: Lifetime,
    update_hook: Option<UpdateHook>,
}

impl std::fmt::Debug for DynamoDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDataStore")
            .field("table", &self.table.name())
            .field("prefix", &self.prefix)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl DynamoDataStore {
    pub fn new(table: Arc<dyn Table + Send + Sync>, prefix: Prefix) -> DynamoDataStore {
        info!("Using DynamoDB table {}", table.name());
        DynamoDataStore {
            table,
            prefix,
            lifetime: Lifetime::new(),
            update_hook: None,
        }
    }
    /// Install a hook to be awaited inside every [upsert](PersistentDataStore::upsert) that passes
    /// the size check, immediately before the conditional put. Only meant for tests that need to
    /// provoke a concurrent write at exactly that point.
    pub fn with_update_hook<F>(mut self, hook: F) -> DynamoDataStore
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.update_hook = Some(Arc::new(hook));
        self
    }
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    /// Log & return false if `item` is too big to store
    fn check_size_limit(&self, item: &Item) -> bool {
        if schema::fits(item) {
            return true;
        }
        let (namespace, key) = schema::namespace_and_key(item);
        error!(
            "The item {:?} in {:?} was too large to store in DynamoDB and was dropped",
            key, namespace
        );
        false
    }

    /// Collect the primary keys of every record currently stored under the namespaces of
    /// `all_data`.
    async fn read_existing_keys(
        &self,
        all_data: &[SerializedCollection],
    ) -> Result<BTreeSet<(String, String)>> {
        let mut keys = BTreeSet::new();
        for collection in all_data {
            let namespace = self.prefix.namespace(collection.kind.name());
            let query = &Query::keys(namespace.as_str());
            let client = &self.table;
            let mut pages = pin!(table::paginate(move |start| client.query(query, start)));
            while let Some(page) = pages
                .try_next()
                .await
                .context(QuerySnafu {
                    namespace: namespace.as_str(),
                })?
            {
                keys.extend(page.items.iter().map(schema::namespace_and_key));
            }
        }
        Ok(keys)
    }

    async fn init_inner(&self, all_data: &[SerializedCollection]) -> Result<()> {
        let mut unused_old_keys = self.read_existing_keys(all_data).await?;

        // BatchWriteItem rejects duplicate keys within a batch, so should the input name the same
        // item twice, the later one replaces the earlier in place.
        let mut requests = Vec::new();
        let mut positions: HashMap<(String, String), usize> = HashMap::new();
        for collection in all_data {
            let namespace = self.prefix.namespace(collection.kind.name());
            for KeyedSerializedItemDescriptor { key, item } in &collection.items {
                let record = schema::encode_item(&namespace, key, item);
                if !self.check_size_limit(&record) {
                    continue;
                }
                let id = (namespace.clone(), key.clone());
                unused_old_keys.remove(&id);
                match positions.entry(id) {
                    Entry::Occupied(entry) => requests[*entry.get()] = WriteRequest::Put(record),
                    Entry::Vacant(entry) => {
                        entry.insert(requests.len());
                        requests.push(WriteRequest::Put(record));
                    }
                }
            }
        }
        let num_items = positions.len();

        let inited = self.prefix.inited_key();
        requests.extend(
            unused_old_keys
                .into_iter()
                .filter(|(namespace, key)| *namespace != inited || *key != inited)
                .map(|(namespace, key)| WriteRequest::Delete(schema::key(&namespace, &key))),
        );
        requests.push(WriteRequest::Put(schema::key(&inited, &inited)));

        let count = requests.len();
        batch::write_requests(self.table.as_ref(), requests)
            .await
            .context(WriteBatchesSnafu { count })?;

        info!(
            "Initialized table {} with {} item(s)",
            self.table.name(),
            num_items
        );
        Ok(())
    }

    async fn get_inner(
        &self,
        kind: &DataKind,
        key: &str,
    ) -> Result<Option<SerializedItemDescriptor>> {
        let namespace = self.prefix.namespace(kind.name());
        let record = self
            .table
            .get_item(schema::key(&namespace, key))
            .await
            .context(GetSnafu {
                namespace: namespace.as_str(),
                key,
            })?;
        match record {
            None => {
                debug!("Item {} not found in {}", key, namespace);
                Ok(None)
            }
            Some(record) => match schema::decode_item(&record) {
                Some((_, item)) => Ok(Some(item)),
                None => InvalidItemSnafu { namespace, key }.fail(),
            },
        }
    }

    async fn get_all_inner(&self, kind: &DataKind) -> Result<Vec<KeyedSerializedItemDescriptor>> {
        let namespace = self.prefix.namespace(kind.name());
        let query = &Query::items(namespace.as_str());
        let client = &self.table;
        let mut pages = pin!(table::paginate(move |start| client.query(query, start)));
        let mut results = Vec::new();
        while let Some(page) = pages.try_next().await.context(QuerySnafu {
            namespace: namespace.as_str(),
        })? {
            for record in &page.items {
                match schema::decode_item(record) {
                    Some((key, item)) => results.push(KeyedSerializedItemDescriptor { key, item }),
                    None => warn!(
                        "Skipping malformed record {:?} in {}",
                        schema::namespace_and_key(record).1,
                        namespace
                    ),
                }
            }
        }
        Ok(results)
    }

    async fn upsert_inner(
        &self,
        kind: &DataKind,
        key: &str,
        item: &SerializedItemDescriptor,
    ) -> Result<bool> {
        let namespace = self.prefix.namespace(kind.name());
        let record = schema::encode_item(&namespace, key, item);
        if !self.check_size_limit(&record) {
            return Ok(false);
        }

        if let Some(hook) = &self.update_hook {
            hook().await;
        }

        match self
            .table
            .put_item(record, PutCondition::NewerVersion(item.version))
            .await
            .context(PutSnafu {
                namespace: namespace.as_str(),
                key,
            })? {
            PutOutcome::Written => Ok(true),
            PutOutcome::ConditionFailed => {
                debug!(
                    "Not updating {}/{}: the stored version is at least {}",
                    namespace, key, item.version
                );
                Ok(false)
            }
        }
    }

    /// Read the sentinel; `Ok(true)` if it's there
    async fn sentinel_exists(&self) -> table::Result<bool> {
        let inited = self.prefix.inited_key();
        Ok(self
            .table
            .get_item(schema::key(&inited, &inited))
            .await?
            .is_some())
    }
}

#[async_trait]
impl PersistentDataStore for DynamoDataStore {
    async fn init(
        &self,
        all_data: &[SerializedCollection],
    ) -> std::result::Result<(), storage::Error> {
        self.lifetime
            .run(self.init_inner(all_data))
            .await
            .context(ClosedSnafu)
            .and_then(|res| res)
            .map_err(storage::Error::new)
    }
    async fn get(
        &self,
        kind: &DataKind,
        key: &str,
    ) -> std::result::Result<Option<SerializedItemDescriptor>, storage::Error> {
        self.lifetime
            .run(self.get_inner(kind, key))
            .await
            .context(ClosedSnafu)
            .and_then(|res| res)
            .map_err(storage::Error::new)
    }
    async fn get_all(
        &self,
        kind: &DataKind,
    ) -> std::result::Result<Vec<KeyedSerializedItemDescriptor>, storage::Error> {
        self.lifetime
            .run(self.get_all_inner(kind))
            .await
            .context(ClosedSnafu)
            .and_then(|res| res)
            .map_err(storage::Error::new)
    }
    async fn upsert(
        &self,
        kind: &DataKind,
        key: &str,
        item: &SerializedItemDescriptor,
    ) -> std::result::Result<bool, storage::Error> {
        self.lifetime
            .run(self.upsert_inner(kind, key, item))
            .await
            .context(ClosedSnafu)
            .and_then(|res| res)
            .map_err(storage::Error::new)
    }
    async fn is_initialized(&self) -> bool {
        match self.lifetime.run(self.sentinel_exists()).await {
            Ok(Ok(inited)) => inited,
            Ok(Err(err)) => {
                warn!("Failed to check whether the store is initialized: {}", err);
                false
            }
            Err(_) => false,
        }
    }
    async fn is_store_available(&self) -> bool {
        // Whether or not the sentinel's there, getting an answer at all means we're connected
        matches!(self.lifetime.run(self.sentinel_exists()).await, Ok(Ok(_)))
    }
    async fn close(&self) -> std::result::Result<(), storage::Error> {
        if self.lifetime.cancel() {
            debug!("Closed the data store on {}", self.table.name());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::{
        io::Write,
        sync::{
            atomic::{AtomicBool, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use futures::FutureExt;

    use crate::{attrs, memory::InMemoryTable};

    fn item(version: i64, payload: &str) -> SerializedItemDescriptor {
        SerializedItemDescriptor::new(version, payload)
    }

    fn keyed(key: &str, version: i64, payload: &str) -> KeyedSerializedItemDescriptor {
        KeyedSerializedItemDescriptor::new(key, item(version, payload))
    }

    fn oversized(key: &str, version: i64) -> KeyedSerializedItemDescriptor {
        keyed(key, version, &"x".repeat(schema::MAX_ITEM_SIZE))
    }

    fn store(prefix: Option<&str>) -> (Arc<InMemoryTable>, DynamoDataStore) {
        let table = Arc::new(InMemoryTable::new("flags").with_page_size(7));
        let store = DynamoDataStore::new(table.clone(), Prefix::new(prefix));
        (table, store)
    }

    async fn keys_in(store: &DynamoDataStore, kind: &DataKind) -> Vec<(String, i64)> {
        let mut keys = store
            .get_all(kind)
            .await
            .unwrap()
            .into_iter()
            .map(|k| (k.key, k.item.version))
            .collect::<Vec<(String, i64)>>();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn upsert_is_monotonic() {
        let (_, store) = store(None);
        let features = DataKind::features();

        assert!(store.get(&features, "flag").await.unwrap().is_none());
        assert!(store.upsert(&features, "flag", &item(5, "five")).await.unwrap());
        // Older & equal versions are declined without error...
        assert!(!store.upsert(&features, "flag", &item(4, "four")).await.unwrap());
        assert!(!store.upsert(&features, "flag", &item(5, "FIVE")).await.unwrap());
        assert_eq!(
            store.get(&features, "flag").await.unwrap(),
            Some(item(5, "five"))
        );
        // ...newer ones win.
        assert!(store.upsert(&features, "flag", &item(6, "six")).await.unwrap());
        assert_eq!(
            store.get(&features, "flag").await.unwrap(),
            Some(item(6, "six"))
        );
    }

    #[tokio::test]
    async fn init_replaces_everything() {
        let (table, store) = store(Some("app1"));
        let features = DataKind::features();
        let segments = DataKind::segments();

        assert!(!store.is_initialized().await);
        store.upsert(&features, "f1", &item(1, "{}")).await.unwrap();
        store.upsert(&features, "f2", &item(1, "{}")).await.unwrap();
        store.upsert(&segments, "s1", &item(1, "{}")).await.unwrap();
        // Not one of the namespaces we're about to replace
        store
            .upsert(&DataKind::new("other"), "o1", &item(1, "{}"))
            .await
            .unwrap();
        // Nor one of our namespaces at all
        table
            .put_raw(schema::encode_item("features", "f1", &item(1, "{}")))
            .unwrap();

        store
            .init(&[
                SerializedCollection {
                    kind: features.clone(),
                    items: vec![keyed("f2", 7, "{\"on\":true}"), keyed("f3", 2, "{}")],
                },
                SerializedCollection {
                    kind: segments.clone(),
                    items: vec![],
                },
            ])
            .await
            .unwrap();

        assert!(store.is_initialized().await);
        assert_eq!(
            keys_in(&store, &features).await,
            vec![("f2".to_string(), 7), ("f3".to_string(), 2)]
        );
        assert!(keys_in(&store, &segments).await.is_empty());
        assert_eq!(
            keys_in(&store, &DataKind::new("other")).await,
            vec![("o1".to_string(), 1)]
        );
        assert!(table.raw_item("features", "f1").is_some());
        // Init bypasses the version check, even going backwards
        store
            .init(&[SerializedCollection {
                kind: features.clone(),
                items: vec![keyed("f2", 1, "{}")],
            }])
            .await
            .unwrap();
        assert_eq!(keys_in(&store, &features).await, vec![("f2".to_string(), 1)]);
        assert!(store.is_initialized().await);
    }

    #[tokio::test]
    async fn init_with_duplicates() {
        let (_, store) = store(None);
        let features = DataKind::features();
        store
            .init(&[SerializedCollection {
                kind: features.clone(),
                items: vec![keyed("f1", 1, "first"), keyed("f1", 2, "second")],
            }])
            .await
            .unwrap();
        assert_eq!(
            store.get(&features, "f1").await.unwrap(),
            Some(item(2, "second"))
        );
    }

    #[tokio::test]
    async fn oversized_items_are_dropped() {
        let (_, store) = store(None);
        let features = DataKind::features();
        store.upsert(&features, "bad", &item(1, "{}")).await.unwrap();

        store
            .init(&[SerializedCollection {
                kind: features.clone(),
                items: vec![
                    oversized("bad", 2),
                    keyed("good1", 1, "{}"),
                    keyed("good2", 1, "{}"),
                ],
            }])
            .await
            .unwrap();
        assert_eq!(
            keys_in(&store, &features).await,
            vec![("good1".to_string(), 1), ("good2".to_string(), 1)]
        );
        assert!(store.get(&features, "bad").await.unwrap().is_none());

        assert!(!store
            .upsert(&features, "bad", &oversized("bad", 3).item)
            .await
            .unwrap());
        assert!(store.get(&features, "bad").await.unwrap().is_none());
        assert!(store.upsert(&features, "good1", &item(2, "{}")).await.unwrap());
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn oversized_items_are_logged() {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::ERROR)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (_, store) = store(Some("app1"));
        store
            .init(&[SerializedCollection {
                kind: DataKind::features(),
                items: vec![oversized("big-flag", 1), keyed("ok", 1, "{}")],
            }])
            .await
            .unwrap();
        store
            .upsert(&DataKind::segments(), "big-segment", &oversized("x", 1).item)
            .await
            .unwrap();

        let output = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let lines = output
            .lines()
            .filter(|line| line.contains("was too large to store in DynamoDB and was dropped"))
            .collect::<Vec<&str>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("big-flag") && lines[0].contains("app1:features"));
        assert!(lines[1].contains("big-segment") && lines[1].contains("app1:segments"));
    }

    #[tokio::test]
    async fn payloads_round_trip() {
        let (_, store) = store(None);
        let features = DataKind::features();
        let payloads = vec![
            Vec::new(),
            br#"{"key":"","variations":["",""]}"#.to_vec(),
            "{\"name\":\"drapeau ✓ 旗\"}".as_bytes().to_vec(),
            vec![0xc3, 0x28, 0x00, 0xff],
        ];
        for (i, payload) in payloads.iter().enumerate() {
            let key = format!("flag{}", i);
            let it = SerializedItemDescriptor::new(i as i64 + 1, payload.clone());
            assert!(store.upsert(&features, &key, &it).await.unwrap());
            assert_eq!(store.get(&features, &key).await.unwrap(), Some(it));
        }

        let segments = DataKind::segments();
        store
            .init(&[SerializedCollection {
                kind: segments.clone(),
                items: payloads
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        KeyedSerializedItemDescriptor::new(
                            format!("seg{}", i),
                            SerializedItemDescriptor::new(3, p.clone()),
                        )
                    })
                    .collect(),
            }])
            .await
            .unwrap();
        let mut all = store.get_all(&segments).await.unwrap();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            all.into_iter()
                .map(|k| k.item.serialized_item)
                .collect::<Vec<Vec<u8>>>(),
            payloads
        );
    }

    #[tokio::test]
    async fn get_all_pages() {
        let (_, store) = store(None);
        let features = DataKind::features();
        let items = (0..50)
            .map(|i| keyed(&format!("flag{:02}", i), i, "{}"))
            .collect::<Vec<KeyedSerializedItemDescriptor>>();
        store
            .init(&[SerializedCollection {
                kind: features.clone(),
                items,
            }])
            .await
            .unwrap();
        let keys = keys_in(&store, &features).await;
        assert_eq!(keys.len(), 50);
        assert_eq!(keys[49], ("flag49".to_string(), 49));
    }

    #[tokio::test]
    async fn concurrent_updates_converge() {
        let table = Arc::new(InMemoryTable::new("flags"));
        let features = DataKind::features();
        let other = Arc::new(DynamoDataStore::new(table.clone(), Prefix::none()));
        let fired = Arc::new(AtomicBool::new(false));

        let hook = {
            let other = other.clone();
            let fired = fired.clone();
            move || {
                let other = other.clone();
                let fired = fired.clone();
                async move {
                    if !fired.swap(true, Ordering::SeqCst) {
                        assert!(other
                            .upsert(&DataKind::features(), "flag", &item(2, "two"))
                            .await
                            .unwrap());
                    }
                }
                .boxed()
            }
        };
        let store = DynamoDataStore::new(table.clone(), Prefix::none()).with_update_hook(hook);

        // Version 2 lands between our size check & our put; version 1 must lose.
        assert!(!store.upsert(&features, "flag", &item(1, "one")).await.unwrap());
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(
            store.get(&features, "flag").await.unwrap(),
            Some(item(2, "two"))
        );
    }

    #[tokio::test]
    async fn init_is_chunked() {
        let (table, store) = store(None);
        store
            .init(&[SerializedCollection {
                kind: DataKind::features(),
                items: (0..60).map(|i| keyed(&format!("f{}", i), 1, "{}")).collect(),
            }])
            .await
            .unwrap();
        // 60 items plus the sentinel
        assert_eq!(table.batch_sizes(), vec![25, 25, 11]);
    }

    #[tokio::test]
    async fn partial_init() {
        let (table, store) = store(None);
        table.fail_batches_after(1);
        let res = store
            .init(&[SerializedCollection {
                kind: DataKind::features(),
                items: (0..60).map(|i| keyed(&format!("f{:02}", i), 1, "{}")).collect(),
            }])
            .await;
        assert!(res.is_err());
        // The first batch stays written; no sentinel
        assert_eq!(table.len(), 25);
        assert_eq!(keys_in(&store, &DataKind::features()).await.len(), 25);
        assert!(!store.is_initialized().await);
    }

    #[tokio::test]
    async fn malformed_records() {
        let (table, store) = store(None);
        let features = DataKind::features();
        store.upsert(&features, "good", &item(1, "{}")).await.unwrap();
        let mut record = schema::encode_item("features", "bad", &item(1, "{}"));
        record.insert(schema::ITEM_ATTR.to_string(), attrs::of_string_set(["a", "b"]));
        table.put_raw(record).unwrap();

        // A point read is an error...
        assert!(store.get(&features, "bad").await.is_err());
        // ...but a bulk read just skips it.
        assert_eq!(keys_in(&store, &features).await, vec![("good".to_string(), 1)]);
    }

    #[tokio::test]
    async fn unavailable() {
        let (table, store) = store(None);
        let features = DataKind::features();
        assert!(store.is_store_available().await);
        table.set_unavailable(true);
        assert!(!store.is_store_available().await);
        assert!(!store.is_initialized().await);
        assert!(store.get(&features, "flag").await.is_err());
        assert!(store.get_all(&features).await.is_err());
        assert!(store.upsert(&features, "flag", &item(1, "{}")).await.is_err());
        assert!(store.init(&[]).await.is_err());
        table.set_unavailable(false);
        assert!(store.is_store_available().await);
        assert!(!store.is_initialized().await);
    }

    #[tokio::test]
    async fn close_cancels() {
        let (table, store) = store(None);
        let store = Arc::new(store);
        table.set_stalled(true);

        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.get(&DataKind::features(), "flag").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        store.close().await.unwrap();
        assert!(task.await.unwrap().is_err());

        // Everything after fails fast, even with the table responsive again
        table.set_stalled(false);
        assert!(store.get(&DataKind::features(), "flag").await.is_err());
        assert!(store.init(&[]).await.is_err());
        assert!(!store.is_store_available().await);
        assert!(!store.is_initialized().await);
        store.close().await.unwrap();
    }
}
