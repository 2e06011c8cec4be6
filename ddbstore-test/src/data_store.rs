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

//! Integration tests for the persistent data store.
//!
//! Each test starts by clearing its prefix, so they can share a table (though not run
//! concurrently).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ddbstore::{
    data_store::DynamoDataStore,
    schema::{Prefix, MAX_ITEM_SIZE},
    storage::{
        DataKind, KeyedSerializedItemDescriptor, PersistentDataStore, SerializedCollection,
        SerializedItemDescriptor,
    },
    table::Table,
};
use futures::FutureExt;
use libtest_mimic::Failed;

use crate::fixtures::clear_data;

async fn fresh_store(
    table: &Arc<dyn Table + Send + Sync>,
    prefix: Option<&str>,
) -> Result<DynamoDataStore, Failed> {
    clear_data(table.as_ref(), prefix).await?;
    Ok(DynamoDataStore::new(table.clone(), Prefix::new(prefix)))
}

fn item(version: i64, payload: &str) -> SerializedItemDescriptor {
    SerializedItemDescriptor::new(version, payload)
}

fn collection(kind: &DataKind, items: &[(&str, i64, &str)]) -> SerializedCollection {
    SerializedCollection {
        kind: kind.clone(),
        items: items
            .iter()
            .map(|(key, version, payload)| {
                KeyedSerializedItemDescriptor::new(*key, item(*version, payload))
            })
            .collect(),
    }
}

async fn versions(
    store: &DynamoDataStore,
    kind: &DataKind,
) -> Result<Vec<(String, i64)>, Failed> {
    let mut found = store
        .get_all(kind)
        .await?
        .into_iter()
        .map(|k| (k.key, k.item.version))
        .collect::<Vec<(String, i64)>>();
    found.sort();
    Ok(found)
}

fn pairs(expected: &[(&str, i64)]) -> Vec<(String, i64)> {
    expected.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

pub async fn init_and_read(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    let store = fresh_store(&table, prefix).await?;
    let features = DataKind::features();
    let segments = DataKind::segments();

    assert!(store.is_store_available().await);
    assert!(!store.is_initialized().await);
    assert!(store.get(&features, "flag1").await?.is_none());
    assert!(store.get_all(&features).await?.is_empty());

    store
        .init(&[
            collection(&features, &[("flag1", 1, "{\"key\":\"flag1\"}"), ("flag2", 2, "{}")]),
            collection(&segments, &[("seg1", 3, "{\"key\":\"seg1\"}")]),
        ])
        .await?;

    assert!(store.is_initialized().await);
    assert_eq!(
        store.get(&features, "flag1").await?,
        Some(item(1, "{\"key\":\"flag1\"}"))
    );
    assert_eq!(
        versions(&store, &features).await?,
        pairs(&[("flag1", 1), ("flag2", 2)])
    );
    assert_eq!(versions(&store, &segments).await?, pairs(&[("seg1", 3)]));

    store.close().await?;
    Ok(())
}

pub async fn init_replaces_previous_data(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    let store = fresh_store(&table, prefix).await?;
    let features = DataKind::features();
    let segments = DataKind::segments();

    store
        .init(&[
            collection(&features, &[("flag1", 1, "{}"), ("flag2", 1, "{}")]),
            collection(&segments, &[("seg1", 1, "{}")]),
        ])
        .await?;
    store.upsert(&features, "flag3", &item(1, "{}")).await?;

    store
        .init(&[
            collection(&features, &[("flag2", 5, "{}"), ("flag4", 1, "{}")]),
            collection(&segments, &[]),
        ])
        .await?;

    assert_eq!(
        versions(&store, &features).await?,
        pairs(&[("flag2", 5), ("flag4", 1)])
    );
    assert!(versions(&store, &segments).await?.is_empty());
    assert!(store.get(&features, "flag1").await?.is_none());
    assert!(store.is_initialized().await);
    Ok(())
}

pub async fn upsert_respects_versions(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    let store = fresh_store(&table, prefix).await?;
    let features = DataKind::features();

    assert!(store.upsert(&features, "flag", &item(10, "ten")).await?);
    assert!(!store.upsert(&features, "flag", &item(9, "nine")).await?);
    assert!(!store.upsert(&features, "flag", &item(10, "TEN")).await?);
    assert_eq!(store.get(&features, "flag").await?, Some(item(10, "ten")));

    assert!(store.upsert(&features, "flag", &item(11, "eleven")).await?);
    assert_eq!(
        store.get(&features, "flag").await?,
        Some(item(11, "eleven"))
    );
    // A "deleted" marker is just another version to the store
    assert!(store.upsert(&features, "flag", &item(12, "{\"deleted\":true}")).await?);
    assert_eq!(
        store.get(&features, "flag").await?,
        Some(item(12, "{\"deleted\":true}"))
    );
    Ok(())
}

pub async fn oversized_items_are_skipped(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    let store = fresh_store(&table, prefix).await?;
    let features = DataKind::features();
    let huge = "x".repeat(MAX_ITEM_SIZE);

    store
        .init(&[collection(
            &features,
            &[("bad", 1, huge.as_str()), ("good1", 1, "{}"), ("good2", 1, "{}")],
        )])
        .await?;
    assert_eq!(
        versions(&store, &features).await?,
        pairs(&[("good1", 1), ("good2", 1)])
    );
    assert!(store.get(&features, "bad").await?.is_none());

    assert!(!store.upsert(&features, "bad", &item(2, &huge)).await?);
    assert!(!store.upsert(&features, "good1", &item(2, &huge)).await?);
    assert!(store.get(&features, "bad").await?.is_none());
    assert_eq!(store.get(&features, "good1").await?, Some(item(1, "{}")));
    Ok(())
}

pub async fn concurrent_updates_converge(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    let other = Arc::new(fresh_store(&table, prefix).await?);
    let fired = Arc::new(AtomicBool::new(false));
    let store = DynamoDataStore::new(table.clone(), Prefix::new(prefix)).with_update_hook({
        let other = other.clone();
        let fired = fired.clone();
        move || {
            let other = other.clone();
            let fired = fired.clone();
            async move {
                if !fired.swap(true, Ordering::SeqCst) {
                    let _ = other
                        .upsert(&DataKind::features(), "flag", &item(2, "two"))
                        .await;
                }
            }
            .boxed()
        }
    });
    let features = DataKind::features();

    assert!(!store.upsert(&features, "flag", &item(1, "one")).await?);
    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(store.get(&features, "flag").await?, Some(item(2, "two")));
    Ok(())
}

pub async fn payloads_round_trip(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    let store = fresh_store(&table, prefix).await?;
    let features = DataKind::features();
    let payloads: Vec<Vec<u8>> = vec![
        Vec::new(),
        br#"{"key":"flag","variations":["",""],"salt":""}"#.to_vec(),
        "{\"name\":\"ünïcödé 🚩 フラグ\"}".as_bytes().to_vec(),
        vec![0x00, 0x01, 0xfe, 0xff, 0x80],
    ];
    for (i, payload) in payloads.iter().enumerate() {
        let key = format!("flag{}", i);
        let it = SerializedItemDescriptor::new(1, payload.clone());
        assert!(store.upsert(&features, &key, &it).await?);
        assert_eq!(store.get(&features, &key).await?, Some(it));
    }
    Ok(())
}

pub async fn many_items(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    let store = fresh_store(&table, prefix).await?;
    let features = DataKind::features();
    let items = (0..120)
        .map(|i| KeyedSerializedItemDescriptor::new(format!("flag{:03}", i), item(i, "{}")))
        .collect::<Vec<KeyedSerializedItemDescriptor>>();
    store
        .init(&[SerializedCollection {
            kind: features.clone(),
            items,
        }])
        .await?;
    let found = versions(&store, &features).await?;
    assert_eq!(found.len(), 120);
    assert_eq!(found[119], ("flag119".to_string(), 119));

    // Replace with a strict subset; everything else has to go
    store
        .init(&[collection(&features, &[("flag007", 200, "{}")])])
        .await?;
    assert_eq!(versions(&store, &features).await?, pairs(&[("flag007", 200)]));
    Ok(())
}

pub async fn prefixes_are_isolated(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    const NEIGHBOR: &str = "neighbor";
    let store = fresh_store(&table, prefix).await?;
    let neighbor = fresh_store(&table, Some(NEIGHBOR)).await?;
    let features = DataKind::features();

    neighbor
        .init(&[collection(&features, &[("theirs", 1, "{}")])])
        .await?;
    assert!(!store.is_initialized().await);
    store
        .init(&[collection(&features, &[("ours", 1, "{}")])])
        .await?;

    assert_eq!(versions(&store, &features).await?, pairs(&[("ours", 1)]));
    assert_eq!(versions(&neighbor, &features).await?, pairs(&[("theirs", 1)]));
    assert!(neighbor.is_initialized().await);

    clear_data(table.as_ref(), Some(NEIGHBOR)).await?;
    Ok(())
}
