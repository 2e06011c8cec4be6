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

//! Integration tests for the Big Segment store.

use std::{collections::HashSet, sync::Arc};

use ddbstore::{
    big_segments::DynamoBigSegmentStore,
    schema::Prefix,
    storage::BigSegmentStore,
    table::Table,
};
use libtest_mimic::Failed;

use crate::fixtures::{clear_data, set_membership, set_metadata};

fn refs(refs: &[&str]) -> HashSet<String> {
    refs.iter().map(|s| s.to_string()).collect()
}

pub async fn metadata(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    clear_data(table.as_ref(), prefix).await?;
    let store = DynamoBigSegmentStore::new(table.clone(), Prefix::new(prefix));

    // Never synchronized
    assert_eq!(store.get_metadata().await?.last_up_to_date, 0);

    set_metadata(table.as_ref(), prefix, 1_234_567_890_123).await?;
    assert_eq!(store.get_metadata().await?.last_up_to_date, 1_234_567_890_123);
    set_metadata(table.as_ref(), prefix, 1_234_567_899_999).await?;
    assert_eq!(store.get_metadata().await?.last_up_to_date, 1_234_567_899_999);

    store.close().await?;
    assert!(store.get_metadata().await.is_err());
    Ok(())
}

pub async fn membership(
    table: Arc<dyn Table + Send + Sync>,
    prefix: Option<&'static str>,
) -> Result<(), Failed> {
    clear_data(table.as_ref(), prefix).await?;
    let store = DynamoBigSegmentStore::new(table.clone(), Prefix::new(prefix));

    let none = store.get_membership("nobody").await?;
    assert!(none.is_empty());
    assert_eq!(none.check_membership("seg1"), None);

    set_membership(table.as_ref(), prefix, "ctx1", &["seg1", "seg2"], &[]).await?;
    set_membership(table.as_ref(), prefix, "ctx2", &[], &["seg1"]).await?;
    set_membership(table.as_ref(), prefix, "ctx3", &["seg1"], &["seg2"]).await?;

    let m = store.get_membership("ctx1").await?;
    assert_eq!(m.included(), &refs(&["seg1", "seg2"]));
    assert!(m.excluded().is_empty());

    let m = store.get_membership("ctx2").await?;
    assert!(m.included().is_empty());
    assert_eq!(m.check_membership("seg1"), Some(false));

    let m = store.get_membership("ctx3").await?;
    assert_eq!(m.check_membership("seg1"), Some(true));
    assert_eq!(m.check_membership("seg2"), Some(false));
    assert_eq!(m.check_membership("seg3"), None);

    // The synchronizer only ever adds
    set_membership(table.as_ref(), prefix, "ctx1", &["seg3"], &["seg4"]).await?;
    let m = store.get_membership("ctx1").await?;
    assert_eq!(m.included(), &refs(&["seg1", "seg2", "seg3"]));
    assert_eq!(m.excluded(), &refs(&["seg4"]));

    assert!(store.get_membership("nobody").await?.is_empty());
    Ok(())
}
