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

//! # Big Segments
//!
//! Read-only access to Big Segment membership data.
//!
//! Both kinds of record are written by an external synchronizer; all this module does is read
//! them back. Nothing here ever writes to the table.

use std::sync::Arc;

use async_trait::async_trait;
use snafu::prelude::*;
use tracing::debug;

use crate::{
    attrs,
    lifetime::{Cancelled, Lifetime},
    schema::{
        self, Prefix, BIG_SEGMENTS_EXCLUDED_ATTR, BIG_SEGMENTS_INCLUDED_ATTR,
        BIG_SEGMENTS_METADATA_KEY, BIG_SEGMENTS_SYNC_TIME_ATTR, BIG_SEGMENTS_USER_DATA_KEY,
    },
    storage::{self, BigSegmentMembership, BigSegmentStore, BigSegmentStoreMetadata},
    table::{self, Table},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Closed { source: Cancelled },
    #[snafu(display("Failed to read Big Segment metadata: {source}"))]
    Metadata { source: table::Error },
    #[snafu(display("Failed to read Big Segment membership for {context_hash_key}: {source}"))]
    Membership {
        context_hash_key: String,
        source: table::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// A [BigSegmentStore] backed by a DynamoDB table
pub struct DynamoBigSegmentStore {
    table: Arc<dyn Table + Send + Sync>,
    prefix: Prefix,
    lifetime: Lifetime,
}

impl std::fmt::Debug for DynamoBigSegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoBigSegmentStore")
            .field("table", &self.table.name())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl DynamoBigSegmentStore {
    pub fn new(table: Arc<dyn Table + Send + Sync>, prefix: Prefix) -> DynamoBigSegmentStore {
        DynamoBigSegmentStore {
            table,
            prefix,
            lifetime: Lifetime::new(),
        }
    }

    async fn get_metadata_inner(&self) -> Result<BigSegmentStoreMetadata> {
        let key = self.prefix.namespace(BIG_SEGMENTS_METADATA_KEY);
        let record = self
            .table
            .get_item(schema::key(&key, &key))
            .await
            .context(MetadataSnafu)?;
        // A missing record, or a missing (or garbled) timestamp, both mean "never synchronized"
        Ok(BigSegmentStoreMetadata {
            last_up_to_date: record
                .as_ref()
                .map(|record| attrs::to_u64(record.get(BIG_SEGMENTS_SYNC_TIME_ATTR)))
                .unwrap_or(0),
        })
    }

    async fn get_membership_inner(&self, context_hash_key: &str) -> Result<BigSegmentMembership> {
        let namespace = self.prefix.namespace(BIG_SEGMENTS_USER_DATA_KEY);
        match self
            .table
            .get_item(schema::key(&namespace, context_hash_key))
            .await
            .context(MembershipSnafu { context_hash_key })?
        {
            None => {
                debug!("No Big Segment membership for {}", context_hash_key);
                Ok(BigSegmentMembership::default())
            }
            Some(record) => Ok(BigSegmentMembership::from_segment_refs(
                attrs::to_string_set(record.get(BIG_SEGMENTS_INCLUDED_ATTR)),
                attrs::to_string_set(record.get(BIG_SEGMENTS_EXCLUDED_ATTR)),
            )),
        }
    }
}

#[async_trait]
impl BigSegmentStore for DynamoBigSegmentStore {
    async fn get_metadata(&self) -> std::result::Result<BigSegmentStoreMetadata, storage::Error> {
        self.lifetime
            .run(self.get_metadata_inner())
            .await
            .context(ClosedSnafu)
            .and_then(|res| res)
            .map_err(storage::Error::new)
    }
    async fn get_membership(
        &self,
        context_hash_key: &str,
    ) -> std::result::Result<BigSegmentMembership, storage::Error> {
        self.lifetime
            .run(self.get_membership_inner(context_hash_key))
            .await
            .context(ClosedSnafu)
            .and_then(|res| res)
            .map_err(storage::Error::new)
    }
    async fn close(&self) -> std::result::Result<(), storage::Error> {
        self.lifetime.cancel();
        Ok(())
    }
}
