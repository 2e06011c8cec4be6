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

//! Test fixtures: the table maintenance the suites need, but which the stores themselves never do.
//!
//! Everything except [create_table_if_necessary] works through the [Table] abstraction, so it
//! applies equally to the in-memory table & to DynamoDB.

use std::{collections::BTreeSet, pin::pin, time::Duration};

use aws_sdk_dynamodb::{
    config::http::HttpResponse,
    error::SdkError,
    operation::{create_table::CreateTableError, describe_table::DescribeTableError},
    types::{
        AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType,
        TableStatus,
    },
};
use ddbstore::{
    attrs, batch,
    schema::{self, Prefix},
    table::{self, PutCondition, Table, WriteRequest},
};
use futures::TryStreamExt;
use snafu::{prelude::*, Backtrace};
use tracing::{debug, info};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build {name}: {source}"))]
    Build {
        name: String,
        source: aws_sdk_dynamodb::error::BuildError,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create table {name}: {source}"))]
    CreateTable {
        name: String,
        #[snafu(source(from(SdkError<CreateTableError, HttpResponse>, Box::new)))]
        source: Box<SdkError<CreateTableError, HttpResponse>>,
    },
    #[snafu(display("Failed to delete test data: {source}"))]
    Delete { source: batch::Error },
    #[snafu(display("Failed to describe table {name}: {source}"))]
    DescribeTable {
        name: String,
        #[snafu(source(from(SdkError<DescribeTableError, HttpResponse>, Box::new)))]
        source: Box<SdkError<DescribeTableError, HttpResponse>>,
    },
    #[snafu(display("Failed to read {namespace}/{key}: {source}"))]
    Get {
        namespace: String,
        key: String,
        source: table::Error,
    },
    #[snafu(display("Failed to write {namespace}/{key}: {source}"))]
    Put {
        namespace: String,
        key: String,
        source: table::Error,
    },
    #[snafu(display("Failed to scan for test data: {source}"))]
    Scan { source: table::Error },
    #[snafu(display("Table {name} never became active"))]
    TableNotActive { name: String, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Delete every record under `prefix`; with no prefix, delete every record in the table.
pub async fn clear_data(table: &(dyn Table + Send + Sync), prefix: Option<&str>) -> Result<()> {
    let wanted = prefix.filter(|p| !p.is_empty()).map(|p| format!("{}:", p));
    let mut pages = pin!(table::paginate(move |start| table.scan_keys(start)));
    let mut requests = Vec::new();
    while let Some(page) = pages.try_next().await.context(ScanSnafu)? {
        requests.extend(
            page.items
                .into_iter()
                .filter(|item| match &wanted {
                    Some(wanted) => schema::namespace_and_key(item).0.starts_with(wanted),
                    None => true,
                })
                .map(WriteRequest::Delete),
        );
    }
    debug!("Deleting {} record(s) from {}", requests.len(), table.name());
    batch::write_requests(table, requests)
        .await
        .context(DeleteSnafu)?;
    Ok(())
}

/// Record that Big Segment data was synchronized at `synchronized_on` (ms since the epoch)
pub async fn set_metadata(
    table: &(dyn Table + Send + Sync),
    prefix: Option<&str>,
    synchronized_on: u64,
) -> Result<()> {
    let key = Prefix::new(prefix).namespace(schema::BIG_SEGMENTS_METADATA_KEY);
    let mut item = schema::key(&key, &key);
    item.insert(
        schema::BIG_SEGMENTS_SYNC_TIME_ATTR.to_string(),
        attrs::of_u64(synchronized_on),
    );
    table
        .put_item(item, PutCondition::Always)
        .await
        .context(PutSnafu {
            namespace: key.as_str(),
            key: key.as_str(),
        })?;
    Ok(())
}

/// Add `included` & `excluded` to the membership sets of `context_hash_key`, the way the Big
/// Segment synchronizer would.
pub async fn set_membership(
    table: &(dyn Table + Send + Sync),
    prefix: Option<&str>,
    context_hash_key: &str,
    included: &[&str],
    excluded: &[&str],
) -> Result<()> {
    let namespace = Prefix::new(prefix).namespace(schema::BIG_SEGMENTS_USER_DATA_KEY);
    let existing = table
        .get_item(schema::key(&namespace, context_hash_key))
        .await
        .context(GetSnafu {
            namespace: namespace.as_str(),
            key: context_hash_key,
        })?
        .unwrap_or_default();

    let mut item = schema::key(&namespace, context_hash_key);
    for (attr, refs) in [
        (schema::BIG_SEGMENTS_INCLUDED_ATTR, included),
        (schema::BIG_SEGMENTS_EXCLUDED_ATTR, excluded),
    ] {
        let set = attrs::to_string_set(existing.get(attr))
            .into_iter()
            .chain(refs.iter().map(|s| s.to_string()))
            .collect::<BTreeSet<String>>();
        // DynamoDB won't store an empty set
        if !set.is_empty() {
            item.insert(attr.to_string(), attrs::of_string_set(set));
        }
    }
    table
        .put_item(item, PutCondition::Always)
        .await
        .context(PutSnafu {
            namespace: namespace.as_str(),
            key: context_hash_key,
        })?;
    Ok(())
}

macro_rules! table_attr {
    ($col_name:expr, $ty:ident) => {
        AttributeDefinition::builder()
            .attribute_name($col_name)
            .attribute_type(ScalarAttributeType::$ty)
            .build()
            .context(BuildSnafu {
                name: $col_name.to_string(),
            })?
    };
}

macro_rules! key_elem {
    ($col_name:expr, $ty:ident) => {
        KeySchemaElement::builder()
            .attribute_name($col_name)
            .key_type(KeyType::$ty)
            .build()
            .context(BuildSnafu {
                name: $col_name.to_string(),
            })?
    };
}

/// Create table `name` with the store's key schema, unless it already exists, and wait for it to
/// become active.
pub async fn create_table_if_necessary(
    client: &aws_sdk_dynamodb::Client,
    name: &str,
) -> Result<()> {
    match client.describe_table().table_name(name).send().await {
        Ok(_) => return Ok(()),
        Err(err)
            if matches!(
                err.as_service_error(),
                Some(DescribeTableError::ResourceNotFoundException(_))
            ) => {}
        Err(err) => return Err(err).context(DescribeTableSnafu { name }),
    }

    info!("Creating table {}", name);
    client
        .create_table()
        .table_name(name)
        .billing_mode(BillingMode::PayPerRequest)
        .set_attribute_definitions(Some(vec![
            table_attr!(schema::PARTITION_KEY, S),
            table_attr!(schema::SORT_KEY, S),
        ]))
        .set_key_schema(Some(vec![
            key_elem!(schema::PARTITION_KEY, Hash),
            key_elem!(schema::SORT_KEY, Range),
        ]))
        .send()
        .await
        .context(CreateTableSnafu { name })?;

    for _ in 0..60 {
        let out = client
            .describe_table()
            .table_name(name)
            .send()
            .await
            .context(DescribeTableSnafu { name })?;
        if out.table().and_then(|t| t.table_status()) == Some(&TableStatus::Active) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    TableNotActiveSnafu { name }.fail()
}
