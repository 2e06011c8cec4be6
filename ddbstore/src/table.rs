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

//! # table
//!
//! The boundary between the stores in this crate & the remote key/value store.
//!
//! [Table] is a narrow, object-safe abstraction over the handful of DynamoDB
//! operations the stores need: a consistent point read, a paged (consistent) query over one
//! partition, a paged scan of primary keys, a single-record put (optionally conditioned on the
//! version attribute), and a batched write of at most 25 puts & deletes. [Client] implements it on
//! top of the AWS SDK; [InMemoryTable] implements it in-process.
//!
//! [Client]: crate::dynamodb::Client
//! [InMemoryTable]: crate::memory::InMemoryTable

use std::future::Future;

use async_trait::async_trait;
use aws_sdk_dynamodb::{
    config::http::HttpResponse,
    error::SdkError,
    operation::{
        batch_write_item::BatchWriteItemError, get_item::GetItemError, put_item::PutItemError,
        query::QueryError, scan::ScanError,
    },
};
use futures::{stream, Stream};
use snafu::{Backtrace, Snafu};

use crate::schema::Item;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       module Error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    // Generic error variant implementations other than the AWS SDK can use
    #[snafu(display("{source}"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        backtrace: Backtrace,
    },
    #[snafu(display("BatchWriteItem failed: {source}"))]
    BatchWriteItem {
        #[snafu(source(from(SdkError<BatchWriteItemError, HttpResponse>, Box::new)))]
        source: Box<SdkError<BatchWriteItemError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to build a write request: {source}"))]
    BuildRequest {
        source: aws_sdk_dynamodb::error::BuildError,
        backtrace: Backtrace,
    },
    #[snafu(display("GetItem failed: {source}"))]
    GetItem {
        #[snafu(source(from(SdkError<GetItemError, HttpResponse>, Box::new)))]
        source: Box<SdkError<GetItemError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("PutItem failed: {source}"))]
    PutItem {
        #[snafu(source(from(SdkError<PutItemError, HttpResponse>, Box::new)))]
        source: Box<SdkError<PutItemError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("Query failed: {source}"))]
    Query {
        #[snafu(source(from(SdkError<QueryError, HttpResponse>, Box::new)))]
        source: Box<SdkError<QueryError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("Scan failed: {source}"))]
    Scan {
        #[snafu(source(from(SdkError<ScanError, HttpResponse>, Box::new)))]
        source: Box<SdkError<ScanError, HttpResponse>>,
        backtrace: Backtrace,
    },
    #[snafu(display("{count} write request(s) in the batch were left unprocessed"))]
    UnprocessedItems { count: usize, backtrace: Backtrace },
}

impl Error {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Backend {
            source: Box::new(err),
            backtrace: Backtrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           requests                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A query over a single partition
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Query {
    pub namespace: String,
    /// Return only `namespace` & `key`
    pub keys_only: bool,
}

impl Query {
    pub fn items(namespace: impl Into<String>) -> Query {
        Query {
            namespace: namespace.into(),
            keys_only: false,
        }
    }
    pub fn keys(namespace: impl Into<String>) -> Query {
        Query {
            namespace: namespace.into(),
            keys_only: true,
        }
    }
}

/// One page of results; `last_evaluated_key` is the continuation token, if there are more.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutCondition {
    Always,
    /// Write only if there's no record at this key, or the stored record's version is less than
    /// this
    NewerVersion(i64),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutOutcome {
    Written,
    ConditionFailed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WriteRequest {
    /// A complete record
    Put(Item),
    /// A primary key
    Delete(Item),
}

#[async_trait]
pub trait Table {
    /// The name of the underlying table
    fn name(&self) -> &str;
    /// Consistent read of a single record by primary key
    async fn get_item(&self, key: Item) -> Result<Option<Item>>;
    /// Consistent read of one page of the partition named in `query`, starting after
    /// `exclusive_start_key`
    async fn query(&self, query: &Query, exclusive_start_key: Option<Item>) -> Result<Page>;
    /// Consistent read of one page of primary keys, across all partitions
    async fn scan_keys(&self, exclusive_start_key: Option<Item>) -> Result<Page>;
    async fn put_item(&self, item: Item, condition: PutCondition) -> Result<PutOutcome>;
    /// Submit at most [MAX_BATCH_SIZE] requests, no two naming the same key
    ///
    /// [MAX_BATCH_SIZE]: crate::batch::MAX_BATCH_SIZE
    async fn batch_write_item(&self, requests: Vec<WriteRequest>) -> Result<()>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          pagination                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Turn a page-fetching function into a lazy [Stream] of pages.
///
/// `fetch` is invoked with `None` for the first page & with each page's continuation token
/// thereafter; the stream ends after the first page that carries no continuation token (or with
/// the first error).
pub fn paginate<F, Fut, E>(mut fetch: F) -> impl Stream<Item = std::result::Result<Page, E>>
where
    F: FnMut(Option<Item>) -> Fut,
    Fut: Future<Output = std::result::Result<Page, E>>,
{
    // State: `None` once we've seen the last page, else the start key for the next page
    stream::try_unfold(Some(None), move |state: Option<Option<Item>>| {
        let next = state.map(&mut fetch);
        async move {
            match next {
                None => Ok(None),
                Some(fut) => {
                    let page = fut.await?;
                    let state = page
                        .last_evaluated_key
                        .clone()
                        .filter(|key| !key.is_empty())
                        .map(Some);
                    Ok(Some((page, state)))
                }
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    use futures::TryStreamExt;

    use crate::schema;

    #[tokio::test]
    async fn paginate_follows_continuation_tokens() {
        let pages = paginate(|start: Option<Item>| async move {
            let n = start
                .as_ref()
                .map(|k| crate::attrs::to_int(k.get(schema::VERSION_ATTR)))
                .unwrap_or(0);
            let last_evaluated_key: Option<Item> = if n < 2 {
                Some(
                    [(schema::VERSION_ATTR.to_string(), crate::attrs::of_int(n + 1))]
                        .into_iter()
                        .collect(),
                )
            } else {
                None
            };
            Ok::<_, Error>(Page {
                items: vec![schema::key("ns", &format!("k{}", n))],
                last_evaluated_key,
            })
        })
        .try_collect::<Vec<Page>>()
        .await
        .unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(
            schema::namespace_and_key(&pages[2].items[0]).1,
            "k2".to_string()
        );
    }

    #[tokio::test]
    async fn paginate_stops_on_error() {
        let mut calls = 0;
        let result = paginate(|_| {
            calls += 1;
            async { Err::<Page, _>(Error::new(std::io::Error::other("boom"))) }
        })
        .try_collect::<Vec<Page>>()
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
