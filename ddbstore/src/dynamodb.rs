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

//! # dynamodb
//!
//! [Table] implementation for DynamoDB (or anything else speaking its protocol, such as ScyllaDB's
//! Alternator interface or a local DynamoDB).
//!
//! Reaching the database (credential resolution, retries and so on) is the AWS SDK's business;
//! this module just builds a client from the crate's [Config] & maps the [Table] operations onto
//! `GetItem`, `Query`, `Scan`, `PutItem` & `BatchWriteItem`.
//!
//! [Config]: crate::config::Config

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use aws_sdk_dynamodb::{
    config::Credentials as AwsCredentials,
    error::SdkError,
    operation::put_item::PutItemError,
    types::{DeleteRequest, PutRequest, WriteRequest as DdbWriteRequest},
};
use secrecy::ExposeSecret;
use snafu::{prelude::*, Backtrace};
use tracing::debug;

use crate::{
    attrs,
    config::{Credentials, Location},
    schema::{self, Item},
    table::{
        self, BatchWriteItemSnafu, BuildRequestSnafu, GetItemSnafu, Page, PutCondition,
        PutItemSnafu, PutOutcome, Query, QuerySnafu, ScanSnafu, Table, UnprocessedItemsSnafu,
        WriteRequest,
    },
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("No endpoint URLs specified"))]
    NoEndpoints { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

/// Region used when talking to explicit endpoints (a local DynamoDB, say) with no region
/// configured; the SDK insists on one, though the endpoint ignores it.
const FALLBACK_REGION: &str = "us-east-1";

const PROVIDER_NAME: &str = "ddbstore";

/// A DynamoDB client bound to a single table
#[derive(Clone, Debug)]
pub struct Client {
    client: ::aws_sdk_dynamodb::Client,
    table: String,
}

impl Client {
    /// Build a client from the environment, optionally overriding its location & credentials
    pub async fn new(
        location: Option<&Location>,
        credentials: Option<&Credentials>,
        table: &str,
    ) -> Result<Client> {
        let creds = credentials.map(|Credentials((id, secret))| {
            AwsCredentials::new(
                id.expose_secret(),
                secret.expose_secret(),
                None,
                None,
                PROVIDER_NAME,
            )
        });

        let mut loader = match location {
            Some(Location::Region(region)) => aws_config::defaults(BehaviorVersion::latest())
                .region(
                    RegionProviderChain::first_try(Some(Region::new(region.clone())))
                        .or_default_provider(),
                ),
            Some(Location::Endpoints(endpoints)) => {
                // We don't load-balance over multiple endpoints; just take the first.
                let ep_url = endpoints.first().context(NoEndpointsSnafu)?;
                aws_config::defaults(BehaviorVersion::latest())
                    .endpoint_url(ep_url.as_str())
                    .region(
                        RegionProviderChain::default_provider()
                            .or_else(Region::new(FALLBACK_REGION)),
                    )
            }
            None => aws_config::defaults(BehaviorVersion::latest()),
        };
        if let Some(creds) = creds {
            loader = loader.credentials_provider(creds);
        }
        let config = loader.load().await;
        Ok(Client::from_sdk(
            ::aws_sdk_dynamodb::Client::new(&config),
            table,
        ))
    }
    /// Wrap an existing SDK client; use this to customize the client in ways [Config] doesn't
    /// support.
    ///
    /// [Config]: crate::config::Config
    pub fn from_sdk(client: ::aws_sdk_dynamodb::Client, table: impl Into<String>) -> Client {
        Client {
            client,
            table: table.into(),
        }
    }
    pub fn sdk(&self) -> &::aws_sdk_dynamodb::Client {
        &self.client
    }
}

fn to_sdk_request(request: WriteRequest) -> table::Result<DdbWriteRequest> {
    Ok(match request {
        WriteRequest::Put(item) => DdbWriteRequest::builder()
            .put_request(
                PutRequest::builder()
                    .set_item(Some(item))
                    .build()
                    .context(BuildRequestSnafu)?,
            )
            .build(),
        WriteRequest::Delete(key) => DdbWriteRequest::builder()
            .delete_request(
                DeleteRequest::builder()
                    .set_key(Some(key))
                    .build()
                    .context(BuildRequestSnafu)?,
            )
            .build(),
    })
}

#[async_trait]
impl Table for Client {
    fn name(&self) -> &str {
        &self.table
    }
    async fn get_item(&self, key: Item) -> table::Result<Option<Item>> {
        let out = self
            .client
            .get_item()
            .table_name(&self.table)
            .consistent_read(true)
            .set_key(Some(key))
            .send()
            .await
            .context(GetItemSnafu)?;
        // An absent item may come back as either `None` or an empty map
        Ok(out.item.filter(|item| !item.is_empty()))
    }
    async fn query(&self, query: &Query, exclusive_start_key: Option<Item>) -> table::Result<Page> {
        let mut builder = self
            .client
            .query()
            .table_name(&self.table)
            .consistent_read(true)
            .key_condition_expression("#namespace = :namespace")
            .expression_attribute_names("#namespace", schema::PARTITION_KEY)
            .expression_attribute_values(":namespace", attrs::of_string(&query.namespace))
            .set_exclusive_start_key(exclusive_start_key);
        if query.keys_only {
            builder = builder
                .projection_expression("#namespace, #key")
                .expression_attribute_names("#key", schema::SORT_KEY);
        }
        let out = builder.send().await.context(QuerySnafu)?;
        Ok(Page {
            items: out.items.unwrap_or_default(),
            last_evaluated_key: out.last_evaluated_key,
        })
    }
    async fn scan_keys(&self, exclusive_start_key: Option<Item>) -> table::Result<Page> {
        let out = self
            .client
            .scan()
            .table_name(&self.table)
            .consistent_read(true)
            .projection_expression("#namespace, #key")
            .expression_attribute_names("#namespace", schema::PARTITION_KEY)
            .expression_attribute_names("#key", schema::SORT_KEY)
            .set_exclusive_start_key(exclusive_start_key)
            .send()
            .await
            .context(ScanSnafu)?;
        Ok(Page {
            items: out.items.unwrap_or_default(),
            last_evaluated_key: out.last_evaluated_key,
        })
    }
    async fn put_item(&self, item: Item, condition: PutCondition) -> table::Result<PutOutcome> {
        let mut builder = self.client.put_item().table_name(&self.table).set_item(Some(item));
        if let PutCondition::NewerVersion(version) = condition {
            builder = builder
                .condition_expression(
                    "attribute_not_exists(#namespace) or attribute_not_exists(#key) or :version > #version",
                )
                .expression_attribute_names("#namespace", schema::PARTITION_KEY)
                .expression_attribute_names("#key", schema::SORT_KEY)
                .expression_attribute_names("#version", schema::VERSION_ATTR)
                .expression_attribute_values(":version", attrs::of_int(version));
        }
        match builder.send().await {
            Ok(_) => Ok(PutOutcome::Written),
            // A failed condition comes back as a `ServiceError` wrapping a
            // `ConditionalCheckFailedException`; that's an answer, not a failure.
            Err(SdkError::ServiceError(ref inner))
                if matches!(
                    inner.err(),
                    PutItemError::ConditionalCheckFailedException(_)
                ) =>
            {
                Ok(PutOutcome::ConditionFailed)
            }
            Err(err) => Err(err).context(PutItemSnafu),
        }
    }
    async fn batch_write_item(&self, requests: Vec<WriteRequest>) -> table::Result<()> {
        let requests = requests
            .into_iter()
            .map(to_sdk_request)
            .collect::<table::Result<Vec<DdbWriteRequest>>>()?;
        let count = requests.len();
        let out = self
            .client
            .batch_write_item()
            .request_items(self.table.clone(), requests)
            .send()
            .await
            .context(BatchWriteItemSnafu)?;
        let unprocessed = out
            .unprocessed_items
            .as_ref()
            .and_then(|m| m.get(&self.table))
            .map(Vec::len)
            .unwrap_or(0);
        debug!(
            "BatchWriteItem: {} request(s), {} unprocessed",
            count, unprocessed
        );
        ensure!(
            unprocessed == 0,
            UnprocessedItemsSnafu { count: unprocessed }
        );
        Ok(())
    }
}
