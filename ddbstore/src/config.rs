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

//! # config
//!
//! Configuring the stores.
//!
//! A [Config] names the table (required), an optional namespacing prefix, and optionally where to
//! find DynamoDB & what credentials to use; anything not given is left to the AWS SDK's usual
//! environment-driven defaults. It can be read from TOML:
//!
//! ```toml
//! table = "feature-flags"
//! prefix = "app1"
//! # either a region...
//! location = "us-west-2"
//! # ...or one or more endpoints (a local DynamoDB, or ScyllaDB/Alternator)
//! # location = ["http://localhost:8000"]
//! credentials = ["AKIDEXAMPLE", "secret"]
//! ```
//!
//! or assembled in code with a [StoreBuilder], which is also what actually produces the stores.
//! The data store & the Big Segment store are independent: they may use different tables, or the
//! same one.

use std::{path::Path, sync::Arc};

use itertools::Itertools;
use secrecy::SecretString;
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};
use tap::Pipe;
use url::Url;

use crate::{
    big_segments::DynamoBigSegmentStore,
    data_store::DynamoDataStore,
    dynamodb,
    schema::Prefix,
    table::Table,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to create a DynamoDB client: {source}"))]
    Client { source: dynamodb::Error },
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Table name is required"))]
    NoTableName { backtrace: Backtrace },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read {
        pth: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        configuration                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Where to find DynamoDB
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum Location {
    /// An AWS region ("us-west-2", e.g.)
    Region(String),
    /// Explicit endpoints ("http://localhost:8000", e.g.)
    Endpoints(Vec<Url>),
}

impl std::str::FromStr for Location {
    type Err = url::ParseError;

    /// A comma-separated list of URLs is a list of endpoints; a single non-URL is a region.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let vals = s.split(',').collect::<Vec<&str>>();
        match vals.iter().exactly_one() {
            Ok(s) => Ok(match Url::parse(s) {
                Ok(url) => Location::Endpoints(vec![url]),
                Err(_) => Location::Region(s.to_string()),
            }),
            Err(_) => vals
                .into_iter()
                .map(Url::parse)
                .collect::<std::result::Result<Vec<Url>, _>>()?
                .pipe(Location::Endpoints)
                .pipe(Ok),
        }
    }
}

/// AWS credentials: access key ID & secret access key
// Not sure that the key ID should be secret, but why not?
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials(pub (SecretString, SecretString));

impl Credentials {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Credentials {
        Credentials((id.into().into(), secret.into().into()))
    }
}

impl clap::builder::ValueParserFactory for Credentials {
    type Parser = CredentialsParser;

    fn value_parser() -> Self::Parser {
        CredentialsParser
    }
}

/// Parse credentials given as "ID,SECRET"
#[derive(Clone, Debug)]
pub struct CredentialsParser;

impl clap::builder::TypedValueParser for CredentialsParser {
    type Value = Credentials;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidValue))?
            .split(',')
            .collect_tuple::<(&str, &str)>()
            .ok_or(clap::Error::new(ErrorKind::WrongNumberOfValues))?
            .pipe(|(id, secret)| Credentials::new(id, secret))
            .pipe(Ok)
    }
}

/// Store configuration
// Nb that we can only deserialize (i.e. not serialize) due to the presence of secrets
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub table: String,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl Config {
    pub fn from_file(pth: &Path) -> Result<Config> {
        std::fs::read_to_string(pth)
            .context(ReadSnafu {
                pth: pth.display().to_string(),
            })?
            .pipe(|s| toml::from_str::<Config>(&s))
            .context(DeSnafu {
                pth: pth.display().to_string(),
            })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        StoreBuilder                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Builder for [DynamoDataStore] and/or [DynamoBigSegmentStore]
#[derive(Clone)]
pub struct StoreBuilder {
    table: String,
    prefix: Option<String>,
    location: Option<Location>,
    credentials: Option<Credentials>,
    client: Option<::aws_sdk_dynamodb::Client>,
    table_client: Option<Arc<dyn Table + Send + Sync>>,
}

impl StoreBuilder {
    /// The table must already exist
    pub fn new(table: impl Into<String>) -> StoreBuilder {
        StoreBuilder {
            table: table.into(),
            prefix: None,
            location: None,
            credentials: None,
            client: None,
            table_client: None,
        }
    }
    pub fn from_config(config: &Config) -> StoreBuilder {
        StoreBuilder {
            table: config.table.clone(),
            prefix: config.prefix.clone(),
            location: config.location.clone(),
            credentials: config.credentials.clone(),
            client: None,
            table_client: None,
        }
    }
    pub fn table(mut self, table: impl Into<String>) -> StoreBuilder {
        self.table = table.into();
        self
    }
    /// Namespace all keys with `prefix`; the empty string means "no prefix"
    pub fn prefix(mut self, prefix: impl Into<String>) -> StoreBuilder {
        self.prefix = Some(prefix.into());
        self
    }
    pub fn location(mut self, location: Location) -> StoreBuilder {
        self.location = Some(location);
        self
    }
    pub fn credentials(mut self, credentials: Credentials) -> StoreBuilder {
        self.credentials = Some(credentials);
        self
    }
    /// Use an existing SDK client; any location or credentials are then ignored
    pub fn dynamo_client(mut self, client: ::aws_sdk_dynamodb::Client) -> StoreBuilder {
        self.client = Some(client);
        self
    }
    /// Use an existing [Table] implementation outright; the table name must still be non-empty
    pub fn table_client(mut self, table: Arc<dyn Table + Send + Sync>) -> StoreBuilder {
        self.table_client = Some(table);
        self
    }
    pub fn describe_configuration(&self) -> &'static str {
        "DynamoDB"
    }
    async fn make_table(&self) -> Result<Arc<dyn Table + Send + Sync>> {
        ensure!(!self.table.is_empty(), NoTableNameSnafu);
        if let Some(table) = &self.table_client {
            return Ok(table.clone());
        }
        Ok(match &self.client {
            Some(client) => Arc::new(dynamodb::Client::from_sdk(client.clone(), &self.table)),
            None => Arc::new(
                dynamodb::Client::new(
                    self.location.as_ref(),
                    self.credentials.as_ref(),
                    &self.table,
                )
                .await
                .context(ClientSnafu)?,
            ),
        })
    }
    fn make_prefix(&self) -> Prefix {
        Prefix::new(self.prefix.as_deref())
    }
    pub async fn build_data_store(&self) -> Result<DynamoDataStore> {
        Ok(DynamoDataStore::new(self.make_table().await?, self.make_prefix()))
    }
    pub async fn build_big_segment_store(&self) -> Result<DynamoBigSegmentStore> {
        Ok(DynamoBigSegmentStore::new(
            self.make_table().await?,
            self.make_prefix(),
        ))
    }
}
