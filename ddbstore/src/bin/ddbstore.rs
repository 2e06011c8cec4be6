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

//! # ddbstore
//!
//! Inspect a feature-flag data set stored in DynamoDB.
//!
//! This is a read-only operator's tool: it answers "has this table been initialized?", "what
//! version of this flag is stored?" and "what does the Big Segment synchronizer think of this
//! context?" by going through the very same stores the evaluation engine uses, so what it prints
//! is what the engine sees. Results are written to stdout as JSON.

use std::{fmt::Display, io, path::PathBuf};

use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use ddbstore::{
    config::{self, Config, Credentials, Location, StoreBuilder},
    storage::{self, BigSegmentStore, DataKind, PersistentDataStore},
};
use serde::Serialize;
use serde_json::json;
use snafu::prelude::*;
use tap::Pipe;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    EnvFilter, Layer, Registry,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        crate error type                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Application error type
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to build the store: {source}"))]
    Build { source: config::Error },
    #[snafu(display("Failed to read configuration: {source}"))]
    Config { source: config::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to serialize the result: {source}"))]
    Json { source: serde_json::Error },
    #[snafu(display("A table name must be given, either on the command line or in configuration"))]
    NoTable,
    #[snafu(display("{source}"))]
    Store { source: storage::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          subcommands                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// An item as we display it; the payload is almost always JSON text
#[derive(Debug, Serialize)]
struct Record {
    key: String,
    version: i64,
    item: String,
}

impl Record {
    fn new(key: impl Into<String>, item: &storage::SerializedItemDescriptor) -> Record {
        Record {
            key: key.into(),
            version: item.version,
            item: String::from_utf8_lossy(&item.serialized_item).into_owned(),
        }
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    serde_json::to_string_pretty(value)
        .context(JsonSnafu)?
        .pipe(|s| println!("{}", s))
        .pipe(Ok)
}

async fn is_initialized(builder: &StoreBuilder) -> Result<()> {
    let store = builder.build_data_store().await.context(BuildSnafu)?;
    print(&json!({ "initialized": store.is_initialized().await }))
}

async fn get(builder: &StoreBuilder, matches: &ArgMatches) -> Result<()> {
    let kind = DataKind::new(matches.get_one::<String>("kind").unwrap(/* required */));
    let key = matches.get_one::<String>("key").unwrap(/* required */);
    let store = builder.build_data_store().await.context(BuildSnafu)?;
    match store.get(&kind, key).await.context(StoreSnafu)? {
        Some(item) => print(&Record::new(key, &item)),
        None => print(&serde_json::Value::Null),
    }
}

async fn get_all(builder: &StoreBuilder, matches: &ArgMatches) -> Result<()> {
    let kind = DataKind::new(matches.get_one::<String>("kind").unwrap(/* required */));
    let store = builder.build_data_store().await.context(BuildSnafu)?;
    store
        .get_all(&kind)
        .await
        .context(StoreSnafu)?
        .iter()
        .map(|keyed| Record::new(keyed.key.as_str(), &keyed.item))
        .collect::<Vec<Record>>()
        .pipe(|records| print(&records))
}

async fn metadata(builder: &StoreBuilder) -> Result<()> {
    let store = builder.build_big_segment_store().await.context(BuildSnafu)?;
    print(&store.get_metadata().await.context(StoreSnafu)?)
}

async fn membership(builder: &StoreBuilder, matches: &ArgMatches) -> Result<()> {
    let hash_key = matches.get_one::<String>("hash-key").unwrap(/* required */);
    let store = builder.build_big_segment_store().await.context(BuildSnafu)?;
    print(&store.get_membership(hash_key).await.context(StoreSnafu)?)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             main                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn configure_logging(matches: &ArgMatches) -> Result<()> {
    let level = match (
        matches.get_flag("debug"),
        matches.get_flag("verbose"),
        matches.get_flag("quiet"),
    ) {
        (true, _, _) => Level::TRACE,
        (false, true, _) => Level::DEBUG,
        (false, false, true) => Level::ERROR,
        _ => Level::WARN,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()
        .context(EnvFilterSnafu)?;
    // stdout is for results
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if matches.get_flag("plain") {
        Box::new(fmt::Layer::default().compact().with_writer(io::stderr))
    } else {
        Box::new(fmt::Layer::default().json().with_writer(io::stderr))
    };
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)
}

/// Combine the configuration file (if any) with the command line; the latter wins
fn make_builder(matches: &mut ArgMatches) -> Result<StoreBuilder> {
    let config = matches
        .remove_one::<PathBuf>("config")
        .map(|pth| Config::from_file(&pth))
        .transpose()
        .context(ConfigSnafu)?;
    let mut builder = match (matches.remove_one::<String>("table"), config) {
        (table, Some(config)) => {
            let builder = StoreBuilder::from_config(&config);
            match table {
                Some(table) => builder.table(table),
                None => builder,
            }
        }
        (Some(table), None) => StoreBuilder::new(table),
        (None, None) => return NoTableSnafu.fail(),
    };
    if let Some(prefix) = matches.remove_one::<String>("prefix") {
        builder = builder.prefix(prefix);
    }
    if let Some(location) = matches.remove_one::<Location>("location") {
        builder = builder.location(location);
    }
    if let Some(credentials) = matches.remove_one::<Credentials>("creds") {
        builder = builder.credentials(credentials);
    }
    Ok(builder)
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut matches = Command::new("ddbstore")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Inspect feature-flag data stored in DynamoDB.")
        .long_about("Read flags, segments & Big Segment data from DynamoDB, exactly as the evaluation engine would, and print them as JSON.")
        .arg(
            Arg::new("debug")
                .short('D')
                .long("debug")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("DDBSTORE_DEBUG")
                .help("produce debug output"),
        )
        .arg(
            Arg::new("plain")
                .short('p')
                .long("plain")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("DDBSTORE_PLAIN")
                .help("log in human-readable format, not JSON/structured logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("DDBSTORE_QUIET")
                .help("produce only error output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .num_args(0)
                .action(ArgAction::SetTrue)
                .env("DDBSTORE_VERBOSE")
                .help("produce prolix output"),
        )
        .arg(
            Arg::new("config")
                .short('f')
                .long("config")
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .env("DDBSTORE_CONFIG")
                .help("TOML configuration file naming the table, prefix, location & credentials"),
        )
        .arg(
            Arg::new("table")
                .short('t')
                .long("table")
                .num_args(1)
                .env("DDBSTORE_TABLE")
                .help("DynamoDB table name"),
        )
        .arg(
            Arg::new("prefix")
                .long("prefix")
                .num_args(1)
                .env("DDBSTORE_PREFIX")
                .help("namespace prefix shared by every key in the data set"),
        )
        .arg(
            Arg::new("creds")
                .short('c')
                .long("creds")
                .num_args(1)
                .env("DDBSTORE_CREDS")
                .value_parser(value_parser!(Credentials))
                .help("AWS credentials, as ACCESS_KEY_ID,SECRET_ACCESS_KEY"),
        )
        .arg(
            Arg::new("location")
                .long("location")
                .short('l')
                .num_args(1)
                .value_parser(value_parser!(Location))
                .help("Network location of the DynamoDB cluster")
                .long_help("Network location of the DynamoDB/ScyllaDB cluster.

Specify as either an AWS region ('us-west-2', e.g.) or as an URL ('http://localhost:8000', e.g.). If not
given, the AWS SDK's defaults apply.")
                .env("DDBSTORE_LOCATION"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("is-initialized").about("Report whether the data set has been initialized"))
        .subcommand(
            Command::new("get")
                .about("Retrieve one item")
                .arg(Arg::new("kind").required(true).help("kind of item (\"features\", \"segments\", ...)"))
                .arg(Arg::new("key").required(true).help("item key")),
        )
        .subcommand(
            Command::new("get-all")
                .about("Retrieve every item of one kind")
                .arg(Arg::new("kind").required(true).help("kind of item (\"features\", \"segments\", ...)")),
        )
        .subcommand(Command::new("metadata").about("Show when Big Segment data was last synchronized"))
        .subcommand(
            Command::new("membership")
                .about("Show the Big Segment membership of one context")
                .arg(Arg::new("hash-key").required(true).help("the context's hashed key")),
        )
        .get_matches();
    configure_logging(&matches)?;

    info!("ddbstore {}", crate_version!());

    let builder = make_builder(&mut matches)?;
    match matches.subcommand() {
        Some(("is-initialized", _)) => is_initialized(&builder).await,
        Some(("get", sub)) => get(&builder, sub).await,
        Some(("get-all", sub)) => get_all(&builder, sub).await,
        Some(("metadata", _)) => metadata(&builder).await,
        Some(("membership", sub)) => membership(&builder, sub).await,
        _ => unreachable!("a subcommand is required"),
    }
}
