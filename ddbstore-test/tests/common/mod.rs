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

use std::{env, fs, io, sync::Arc};

use ddbstore::{config::Config, table::Table};
use futures::future::BoxFuture;
use itertools::Itertools;
use libtest_mimic::{Failed, Trial};
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;
use tokio::runtime::Runtime;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use ddbstore_test::{big_segments, data_store};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to read DDBSTORE_TEST_CONFIG: {source}"))]
    Env { source: std::env::VarError },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read { pth: String, source: std::io::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Common test configuration
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Configuration {
    /// Log to stdout (filtered by `RUST_LOG`)
    #[serde(default)]
    pub logging: bool,
    /// Where to find DynamoDB; the `dynamodb` tests are skipped if this isn't given
    #[serde(default)]
    pub dynamo: Option<Config>,
}

impl Configuration {
    /// Obtain a [Configuration]
    ///
    /// Check the `DDBSTORE_TEST_CONFIG` environment variable; if defined, attempt to parse a
    /// [Configuration] from the file named therein; else return a default instance.
    pub fn new() -> Result<Configuration> {
        match env::var("DDBSTORE_TEST_CONFIG") {
            Ok(f) => fs::read_to_string(&f)
                .context(ReadSnafu { pth: f.clone() })?
                .pipe(|s| toml::from_str::<Configuration>(&s))
                .context(DeSnafu { pth: f.clone() }),
            Err(env::VarError::NotPresent) => Ok(Configuration::default()),
            Err(err) => Err(EnvSnafu.into_error(err)),
        }
    }
}

pub fn configure_logging(config: &Configuration) -> Result<()> {
    if config.logging {
        let filter = EnvFilter::builder()
            .with_default_directive(Level::INFO.into())
            .from_env()
            .context(FilterSnafu)?;
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt::Layer::default().compact().with_writer(io::stdout))
                .with(filter),
        )
        .context(SetGlobalDefaultSnafu)?;
    }
    Ok(())
}

pub struct StoreTest {
    pub name: &'static str,
    pub test_fn: fn(
        Arc<dyn Table + Send + Sync>,
        Option<&'static str>,
    ) -> BoxFuture<'static, std::result::Result<(), Failed>>,
}

inventory::collect!(StoreTest);

/// Every test is run once against an unprefixed data set, and once against a prefixed one
static PREFIXES: [(&str, Option<&str>); 2] = [
    ("unprefixed", None),
    ("prefixed", Some("testprefix")),
];

/// Build the libtest-mimic trials; with no `table`, they're all marked ignored.
pub fn trials(rt: Arc<Runtime>, table: Option<Arc<dyn Table + Send + Sync>>) -> Vec<Trial> {
    inventory::iter::<StoreTest>
        .into_iter()
        .sorted_by_key(|t| t.name)
        .flat_map(|test| {
            let rt = rt.clone();
            let table = table.clone();
            PREFIXES.iter().map(move |(label, prefix)| {
                let name = format!("{}::{}", test.name, label);
                match table.clone() {
                    Some(table) => Trial::test(name, {
                        let rt = rt.clone();
                        let prefix = *prefix;
                        move || rt.block_on((test.test_fn)(table, prefix))
                    }),
                    None => Trial::test(name, || Ok(())).with_ignored_flag(true),
                }
            })
        })
        .collect()
}

inventory::submit!(StoreTest {
    name: "010init_and_read",
    test_fn: |table, prefix| Box::pin(data_store::init_and_read(table, prefix)),
});

inventory::submit!(StoreTest {
    name: "020init_replaces_previous_data",
    test_fn: |table, prefix| Box::pin(data_store::init_replaces_previous_data(table, prefix)),
});

inventory::submit!(StoreTest {
    name: "030upsert_respects_versions",
    test_fn: |table, prefix| Box::pin(data_store::upsert_respects_versions(table, prefix)),
});

inventory::submit!(StoreTest {
    name: "040oversized_items_are_skipped",
    test_fn: |table, prefix| Box::pin(data_store::oversized_items_are_skipped(table, prefix)),
});

inventory::submit!(StoreTest {
    name: "050concurrent_updates_converge",
    test_fn: |table, prefix| Box::pin(data_store::concurrent_updates_converge(table, prefix)),
});

inventory::submit!(StoreTest {
    name: "060payloads_round_trip",
    test_fn: |table, prefix| Box::pin(data_store::payloads_round_trip(table, prefix)),
});

inventory::submit!(StoreTest {
    name: "070many_items",
    test_fn: |table, prefix| Box::pin(data_store::many_items(table, prefix)),
});

inventory::submit!(StoreTest {
    name: "080prefixes_are_isolated",
    test_fn: |table, prefix| Box::pin(data_store::prefixes_are_isolated(table, prefix)),
});

inventory::submit!(StoreTest {
    name: "110big_segment_metadata",
    test_fn: |table, prefix| Box::pin(big_segments::metadata(table, prefix)),
});

inventory::submit!(StoreTest {
    name: "120big_segment_membership",
    test_fn: |table, prefix| Box::pin(big_segments::membership(table, prefix)),
});
