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

//! Run the store tests against DynamoDB (or ScyllaDB/Alternator, or DynamoDB Local).
//!
//! Point `DDBSTORE_TEST_CONFIG` at a TOML file with a `[dynamo]` table, e.g.
//!
//! ```toml
//! [dynamo]
//! table = "ddbstore-test"
//! location = ["http://localhost:8000"]
//! credentials = ["fakeid", "fakesecret"]
//! ```
//!
//! The table will be created if need be. Without a `[dynamo]` table, every test is reported as
//! ignored.

use std::sync::Arc;

use ddbstore::{dynamodb, table::Table};
use ddbstore_test::fixtures;
use libtest_mimic::Arguments;
use snafu::prelude::*;
use tap::Pipe;
use tokio::runtime::Runtime;

use common::Configuration;

mod common;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Failed to create a DynamoDB client: {source}"))]
    Client { source: dynamodb::Error },
    #[snafu(display("Error obtaining test configuration: {source}"))]
    Configuration { source: common::Error },
    #[snafu(display("Failed to configure logging: {source}"))]
    Logging { source: common::Error },
    #[snafu(display("Failed to build a tokio multi-threaded runtime: {source}"))]
    Runtime { source: std::io::Error },
    #[snafu(display("Failed to set up the test table: {source}"))]
    Table { source: fixtures::Error },
}

type Result<T> = std::result::Result<T, Error>;

fn main() -> Result<()> {
    let rt = Arc::new(Runtime::new().context(RuntimeSnafu)?);

    // We have no way to augment the set of command-line arguments this program will accept, so
    // we'll examine an environment variable to determine where to get our configuration:
    let config = Configuration::new().context(ConfigurationSnafu)?;
    common::configure_logging(&config).context(LoggingSnafu)?;

    let table = match &config.dynamo {
        Some(dynamo) => rt
            .block_on(async {
                let client = dynamodb::Client::new(
                    dynamo.location.as_ref(),
                    dynamo.credentials.as_ref(),
                    &dynamo.table,
                )
                .await
                .context(ClientSnafu)?;
                fixtures::create_table_if_necessary(client.sdk(), &dynamo.table)
                    .await
                    .context(TableSnafu)?;
                Ok::<_, Error>(Arc::new(client) as Arc<dyn Table + Send + Sync>)
            })?
            .pipe(Some),
        None => {
            eprintln!("DDBSTORE_TEST_CONFIG names no DynamoDB table; skipping.");
            None
        }
    };

    let mut args = Arguments::from_args();
    if !matches!(args.test_threads, Some(1)) {
        eprintln!("Overriding --test-threads to 1.");
        args.test_threads = Some(1);
    }

    libtest_mimic::run(&args, common::trials(rt, table)).exit();
}
