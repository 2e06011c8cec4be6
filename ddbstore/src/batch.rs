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

//! # batch
//!
//! Submit an arbitrary number of puts & deletes in batches no larger than `BatchWriteItem` allows.
//!
//! Batches go out strictly one after another. The first failure abandons the remaining batches &
//! is returned to the caller; batches already written stay written. There is no retry here: the
//! SDK's own retry policy is all there is.

use snafu::{prelude::*, Backtrace};
use tracing::debug;

use crate::table::{self, Table, WriteRequest};

/// The most requests `BatchWriteItem` will accept at once
pub const MAX_BATCH_SIZE: usize = 25;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "Batch {batch} ({count} request(s)) failed after {written} request(s) were written: {source}"
    ))]
    Batch {
        batch: usize,
        count: usize,
        written: usize,
        source: table::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Write `requests` to `table`; return the number of batches submitted.
pub async fn write_requests(
    table: &(dyn Table + Send + Sync),
    requests: Vec<WriteRequest>,
) -> Result<usize> {
    let mut requests = requests.into_iter();
    let mut batch = 0;
    let mut written = 0;
    loop {
        let chunk = requests
            .by_ref()
            .take(MAX_BATCH_SIZE)
            .collect::<Vec<WriteRequest>>();
        if chunk.is_empty() {
            break;
        }
        let count = chunk.len();
        table.batch_write_item(chunk).await.context(BatchSnafu {
            batch,
            count,
            written,
        })?;
        batch += 1;
        written += count;
    }
    debug!("Wrote {} request(s) in {} batch(es)", written, batch);
    Ok(batch)
}
