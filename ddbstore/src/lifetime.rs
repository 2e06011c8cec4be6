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

//! Each store owns a [Lifetime]. Every remote call the store makes is driven through
//! [Lifetime::run], so that closing the store causes anything in flight to fail promptly, and
//! anything issued afterward to fail immediately, rather than block.

use std::future::Future;

use snafu::{Backtrace, Snafu};
use tokio::sync::watch;

#[derive(Debug, Snafu)]
#[snafu(display("The store has been closed"))]
pub struct Cancelled {
    backtrace: Backtrace,
}

/// A cancellation token scoped to a single store instance
#[derive(Debug)]
pub struct Lifetime {
    tx: watch::Sender<bool>,
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifetime {
    pub fn new() -> Lifetime {
        let (tx, _) = watch::channel(false);
        Lifetime { tx }
    }
    /// Cancel this lifetime; return true the first time, false on subsequent calls.
    pub fn cancel(&self) -> bool {
        !self.tx.send_replace(true)
    }
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
    /// Drive `fut` to completion, unless this lifetime is (or becomes) cancelled first, in which
    /// case `fut` is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        let mut rx = self.tx.subscribe();
        if *rx.borrow_and_update() {
            return CancelledSnafu.fail();
        }
        tokio::select! {
            biased;
            _ = cancelled(rx) => CancelledSnafu.fail(),
            out = fut => Ok(out),
        }
    }
}

async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // The sender's gone, so we'll never be cancelled
            std::future::pending::<()>().await;
        }
    }
}
