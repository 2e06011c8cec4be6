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

//! # The ddbstore Integration Tests
//!
//! The unit tests beside each module in `ddbstore` exercise the stores against an in-process
//! table. The tests here run the same host-level scenarios end-to-end, against any [Table]: both
//! the in-memory one and a real DynamoDB (or DynamoDB-compatible) endpoint.
//!
//! As with any integration suite that needs fixtures, the default test harness isn't much help,
//! so each program under `tests/` opts out of it in Cargo.toml:
//!
//! ```toml
//! [[test]]
//!     name = "dynamodb"
//!     harness = false
//! ```
//!
//! and supplies its own `main()`, which uses [libtest-mimic] to present a conventional
//! command-line interface. Test cases are registered with [inventory] & run one at a time, in
//! name order, each against both an unprefixed & a prefixed data set.
//!
//! [Table]: ddbstore::table::Table
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//! [inventory]: https://docs.rs/inventory/latest/inventory/index.html
//!
//! # Project Structure
//!
//! Test cases themselves live in this library ([data_store], [big_segments]), along with the
//! [fixtures] they need to set up & tear down state. The framework itself (the registration
//! struct, configuration) lives in `tests/common`; the test programs live in `tests`.
pub mod big_segments;
pub mod data_store;
pub mod fixtures;
