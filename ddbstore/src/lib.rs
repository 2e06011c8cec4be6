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
//! Persistent storage in DynamoDB for a feature-flag evaluation engine: its versioned flag &
//! segment data via [DynamoDataStore], and Big Segment membership via [DynamoBigSegmentStore].
//! Both are built by a [StoreBuilder], and both are consumed through the traits in [storage].
//!
//! [DynamoDataStore]: data_store::DynamoDataStore
//! [DynamoBigSegmentStore]: big_segments::DynamoBigSegmentStore
//! [StoreBuilder]: config::StoreBuilder
pub mod attrs;
pub mod batch;
pub mod big_segments;
pub mod config;
pub mod data_store;
pub mod dynamodb;
pub mod lifetime;
pub mod memory;
pub mod schema;
pub mod storage;
pub mod table;
