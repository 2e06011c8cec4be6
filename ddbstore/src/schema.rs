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

//! # schema
//!
//! How records are laid out in the (single) DynamoDB table.
//!
//! Flags, segments and any other kind of item the host may wish to store all share one table
//! whose partition key is `namespace` and whose sort key is `key`. DynamoDB's attribute values
//! can't faithfully represent arbitrary documents (empty strings were long disallowed, for
//! instance), so rather than mapping each property of an item to its own attribute, the entire
//! serialized item lives in a single attribute, `item`. The `version` is also broken out as a
//! number, since conditional writes compare against it.
//!
//! This layout is shared with other, independent, implementations of the same store, so the names
//! below are part of the wire format & must not change.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;

use crate::{attrs, storage::SerializedItemDescriptor};

pub const PARTITION_KEY: &str = "namespace";
pub const SORT_KEY: &str = "key";
pub const VERSION_ATTR: &str = "version";
pub const ITEM_ATTR: &str = "item";

/// Namespace & key of the record whose existence means "`init` has completed at least once"
pub const INITED_KEY: &str = "$inited";

pub const BIG_SEGMENTS_METADATA_KEY: &str = "big_segments_metadata";
pub const BIG_SEGMENTS_USER_DATA_KEY: &str = "big_segments_user";
pub const BIG_SEGMENTS_SYNC_TIME_ATTR: &str = "synchronizedOn";
pub const BIG_SEGMENTS_INCLUDED_ATTR: &str = "included";
pub const BIG_SEGMENTS_EXCLUDED_ATTR: &str = "excluded";

/// We won't try to store a record larger than this. The DynamoDB documentation says "400KB", which
/// probably means 400*1024, but we round down to be sure.
pub const MAX_ITEM_SIZE: usize = 400_000;

/// Fixed allowance for index data
// see: https://docs.aws.amazon.com/amazondynamodb/latest/developerguide/CapacityUnitCalculations.html
const ITEM_SIZE_OVERHEAD: usize = 100;

/// A DynamoDB item (or primary key): attribute name to value
pub type Item = HashMap<String, AttributeValue>;

/// Optional namespacing prefix, allowing several logical data sets to share one table
///
/// The empty prefix is the same as no prefix.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Prefix(Option<String>);

impl Prefix {
    pub fn new(prefix: Option<&str>) -> Prefix {
        Prefix(prefix.filter(|s| !s.is_empty()).map(str::to_string))
    }
    pub fn none() -> Prefix {
        Prefix(None)
    }
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
    /// Qualify `base` with this prefix: `<prefix>:<base>`
    pub fn namespace(&self, base: &str) -> String {
        match &self.0 {
            Some(prefix) => format!("{}:{}", prefix, base),
            None => base.to_string(),
        }
    }
    pub fn inited_key(&self) -> String {
        self.namespace(INITED_KEY)
    }
}

/// The primary key of a record
pub fn key(namespace: &str, key: &str) -> Item {
    HashMap::from([
        (PARTITION_KEY.to_string(), attrs::of_string(namespace)),
        (SORT_KEY.to_string(), attrs::of_string(key)),
    ])
}

pub fn encode_item(namespace: &str, key: &str, item: &SerializedItemDescriptor) -> Item {
    HashMap::from([
        (PARTITION_KEY.to_string(), attrs::of_string(namespace)),
        (SORT_KEY.to_string(), attrs::of_string(key)),
        (VERSION_ATTR.to_string(), attrs::of_int(item.version)),
        (
            ITEM_ATTR.to_string(),
            attrs::of_bytes(item.serialized_item.clone()),
        ),
    ])
}

/// Reconstruct a `(key, item)` pair from a stored record; `None` if the record has no usable sort
/// key, or carries a payload that is neither a string nor binary. A missing payload reads as empty.
pub fn decode_item(item: &Item) -> Option<(String, SerializedItemDescriptor)> {
    let key = attrs::to_string(item.get(SORT_KEY));
    if key.is_empty() {
        return None;
    }
    if !matches!(
        item.get(ITEM_ATTR),
        None | Some(AttributeValue::S(_)) | Some(AttributeValue::B(_))
    ) {
        return None;
    }
    Some((
        key,
        SerializedItemDescriptor {
            version: attrs::to_int(item.get(VERSION_ATTR)),
            serialized_item: attrs::to_bytes(item.get(ITEM_ATTR)),
        },
    ))
}

/// Approximate encoded size of `item`: the fixed overhead plus each attribute's name & value
pub fn item_size(item: &Item) -> usize {
    item.iter()
        .fold(ITEM_SIZE_OVERHEAD, |acc, (name, value)| {
            acc + name.len() + attrs::value_len(value)
        })
}

pub fn fits(item: &Item) -> bool {
    item_size(item) <= MAX_ITEM_SIZE
}

/// Extract the `(namespace, key)` pair of a record (or primary key)
pub fn namespace_and_key(item: &Item) -> (String, String) {
    (
        attrs::to_string(item.get(PARTITION_KEY)),
        attrs::to_string(item.get(SORT_KEY)),
    )
}
