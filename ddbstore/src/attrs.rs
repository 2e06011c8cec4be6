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

//! # Attribute Codec
//!
//! Conversions between the handful of Rust types this crate stores & DynamoDB's [AttributeValue].
//!
//! Decoding is forgiving: an attribute that's missing, or of the wrong shape, decodes
//! to the "zero" value for the target type rather than producing an error. Callers treat zero as
//! "absent" where that's safe (a missing version is indistinguishable from version 0, for
//! instance).

use aws_sdk_dynamodb::{primitives::Blob, types::AttributeValue};

pub fn of_string(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

/// DynamoDB numbers travel as decimal text
pub fn of_int(value: i64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub fn of_u64(value: u64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

/// Nb. DynamoDB rejects empty sets; callers shouldn't write one
pub fn of_string_set<I, S>(values: I) -> AttributeValue
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    AttributeValue::Ss(values.into_iter().map(Into::into).collect())
}

/// Encode an opaque payload. Anything that's valid UTF-8 (which is to say, every JSON document) is
/// stored as a string so that other implementations sharing the table can read it; anything else
/// goes in as a binary attribute so that no byte is lost.
pub fn of_bytes(value: Vec<u8>) -> AttributeValue {
    match String::from_utf8(value) {
        Ok(s) => AttributeValue::S(s),
        Err(err) => AttributeValue::B(Blob::new(err.into_bytes())),
    }
}

pub fn to_bytes(value: Option<&AttributeValue>) -> Vec<u8> {
    match value {
        Some(AttributeValue::S(s)) => s.as_bytes().to_vec(),
        Some(AttributeValue::B(b)) => b.as_ref().to_vec(),
        _ => Vec::new(),
    }
}

/// The number of bytes DynamoDB will charge for this value, as far as we bother to compute it
pub fn value_len(value: &AttributeValue) -> usize {
    match value {
        AttributeValue::S(s) | AttributeValue::N(s) => s.len(),
        AttributeValue::B(b) => b.as_ref().len(),
        _ => 0,
    }
}

/// Return the textual content of a string or number attribute; anything else (including a missing
/// attribute) yields the empty string.
pub fn to_string(value: Option<&AttributeValue>) -> String {
    as_text(value).unwrap_or_default().to_string()
}

/// Borrowing version of [to_string]
pub fn as_text(value: Option<&AttributeValue>) -> Option<&str> {
    match value {
        Some(AttributeValue::S(s)) | Some(AttributeValue::N(s)) => Some(s.as_str()),
        _ => None,
    }
}

pub fn to_int(value: Option<&AttributeValue>) -> i64 {
    match value {
        Some(AttributeValue::N(n)) => n.parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

pub fn to_u64(value: Option<&AttributeValue>) -> u64 {
    match value {
        Some(AttributeValue::N(n)) => n.parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

pub fn to_string_set(value: Option<&AttributeValue>) -> Vec<String> {
    match value {
        Some(AttributeValue::Ss(ss)) => ss.clone(),
        _ => Vec::new(),
    }
}
