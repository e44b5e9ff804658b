// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisted stores.
//!
//! - [`traits::BlobStore`]: tier+key blob cache, with an in-memory and a SQLite backend
//! - [`records::RecordStore`]: domain records queryable by the unsynced flag
//!
//! The mutation queue lives in [`crate::queue`].

pub mod traits;
pub mod memory;
pub mod sqlite;
pub mod blob_sql;
pub mod records;
