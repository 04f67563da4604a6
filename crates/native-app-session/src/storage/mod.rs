//! Named key-value storages multiplexed over the host connection.

mod cache;

pub use cache::{Storage, StorageCache};
