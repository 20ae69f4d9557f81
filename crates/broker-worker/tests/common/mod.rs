// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for broker-worker tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use broker_core::{AesCipher, BrokerStorage, Retrier, RetryPolicy, SqliteBackend, SystemClock};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

pub fn memory_storage() -> BrokerStorage {
    BrokerStorage::in_memory(Arc::new(
        AesCipher::new("broker-worker-test-secret").expect("cipher"),
    ))
}

pub async fn sqlite_storage() -> BrokerStorage {
    sqlite_storage_with_pool().await.0
}

/// SQLite storage plus its pool, for tests that tamper with the schema.
pub async fn sqlite_storage_with_pool() -> (BrokerStorage, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test pool");
    broker_core::migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");
    let storage = BrokerStorage::new(
        Arc::new(SqliteBackend::new(pool.clone())),
        Arc::new(AesCipher::new("broker-worker-test-secret").expect("cipher")),
        Retrier::new(
            RetryPolicy::fixed(Duration::from_millis(10), Duration::from_millis(100)),
            Arc::new(SystemClock),
        ),
    );
    (storage, pool)
}

/// Make the database reject every operation update matching `condition`,
/// an SQL expression over the `NEW` row.
pub async fn reject_operation_updates(pool: &SqlitePool, condition: &str) {
    let sql = format!(
        "CREATE TRIGGER reject_operation_update BEFORE UPDATE ON operations \
         WHEN {condition} BEGIN SELECT RAISE(ABORT, 'update rejected'); END"
    );
    sqlx::query(&sql)
        .execute(pool)
        .await
        .expect("Failed to create trigger");
}
