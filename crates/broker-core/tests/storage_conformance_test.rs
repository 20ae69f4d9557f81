// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store behaviour over the memory and SQLite backends.

mod common;

use std::sync::Arc;

use broker_core::model::Binding;
use broker_core::{AesCipher, BrokerStorage, MemoryBackend, Retrier, StorageError};
use common::conformance;

macro_rules! conformance_tests {
    ($($name:ident),* $(,)?) => {
        mod memory {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    conformance::$name(&common::memory_storage()).await;
                }
            )*
        }

        mod sqlite {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    conformance::$name(&common::sqlite_storage().await).await;
                }
            )*
        }
    };
}

conformance_tests!(
    insert_then_get_round_trips,
    duplicate_insert_is_rejected,
    update_bumps_version_by_one,
    stale_update_conflicts,
    update_of_missing_operation_is_not_found,
    concurrent_updates_have_single_winner,
    typed_get_with_wrong_type_is_not_found,
    get_by_instance_id_returns_newest,
    grouping_orders_each_list,
    last_operation_skips_pending,
    time_range_selects_recent_operations,
    operations_for_ids,
    stats_by_plan,
    list_operations_pages_and_filters,
    not_finished_operations_by_type,
    delete_by_id_is_idempotent,
    instance_lifecycle,
    instance_details_come_from_last_operation,
    deleted_instance_ids,
    all_operations_are_listed,
    instances_for_runtimes,
    distinct_subaccounts_skip_deleted,
    instances_counted_per_global_account,
    instance_list_filters_and_pages,
    ers_context_stats_count_license_types,
    binding_lifecycle,
    expired_bindings_and_stats,
    binding_stats_without_expired_bindings,
);

#[tokio::test]
async fn test_binding_written_with_other_key_is_unreadable() {
    let backend = Arc::new(MemoryBackend::new());
    let writer = BrokerStorage::new(backend.clone(), common::test_cipher(), Retrier::default());
    let reader = BrokerStorage::new(
        backend,
        Arc::new(AesCipher::new("another-secret").unwrap()),
        Retrier::default(),
    );
    writer
        .bindings()
        .insert(&Binding::new("binding-1", "inst-1", "apiVersion: v1", 600))
        .await
        .unwrap();

    let err = reader.bindings().get("inst-1", "binding-1").await.unwrap_err();
    assert!(matches!(err, StorageError::Encryption(_)), "got {err:?}");
}
