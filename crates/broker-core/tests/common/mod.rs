// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures and the backend conformance suite.
//!
//! Every function in [`conformance`] takes a [`BrokerStorage`] and must pass
//! regardless of which backend sits underneath it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use broker_core::model::{ErsContext, ProvisioningParameters, RuntimeParameters, SmCredentials};
use broker_core::{
    AesCipher, BrokerStorage, Cipher, Retrier, RetryPolicy, SqliteBackend, SystemClock,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::SqlitePoolOptions;

pub const TEST_SECRET: &str = "broker-core-test-secret";

pub fn test_cipher() -> Arc<dyn Cipher> {
    Arc::new(AesCipher::new(TEST_SECRET).expect("cipher"))
}

pub fn fast_retrier() -> Retrier {
    Retrier::new(
        RetryPolicy::fixed(Duration::from_millis(10), Duration::from_millis(100)),
        Arc::new(SystemClock),
    )
}

pub fn memory_storage() -> BrokerStorage {
    BrokerStorage::in_memory(test_cipher())
}

pub async fn sqlite_storage() -> BrokerStorage {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test pool");
    broker_core::migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");
    BrokerStorage::new(
        Arc::new(SqliteBackend::new(pool)),
        test_cipher(),
        fast_retrier(),
    )
}

pub fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(minutes)
}

pub fn parameters(plan_id: &str, subaccount_id: &str) -> ProvisioningParameters {
    ProvisioningParameters {
        plan_id: plan_id.to_string(),
        service_id: "broker-service".to_string(),
        platform_region: "cf-eu10".to_string(),
        ers_context: ErsContext {
            tenant_id: "tenant-1".to_string(),
            subaccount_id: subaccount_id.to_string(),
            global_account_id: "ga-1".to_string(),
            user_id: "jane@example.com".to_string(),
            license_type: Some("CUSTOMER".to_string()),
            sm_operator_credentials: Some(SmCredentials {
                client_id: "sm-client".to_string(),
                client_secret: "sm-secret".to_string(),
                sm_url: "https://sm.example.com".to_string(),
                url: "https://auth.example.com".to_string(),
            }),
        },
        parameters: RuntimeParameters {
            name: "runtime".to_string(),
            region: Some("eu-central-1".to_string()),
            kubeconfig: "apiVersion: v1\nkind: Config".to_string(),
            shoot_name: None,
        },
    }
}

pub fn ids<P>(operations: &[broker_core::model::Operation<P>]) -> Vec<String> {
    operations.iter().map(|o| o.id.clone()).collect()
}

pub mod conformance {
    use super::*;

    use broker_core::StorageError;
    use broker_core::model::{
        Binding, DeprovisioningData, ErrorComponent, Instance, InstanceFilter, LastError,
        Operation, OperationFilter, OperationState, OperationType, ProvisioningData, UpdatingData,
        UpgradeClusterData,
    };

    pub async fn insert_then_get_round_trips(storage: &BrokerStorage) {
        let ops = storage.operations();
        let mut op = Operation::new(
            unique_id("op"),
            "inst-1",
            ProvisioningData {
                runtime_version: Some("1.24".to_string()),
                dashboard_url: "https://console.example.com".to_string(),
                provisioner_operation_id: "prov-7".to_string(),
            },
        )
        .with_parameters(parameters("plan-aws", "sub-1"));
        op.description = "provisioning started".to_string();
        op.finished_stages = vec!["Init".to_string(), "Create_Runtime".to_string()];
        op.instance_details.runtime_id = "rt-1".to_string();
        op.last_error = Some(LastError {
            component: ErrorComponent::Dependency,
            step: "Create_Runtime".to_string(),
            message: "provisioner timeout".to_string(),
        });

        ops.insert_provisioning_operation(&op).await.unwrap();
        let loaded = ops.get_provisioning_operation_by_id(&op.id).await.unwrap();

        assert_eq!(loaded.id, op.id);
        assert_eq!(loaded.instance_id, op.instance_id);
        assert_eq!(loaded.version, 0);
        assert_eq!(loaded.state, OperationState::Pending);
        assert_eq!(loaded.description, op.description);
        assert_eq!(loaded.provisioning_parameters, op.provisioning_parameters);
        assert_eq!(loaded.instance_details, op.instance_details);
        assert_eq!(loaded.finished_stages, op.finished_stages);
        assert_eq!(loaded.last_error, op.last_error);
        assert_eq!(loaded.payload, op.payload);
    }

    pub async fn duplicate_insert_is_rejected(storage: &BrokerStorage) {
        let ops = storage.operations();
        let mut first = Operation::new(unique_id("op"), "inst-1", DeprovisioningData::default());
        first.description = "first".to_string();
        ops.insert_deprovisioning_operation(&first).await.unwrap();

        let mut second = first.clone();
        second.description = "second".to_string();
        let err = ops
            .insert_deprovisioning_operation(&second)
            .await
            .unwrap_err();

        assert!(err.is_already_exists(), "got {err:?}");
        let stored = ops.get_deprovisioning_operation_by_id(&first.id).await.unwrap();
        assert_eq!(stored.description, "first");
    }

    pub async fn update_bumps_version_by_one(storage: &BrokerStorage) {
        let ops = storage.operations();
        let op = Operation::new(unique_id("op"), "inst-1", UpgradeClusterData::default());
        ops.insert_upgrade_cluster_operation(&op).await.unwrap();

        let mut loaded = ops.get_upgrade_cluster_operation_by_id(&op.id).await.unwrap();
        let before = loaded.updated_at;
        loaded.state = OperationState::InProgress;
        let updated = ops.update_upgrade_cluster_operation(&loaded).await.unwrap();

        assert_eq!(updated.version, 1);
        assert!(updated.updated_at >= before);
        let reloaded = ops.get_upgrade_cluster_operation_by_id(&op.id).await.unwrap();
        assert_eq!(reloaded.version, 1);
        assert_eq!(reloaded.state, OperationState::InProgress);
    }

    pub async fn stale_update_conflicts(storage: &BrokerStorage) {
        let ops = storage.operations();
        let op = Operation::new(unique_id("op"), "inst-1", DeprovisioningData::default());
        ops.insert_deprovisioning_operation(&op).await.unwrap();

        let mut fresh = op.clone();
        fresh.description = "fresh".to_string();
        ops.update_deprovisioning_operation(&fresh).await.unwrap();

        let mut stale = op.clone();
        stale.description = "stale".to_string();
        let err = ops
            .update_deprovisioning_operation(&stale)
            .await
            .unwrap_err();

        assert!(err.is_conflict(), "got {err:?}");
        let stored = ops.get_deprovisioning_operation_by_id(&op.id).await.unwrap();
        assert_eq!(stored.description, "fresh");
        assert_eq!(stored.version, 1);
    }

    pub async fn update_of_missing_operation_is_not_found(storage: &BrokerStorage) {
        let op = Operation::new(unique_id("op"), "inst-1", DeprovisioningData::default());
        let err = storage
            .operations()
            .update_deprovisioning_operation(&op)
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
    }

    pub async fn concurrent_updates_have_single_winner(storage: &BrokerStorage) {
        let op = Operation::new(unique_id("op"), "inst-1", DeprovisioningData::default());
        storage
            .operations()
            .insert_deprovisioning_operation(&op)
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                let mut candidate = op.clone();
                candidate.description = format!("writer-{i}");
                tokio::spawn(async move {
                    storage
                        .operations()
                        .update_deprovisioning_operation(&candidate)
                        .await
                })
            })
            .collect();

        let mut applied = 0;
        for result in futures::future::join_all(handles).await {
            match result.unwrap() {
                Ok(updated) => {
                    applied += 1;
                    assert_eq!(updated.version, 1);
                }
                Err(e) => assert!(e.is_conflict(), "got {e:?}"),
            }
        }
        assert_eq!(applied, 1);
    }

    pub async fn typed_get_with_wrong_type_is_not_found(storage: &BrokerStorage) {
        let ops = storage.operations();
        let op = Operation::new(unique_id("op"), "inst-1", ProvisioningData::default());
        ops.insert_provisioning_operation(&op).await.unwrap();

        let err = ops
            .get_deprovisioning_operation_by_id(&op.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "got {err:?}");

        let generic = ops.get_operation_by_id(&op.id).await.unwrap();
        assert_eq!(generic.operation_type(), OperationType::Provision);
    }

    pub async fn get_by_instance_id_returns_newest(storage: &BrokerStorage) {
        let ops = storage.operations();
        let instance_id = unique_id("inst");
        let mut older = Operation::new(unique_id("op"), &instance_id, DeprovisioningData::default());
        older.created_at = minutes_ago(10);
        let mut newer = Operation::new(unique_id("op"), &instance_id, DeprovisioningData::default());
        newer.created_at = minutes_ago(1);
        ops.insert_deprovisioning_operation(&older).await.unwrap();
        ops.insert_deprovisioning_operation(&newer).await.unwrap();

        let found = ops
            .get_deprovisioning_operation_by_instance_id(&instance_id)
            .await
            .unwrap();
        assert_eq!(found.id, newer.id);

        let err = ops
            .get_provisioning_operation_by_instance_id(&instance_id)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    pub async fn grouping_orders_each_list(storage: &BrokerStorage) {
        let ops = storage.operations();
        let instance_id = unique_id("inst");

        let mut provision_old = Operation::new(unique_id("p"), &instance_id, ProvisioningData::default());
        provision_old.created_at = minutes_ago(60);
        let mut provision_new = Operation::new(unique_id("p"), &instance_id, ProvisioningData::default());
        provision_new.created_at = minutes_ago(50);
        let mut deprovision = Operation::new(unique_id("d"), &instance_id, DeprovisioningData::default());
        deprovision.created_at = minutes_ago(5);
        let mut upgrade_old = Operation::new(unique_id("u"), &instance_id, UpgradeClusterData::default());
        upgrade_old.created_at = minutes_ago(40);
        let mut upgrade_new = Operation::new(unique_id("u"), &instance_id, UpgradeClusterData::default());
        upgrade_new.created_at = minutes_ago(30);
        let mut update_old = Operation::new(unique_id("up"), &instance_id, UpdatingData::default());
        update_old.created_at = minutes_ago(20);
        let mut update_new = Operation::new(unique_id("up"), &instance_id, UpdatingData::default());
        update_new.created_at = minutes_ago(10);

        ops.insert_operation(&provision_new).await.unwrap();
        ops.insert_operation(&provision_old).await.unwrap();
        ops.insert_operation(&upgrade_new).await.unwrap();
        ops.insert_operation(&upgrade_old).await.unwrap();
        ops.insert_operation(&update_new).await.unwrap();
        ops.insert_operation(&update_old).await.unwrap();
        ops.insert_operation(&deprovision).await.unwrap();

        let grouped = ops
            .list_operations_by_instance_id_group_by_type(&instance_id)
            .await
            .unwrap();

        assert_eq!(
            ids(&grouped.provision_operations),
            vec![provision_new.id.clone(), provision_old.id.clone()]
        );
        assert_eq!(
            ids(&grouped.deprovision_operations),
            vec![deprovision.id.clone()]
        );
        assert_eq!(
            ids(&grouped.upgrade_cluster_operations),
            vec![upgrade_old.id.clone(), upgrade_new.id.clone()]
        );
        assert_eq!(
            ids(&grouped.update_operations),
            vec![update_old.id.clone(), update_new.id.clone()]
        );
    }

    pub async fn last_operation_skips_pending(storage: &BrokerStorage) {
        let ops = storage.operations();
        let instance_id = unique_id("inst");

        let err = ops.get_last_operation(&instance_id).await.unwrap_err();
        assert!(err.is_not_found());

        let mut provision = Operation::new(unique_id("p"), &instance_id, ProvisioningData::default());
        provision.created_at = minutes_ago(30);
        provision.state = OperationState::Succeeded;
        let mut upgrade = Operation::new(unique_id("u"), &instance_id, UpgradeClusterData::default());
        upgrade.created_at = minutes_ago(10);
        upgrade.state = OperationState::InProgress;
        let mut pending = Operation::new(unique_id("d"), &instance_id, DeprovisioningData::default());
        pending.created_at = minutes_ago(1);

        ops.insert_operation(&provision).await.unwrap();
        ops.insert_operation(&upgrade).await.unwrap();
        ops.insert_operation(&pending).await.unwrap();

        let last = ops.get_last_operation(&instance_id).await.unwrap();
        assert_eq!(last.id, upgrade.id);

        let last_provision = ops
            .get_last_operation_by_types(&instance_id, &[OperationType::Provision])
            .await
            .unwrap();
        assert_eq!(last_provision.id, provision.id);

        let err = ops
            .get_last_operation_by_types(&instance_id, &[OperationType::Deprovision])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    pub async fn time_range_selects_recent_operations(storage: &BrokerStorage) {
        let ops = storage.operations();
        let instance_id = unique_id("inst");
        let mut old = Operation::new(unique_id("op"), &instance_id, DeprovisioningData::default());
        old.created_at = minutes_ago(600);
        old.updated_at = minutes_ago(600);
        let mut recent = Operation::new(unique_id("op"), &instance_id, DeprovisioningData::default());
        recent.created_at = minutes_ago(5);
        recent.updated_at = minutes_ago(5);
        ops.insert_operation(&old).await.unwrap();
        ops.insert_operation(&recent).await.unwrap();

        let found = ops
            .list_operations_in_time_range(minutes_ago(60), Utc::now())
            .await
            .unwrap();

        assert!(found.iter().any(|o| o.id == recent.id));
        assert!(!found.iter().any(|o| o.id == old.id));
    }

    pub async fn operations_for_ids(storage: &BrokerStorage) {
        let ops = storage.operations();
        let a = Operation::new(unique_id("op"), "inst-1", DeprovisioningData::default());
        let b = Operation::new(unique_id("op"), "inst-2", ProvisioningData::default());
        ops.insert_operation(&a).await.unwrap();
        ops.insert_operation(&b).await.unwrap();

        let found = ops
            .get_operations_for_ids(&[a.id.clone(), b.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let err = ops
            .get_operations_for_ids(&["missing".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    pub async fn stats_by_plan(storage: &BrokerStorage) {
        let ops = storage.operations();
        let plan = unique_id("plan");

        for state in [
            OperationState::InProgress,
            OperationState::InProgress,
            OperationState::Succeeded,
        ] {
            let mut op = Operation::new(unique_id("p"), "inst-1", ProvisioningData::default())
                .with_parameters(parameters(&plan, "sub-1"));
            op.state = state;
            ops.insert_operation(&op).await.unwrap();
        }
        let mut deprovision = Operation::new(unique_id("d"), "inst-1", DeprovisioningData::default())
            .with_parameters(parameters(&plan, "sub-1"));
        deprovision.state = OperationState::Failed;
        ops.insert_operation(&deprovision).await.unwrap();
        // No plan id: ignored by the statistics.
        let mut orphan = Operation::new(unique_id("p"), "inst-2", ProvisioningData::default());
        orphan.state = OperationState::InProgress;
        ops.insert_operation(&orphan).await.unwrap();

        let stats = ops.get_operation_stats_by_plan().await.unwrap();
        let plan_stats = stats.get(&plan).expect("plan present");
        assert_eq!(plan_stats.provisioning.get(&OperationState::InProgress), Some(&2));
        assert_eq!(plan_stats.provisioning.get(&OperationState::Succeeded), Some(&1));
        assert_eq!(plan_stats.deprovisioning.get(&OperationState::Failed), Some(&1));
        assert!(!stats.contains_key(""));

        let v2 = ops.get_operation_stats_by_plan_v2().await.unwrap();
        let row = v2
            .iter()
            .find(|r| r.plan_id == plan)
            .expect("in-progress row for plan");
        assert_eq!(row.operation_type, OperationType::Provision);
        assert_eq!(row.state, OperationState::InProgress);
        assert_eq!(row.count, 2);
        assert!(v2.iter().all(|r| r.state == OperationState::InProgress));
    }

    pub async fn list_operations_pages_and_filters(storage: &BrokerStorage) {
        let ops = storage.operations();
        let instance_id = unique_id("inst");
        for minutes in 1..=5 {
            let mut op = Operation::new(unique_id("op"), &instance_id, DeprovisioningData::default());
            op.created_at = minutes_ago(minutes);
            op.state = if minutes % 2 == 0 {
                OperationState::Failed
            } else {
                OperationState::Canceled
            };
            ops.insert_operation(&op).await.unwrap();
        }

        let page = ops
            .list_operations(&OperationFilter {
                page: 1,
                page_size: 2,
                states: vec![OperationState::Canceled],
            })
            .await
            .unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.operations.len(), 2);
        assert!(page.total_count >= 3);
        assert!(page
            .operations
            .iter()
            .all(|o| o.state == OperationState::Canceled));
    }

    pub async fn not_finished_operations_by_type(storage: &BrokerStorage) {
        let ops = storage.operations();
        let mut running = Operation::new(unique_id("d"), "inst-1", DeprovisioningData::default());
        running.state = OperationState::InProgress;
        let mut done = Operation::new(unique_id("d"), "inst-1", DeprovisioningData::default());
        done.state = OperationState::Succeeded;
        ops.insert_operation(&running).await.unwrap();
        ops.insert_operation(&done).await.unwrap();

        let found = ops
            .get_not_finished_operations_by_type(OperationType::Deprovision)
            .await
            .unwrap();
        assert!(found.iter().any(|o| o.id == running.id));
        assert!(!found.iter().any(|o| o.id == done.id));
    }

    pub async fn delete_by_id_is_idempotent(storage: &BrokerStorage) {
        let ops = storage.operations();
        let op = Operation::new(unique_id("op"), "inst-1", DeprovisioningData::default());
        ops.insert_operation(&op).await.unwrap();

        ops.delete_by_id(&op.id).await.unwrap();
        ops.delete_by_id(&op.id).await.unwrap();

        let err = ops.get_operation_by_id(&op.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    pub async fn instance_lifecycle(storage: &BrokerStorage) {
        let instances = storage.instances();
        let subaccount = unique_id("sub");
        let mut instance = Instance::new(unique_id("inst"), parameters("plan-aws", &subaccount));
        instance.runtime_id = "rt-1".to_string();

        instances.insert(&instance).await.unwrap();
        let err = instances.insert(&instance).await.unwrap_err();
        assert!(err.is_already_exists());

        let loaded = instances.get_by_id(&instance.instance_id).await.unwrap();
        assert_eq!(loaded.runtime_id, "rt-1");
        assert_eq!(loaded.subaccount_id, subaccount);
        assert_eq!(loaded.parameters, instance.parameters);

        let mut changed = loaded.clone();
        changed.runtime_id = String::new();
        let updated = instances.update(&changed).await.unwrap();
        assert_eq!(updated.version, 1);

        let err = instances.update(&changed).await.unwrap_err();
        assert!(err.is_conflict(), "got {err:?}");

        let found = instances
            .find_all_instances_for_subaccounts(&[subaccount.clone()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].runtime_id, "");

        instances.delete(&instance.instance_id).await.unwrap();
        instances.delete(&instance.instance_id).await.unwrap();
        let err = instances.get_by_id(&instance.instance_id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    pub async fn instance_details_come_from_last_operation(storage: &BrokerStorage) {
        let instance = Instance::new(unique_id("inst"), parameters("plan-aws", "sub-1"));
        storage.instances().insert(&instance).await.unwrap();

        let mut op = Operation::new(unique_id("p"), &instance.instance_id, ProvisioningData::default());
        op.state = OperationState::Succeeded;
        op.instance_details.runtime_id = "rt-42".to_string();
        op.instance_details.shoot_name = "c-42".to_string();
        storage.operations().insert_operation(&op).await.unwrap();

        let loaded = storage.instances().get_by_id(&instance.instance_id).await.unwrap();
        assert_eq!(loaded.instance_details.runtime_id, "rt-42");
        assert_eq!(loaded.instance_details.shoot_name, "c-42");
    }

    pub async fn deleted_instance_ids(storage: &BrokerStorage) {
        let instances = storage.instances();
        let mut deleted = Instance::new(unique_id("inst"), parameters("plan-aws", "sub-1"));
        deleted.deleted_at = Some(minutes_ago(5));
        let live = Instance::new(unique_id("inst"), parameters("plan-aws", "sub-1"));
        instances.insert(&deleted).await.unwrap();
        instances.insert(&live).await.unwrap();

        let ids = instances.list_deleted_instance_ids(1000).await.unwrap();
        assert!(ids.contains(&deleted.instance_id));
        assert!(!ids.contains(&live.instance_id));
    }

    fn same_instant(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        (a - b).num_milliseconds().abs() < 1
    }

    pub async fn all_operations_are_listed(storage: &BrokerStorage) {
        let ops = storage.operations();
        let provisioning = Operation::new(unique_id("p"), "inst-1", ProvisioningData::default());
        let upgrade = Operation::new(unique_id("u"), "inst-1", UpgradeClusterData::default());
        ops.insert_operation(&provisioning).await.unwrap();
        ops.insert_operation(&upgrade).await.unwrap();

        let all = ids(&ops.get_all_operations().await.unwrap());
        assert!(all.contains(&provisioning.id));
        assert!(all.contains(&upgrade.id));
    }

    pub async fn instances_for_runtimes(storage: &BrokerStorage) {
        let instances = storage.instances();
        let runtime = unique_id("rt");
        let mut live = Instance::new(unique_id("inst"), parameters("plan-aws", "sub-1"));
        live.runtime_id = runtime.clone();
        let mut deleted = Instance::new(unique_id("inst"), parameters("plan-aws", "sub-1"));
        deleted.runtime_id = runtime.clone();
        deleted.deleted_at = Some(minutes_ago(1));
        instances.insert(&live).await.unwrap();
        instances.insert(&deleted).await.unwrap();

        let found = instances
            .find_all_instances_for_runtimes(&[runtime, unique_id("rt")])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instance_id, live.instance_id);

        let err = instances
            .find_all_instances_for_runtimes(&[unique_id("rt")])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    pub async fn distinct_subaccounts_skip_deleted(storage: &BrokerStorage) {
        let instances = storage.instances();
        let live_sub = unique_id("sub");
        let gone_sub = unique_id("sub");
        for _ in 0..2 {
            let instance = Instance::new(unique_id("inst"), parameters("plan-aws", &live_sub));
            instances.insert(&instance).await.unwrap();
        }
        let mut deleted = Instance::new(unique_id("inst"), parameters("plan-aws", &gone_sub));
        deleted.deleted_at = Some(minutes_ago(1));
        instances.insert(&deleted).await.unwrap();

        let subaccounts = instances.get_distinct_subaccounts().await.unwrap();
        assert_eq!(subaccounts.iter().filter(|s| **s == live_sub).count(), 1);
        assert!(!subaccounts.contains(&gone_sub));
    }

    pub async fn instances_counted_per_global_account(storage: &BrokerStorage) {
        let instances = storage.instances();
        let global_account = unique_id("ga");
        let subaccount = unique_id("sub");
        for deleted_at in [None, None, Some(minutes_ago(1))] {
            let mut instance = Instance::new(unique_id("inst"), parameters("plan-aws", &subaccount));
            instance.global_account_id = global_account.clone();
            instance.deleted_at = deleted_at;
            instances.insert(&instance).await.unwrap();
        }

        let count = instances
            .get_number_of_instances_for_global_account_id(&global_account)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let stats = instances.get_active_instance_stats().await.unwrap();
        assert_eq!(stats.per_global_account_id.get(&global_account), Some(&2));
        assert_eq!(stats.per_subaccount_id.get(&subaccount), Some(&2));
        assert!(stats.total_number_of_instances >= 2);
    }

    pub async fn instance_list_filters_and_pages(storage: &BrokerStorage) {
        let instances = storage.instances();
        let subaccount = unique_id("sub");
        let mut first = Instance::new(unique_id("inst"), parameters("plan-aws", &subaccount));
        first.created_at = minutes_ago(30);
        first.service_plan_name = "aws".to_string();
        let mut expired = Instance::new(unique_id("inst"), parameters("plan-trial", &subaccount));
        expired.created_at = minutes_ago(20);
        expired.service_plan_name = "trial".to_string();
        expired.expired_at = Some(minutes_ago(5));
        let mut deleted = Instance::new(unique_id("inst"), parameters("plan-aws", &subaccount));
        deleted.deleted_at = Some(minutes_ago(1));
        for instance in [&first, &expired, &deleted] {
            instances.insert(instance).await.unwrap();
        }

        let page = instances
            .list(&InstanceFilter {
                page_size: 1,
                subaccount_ids: vec![subaccount.clone()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.count, 1);
        assert_eq!(page.instances[0].instance_id, first.instance_id);

        let page = instances
            .list(&InstanceFilter {
                page: 2,
                page_size: 1,
                subaccount_ids: vec![subaccount.clone()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.instances[0].instance_id, expired.instance_id);

        let only_expired = instances
            .list(&InstanceFilter {
                subaccount_ids: vec![subaccount.clone()],
                expired: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(only_expired.total_count, 1);
        assert_eq!(only_expired.instances[0].instance_id, expired.instance_id);

        let by_plan = instances
            .list(&InstanceFilter {
                subaccount_ids: vec![subaccount.clone()],
                plan_names: vec!["aws".to_string(), "azure".to_string()],
                expired: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_plan.total_count, 1);
        assert_eq!(by_plan.instances[0].instance_id, first.instance_id);
    }

    /// Exact counts; only valid on an otherwise empty store.
    pub async fn ers_context_stats_count_license_types(storage: &BrokerStorage) {
        let instances = storage.instances();
        let mut unlicensed = parameters("plan-aws", "sub-2");
        unlicensed.ers_context.license_type = None;
        for params in [
            parameters("plan-aws", "sub-1"),
            parameters("plan-aws", "sub-1"),
            unlicensed,
        ] {
            instances
                .insert(&Instance::new(unique_id("inst"), params))
                .await
                .unwrap();
        }
        let mut deleted = Instance::new(unique_id("inst"), parameters("plan-aws", "sub-3"));
        deleted.deleted_at = Some(minutes_ago(1));
        instances.insert(&deleted).await.unwrap();

        let stats = instances.get_ers_context_stats().await.unwrap();
        assert_eq!(stats.license_type.get("CUSTOMER"), Some(&2));
        assert_eq!(stats.license_type.get(""), Some(&1));
        assert_eq!(stats.license_type.len(), 2);
    }

    pub async fn binding_lifecycle(storage: &BrokerStorage) {
        let bindings = storage.bindings();
        let instance_id = unique_id("inst");
        let mut older = Binding::new("binding-1", &instance_id, "apiVersion: v1\nkind: Config", 600);
        older.created_at = minutes_ago(10);
        older.created_by = "jane@example.com".to_string();
        let newer = Binding::new("binding-2", &instance_id, "apiVersion: v1", 1200);

        bindings.insert(&newer).await.unwrap();
        bindings.insert(&older).await.unwrap();
        let err = bindings.insert(&older).await.unwrap_err();
        assert!(err.is_already_exists());

        let loaded = bindings.get(&instance_id, "binding-1").await.unwrap();
        assert_eq!(loaded.kubeconfig, older.kubeconfig);
        assert_eq!(loaded.created_by, "jane@example.com");
        assert_eq!(loaded.expiration_seconds, 600);
        assert!(same_instant(loaded.expires_at, older.expires_at));

        let listed: Vec<String> = bindings
            .list_by_instance_id(&instance_id)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(listed, vec!["binding-1", "binding-2"]);

        let mut renewed = loaded.clone();
        renewed.kubeconfig = "apiVersion: v2".to_string();
        renewed.expires_at = renewed.expires_at + ChronoDuration::minutes(30);
        bindings.update(&renewed).await.unwrap();
        let loaded = bindings.get(&instance_id, "binding-1").await.unwrap();
        assert_eq!(loaded.kubeconfig, "apiVersion: v2");
        assert!(same_instant(loaded.created_at, older.created_at));

        let missing = Binding::new("binding-9", &instance_id, "x", 60);
        let err = bindings.update(&missing).await.unwrap_err();
        assert!(err.is_not_found());

        bindings.delete(&instance_id, "binding-1").await.unwrap();
        bindings.delete(&instance_id, "binding-1").await.unwrap();
        let err = bindings.get(&instance_id, "binding-1").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(bindings.list_by_instance_id(&instance_id).await.unwrap().len(), 1);
    }

    pub async fn expired_bindings_and_stats(storage: &BrokerStorage) {
        let bindings = storage.bindings();
        let instance_id = unique_id("inst");
        let mut expired = Binding::new("expired", &instance_id, "apiVersion: v1", 600);
        expired.created_at = minutes_ago(40);
        expired.expires_at = minutes_ago(30);
        let live = Binding::new("live", &instance_id, "apiVersion: v1", 600);
        bindings.insert(&expired).await.unwrap();
        bindings.insert(&live).await.unwrap();

        let listed = bindings.list_expired().await.unwrap();
        assert!(
            listed
                .iter()
                .any(|b| b.instance_id == instance_id && b.id == "expired")
        );
        assert!(
            !listed
                .iter()
                .any(|b| b.instance_id == instance_id && b.id == "live")
        );

        let stats = bindings.get_statistics().await.unwrap();
        let minutes = stats.minutes_since_earliest_expiration.unwrap();
        assert!(minutes >= 29.9, "got {minutes}");
    }

    /// Only valid on an otherwise empty store.
    pub async fn binding_stats_without_expired_bindings(storage: &BrokerStorage) {
        let bindings = storage.bindings();
        bindings
            .insert(&Binding::new("live", unique_id("inst"), "apiVersion: v1", 600))
            .await
            .unwrap();

        assert!(bindings.list_expired().await.unwrap().is_empty());
        let stats = bindings.get_statistics().await.unwrap();
        assert_eq!(stats.minutes_since_earliest_expiration, None);
    }
}
