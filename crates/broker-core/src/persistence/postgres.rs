// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL storage backend.
//!
//! Provides the raw row access used by the operation, instance and binding
//! stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::StorageError;
use crate::model::{InstanceFilter, OperationFilter, OperationState, OperationType};

use super::{
    BindingRow, InstanceCountRow, InstanceRow, LicenseTypeCountRow, OperationRow,
    OperationStatsRow, StorageBackend, insert_error, query_error,
};

/// PostgreSQL-backed storage backend.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Create a new Postgres-backed backend from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const SELECT_OPERATIONS: &str = r#"
    SELECT id, instance_id, operation_type, state, description, created_at, updated_at,
           version, data, provisioning_parameters, finished_stages
    FROM operations
"#;

const SELECT_INSTANCES: &str = r#"
    SELECT instance_id, runtime_id, global_account_id, subaccount_id, service_plan_id,
           service_plan_name, provider_region, provisioning_parameters, created_at,
           updated_at, deleted_at, expired_at, version
    FROM instances
"#;

const SELECT_BINDINGS: &str = r#"
    SELECT id, instance_id, kubeconfig, expiration_seconds, created_by, created_at, expires_at
    FROM bindings
"#;

/// Live instances matching an [`InstanceFilter`]; binds `$1`..`$8`.
const INSTANCE_FILTER: &str = r#"
    WHERE deleted_at IS NULL
      AND (cardinality($1::text[]) = 0 OR instance_id = ANY($1))
      AND (cardinality($2::text[]) = 0 OR global_account_id = ANY($2))
      AND (cardinality($3::text[]) = 0 OR subaccount_id = ANY($3))
      AND (cardinality($4::text[]) = 0 OR runtime_id = ANY($4))
      AND (cardinality($5::text[]) = 0 OR provider_region = ANY($5))
      AND (cardinality($6::text[]) = 0 OR service_plan_id = ANY($6))
      AND (cardinality($7::text[]) = 0 OR service_plan_name = ANY($7))
      AND ($8::boolean IS NULL OR (expired_at IS NOT NULL) = $8)
"#;

fn type_names(types: &[OperationType]) -> Vec<String> {
    types.iter().map(|t| t.as_str().to_string()).collect()
}

// ============================================================================
// Operations
// ============================================================================

pub async fn insert_operation(pool: &PgPool, row: &OperationRow) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO operations (id, instance_id, operation_type, state, description,
                                created_at, updated_at, version, data,
                                provisioning_parameters, finished_stages)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&row.id)
    .bind(&row.instance_id)
    .bind(&row.operation_type)
    .bind(&row.state)
    .bind(&row.description)
    .bind(row.created_at)
    .bind(row.updated_at)
    .bind(row.version)
    .bind(&row.data)
    .bind(&row.provisioning_parameters)
    .bind(&row.finished_stages)
    .execute(pool)
    .await
    .map_err(insert_error("operation", &row.id))?;

    Ok(())
}

pub async fn get_operation_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<OperationRow>, StorageError> {
    let sql = format!("{SELECT_OPERATIONS} WHERE id = $1");
    sqlx::query_as::<_, OperationRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(query_error("get_operation_by_id"))
}

pub async fn list_all_operations(pool: &PgPool) -> Result<Vec<OperationRow>, StorageError> {
    let sql = format!("{SELECT_OPERATIONS} ORDER BY created_at DESC, id DESC");
    sqlx::query_as::<_, OperationRow>(&sql)
        .fetch_all(pool)
        .await
        .map_err(query_error("list_all_operations"))
}

pub async fn get_operations_for_ids(
    pool: &PgPool,
    ids: &[String],
) -> Result<Vec<OperationRow>, StorageError> {
    let sql = format!("{SELECT_OPERATIONS} WHERE id = ANY($1) ORDER BY created_at DESC, id DESC");
    sqlx::query_as::<_, OperationRow>(&sql)
        .bind(ids)
        .fetch_all(pool)
        .await
        .map_err(query_error("get_operations_for_ids"))
}

pub async fn list_operations_by_instance_id(
    pool: &PgPool,
    instance_id: &str,
) -> Result<Vec<OperationRow>, StorageError> {
    let sql =
        format!("{SELECT_OPERATIONS} WHERE instance_id = $1 ORDER BY created_at DESC, id DESC");
    sqlx::query_as::<_, OperationRow>(&sql)
        .bind(instance_id)
        .fetch_all(pool)
        .await
        .map_err(query_error("list_operations_by_instance_id"))
}

pub async fn list_operations_by_type_and_instance_id(
    pool: &PgPool,
    instance_id: &str,
    operation_type: OperationType,
) -> Result<Vec<OperationRow>, StorageError> {
    let sql = format!(
        "{SELECT_OPERATIONS} WHERE instance_id = $1 AND operation_type = $2 \
         ORDER BY created_at DESC, id DESC"
    );
    sqlx::query_as::<_, OperationRow>(&sql)
        .bind(instance_id)
        .bind(operation_type.as_str())
        .fetch_all(pool)
        .await
        .map_err(query_error("list_operations_by_type_and_instance_id"))
}

pub async fn list_operations_by_type(
    pool: &PgPool,
    operation_type: OperationType,
) -> Result<Vec<OperationRow>, StorageError> {
    let sql =
        format!("{SELECT_OPERATIONS} WHERE operation_type = $1 ORDER BY created_at DESC, id DESC");
    sqlx::query_as::<_, OperationRow>(&sql)
        .bind(operation_type.as_str())
        .fetch_all(pool)
        .await
        .map_err(query_error("list_operations_by_type"))
}

pub async fn list_operations_in_time_range(
    pool: &PgPool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<OperationRow>, StorageError> {
    let sql = format!(
        "{SELECT_OPERATIONS} WHERE (created_at BETWEEN $1 AND $2) OR (updated_at BETWEEN $1 AND $2) \
         ORDER BY created_at DESC, id DESC"
    );
    sqlx::query_as::<_, OperationRow>(&sql)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
        .map_err(query_error("list_operations_in_time_range"))
}

pub async fn get_last_operation(
    pool: &PgPool,
    instance_id: &str,
    types: &[OperationType],
) -> Result<Option<OperationRow>, StorageError> {
    let sql = format!(
        "{SELECT_OPERATIONS} WHERE instance_id = $1 AND state <> $2 \
         AND (cardinality($3::text[]) = 0 OR operation_type = ANY($3)) \
         ORDER BY created_at DESC, id DESC LIMIT 1"
    );
    sqlx::query_as::<_, OperationRow>(&sql)
        .bind(instance_id)
        .bind(OperationState::Pending.as_str())
        .bind(type_names(types))
        .fetch_optional(pool)
        .await
        .map_err(query_error("get_last_operation"))
}

pub async fn list_operations_by_type_and_state(
    pool: &PgPool,
    operation_type: OperationType,
    state: OperationState,
) -> Result<Vec<OperationRow>, StorageError> {
    let sql = format!(
        "{SELECT_OPERATIONS} WHERE operation_type = $1 AND state = $2 ORDER BY created_at DESC, id DESC"
    );
    sqlx::query_as::<_, OperationRow>(&sql)
        .bind(operation_type.as_str())
        .bind(state.as_str())
        .fetch_all(pool)
        .await
        .map_err(query_error("list_operations_by_type_and_state"))
}

pub async fn list_operations(
    pool: &PgPool,
    filter: &OperationFilter,
) -> Result<(Vec<OperationRow>, i64), StorageError> {
    let states: Vec<String> = filter
        .states
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();

    let sql = format!(
        "{SELECT_OPERATIONS} WHERE cardinality($1::text[]) = 0 OR state = ANY($1) \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    );
    let rows = sqlx::query_as::<_, OperationRow>(&sql)
        .bind(&states)
        .bind(i64::from(filter.page_size))
        .bind(filter.offset())
        .fetch_all(pool)
        .await
        .map_err(query_error("list_operations"))?;

    let total: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM operations WHERE cardinality($1::text[]) = 0 OR state = ANY($1)",
    )
    .bind(&states)
    .fetch_one(pool)
    .await
    .map_err(query_error("count_operations"))?;

    Ok((rows, total.0))
}

pub async fn operation_stats(
    pool: &PgPool,
    state: Option<OperationState>,
) -> Result<Vec<OperationStatsRow>, StorageError> {
    sqlx::query_as::<_, OperationStatsRow>(
        r#"
        SELECT operation_type,
               state,
               (provisioning_parameters::json ->> 'plan_id') AS plan_id,
               COUNT(*) AS count
        FROM operations
        WHERE $1::text IS NULL OR state = $1
        GROUP BY operation_type, state, plan_id
        "#,
    )
    .bind(state.map(|s| s.as_str()))
    .fetch_all(pool)
    .await
    .map_err(query_error("operation_stats"))
}

pub async fn update_operation(pool: &PgPool, row: &OperationRow) -> Result<u64, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE operations
        SET instance_id = $2,
            state = $3,
            description = $4,
            updated_at = $5,
            data = $6,
            provisioning_parameters = $7,
            finished_stages = $8,
            version = version + 1
        WHERE id = $1 AND version = $9
        "#,
    )
    .bind(&row.id)
    .bind(&row.instance_id)
    .bind(&row.state)
    .bind(&row.description)
    .bind(row.updated_at)
    .bind(&row.data)
    .bind(&row.provisioning_parameters)
    .bind(&row.finished_stages)
    .bind(row.version)
    .execute(pool)
    .await
    .map_err(query_error("update_operation"))?;

    Ok(result.rows_affected())
}

pub async fn delete_operation(pool: &PgPool, id: &str) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM operations WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(query_error("delete_operation"))?;
    Ok(())
}

// ============================================================================
// Instances
// ============================================================================

pub async fn insert_instance(pool: &PgPool, row: &InstanceRow) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO instances (instance_id, runtime_id, global_account_id, subaccount_id,
                               service_plan_id, service_plan_name, provider_region,
                               provisioning_parameters, created_at, updated_at,
                               deleted_at, expired_at, version)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&row.instance_id)
    .bind(&row.runtime_id)
    .bind(&row.global_account_id)
    .bind(&row.subaccount_id)
    .bind(&row.service_plan_id)
    .bind(&row.service_plan_name)
    .bind(&row.provider_region)
    .bind(&row.provisioning_parameters)
    .bind(row.created_at)
    .bind(row.updated_at)
    .bind(row.deleted_at)
    .bind(row.expired_at)
    .bind(row.version)
    .execute(pool)
    .await
    .map_err(insert_error("instance", &row.instance_id))?;

    Ok(())
}

pub async fn get_instance_by_id(
    pool: &PgPool,
    instance_id: &str,
) -> Result<Option<InstanceRow>, StorageError> {
    let sql = format!("{SELECT_INSTANCES} WHERE instance_id = $1");
    sqlx::query_as::<_, InstanceRow>(&sql)
        .bind(instance_id)
        .fetch_optional(pool)
        .await
        .map_err(query_error("get_instance_by_id"))
}

pub async fn find_instances_for_subaccounts(
    pool: &PgPool,
    subaccount_ids: &[String],
) -> Result<Vec<InstanceRow>, StorageError> {
    let sql = format!("{SELECT_INSTANCES} WHERE subaccount_id = ANY($1) ORDER BY created_at");
    sqlx::query_as::<_, InstanceRow>(&sql)
        .bind(subaccount_ids)
        .fetch_all(pool)
        .await
        .map_err(query_error("find_instances_for_subaccounts"))
}

pub async fn find_instances_for_runtimes(
    pool: &PgPool,
    runtime_ids: &[String],
) -> Result<Vec<InstanceRow>, StorageError> {
    let sql = format!(
        "{SELECT_INSTANCES} WHERE deleted_at IS NULL AND runtime_id = ANY($1) \
         ORDER BY created_at, instance_id"
    );
    sqlx::query_as::<_, InstanceRow>(&sql)
        .bind(runtime_ids)
        .fetch_all(pool)
        .await
        .map_err(query_error("find_instances_for_runtimes"))
}

pub async fn list_distinct_subaccounts(pool: &PgPool) -> Result<Vec<String>, StorageError> {
    sqlx::query_scalar(
        r#"
        SELECT DISTINCT subaccount_id FROM instances
        WHERE deleted_at IS NULL AND subaccount_id <> ''
        ORDER BY subaccount_id
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(query_error("list_distinct_subaccounts"))
}

pub async fn count_instances_for_global_account(
    pool: &PgPool,
    global_account_id: &str,
) -> Result<i64, StorageError> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM instances WHERE global_account_id = $1 AND deleted_at IS NULL",
    )
    .bind(global_account_id)
    .fetch_one(pool)
    .await
    .map_err(query_error("count_instances_for_global_account"))
}

pub async fn list_instances(
    pool: &PgPool,
    filter: &InstanceFilter,
) -> Result<(Vec<InstanceRow>, i64), StorageError> {
    let sql = format!(
        "{SELECT_INSTANCES} {INSTANCE_FILTER} ORDER BY created_at, instance_id LIMIT $9 OFFSET $10"
    );
    let rows = sqlx::query_as::<_, InstanceRow>(&sql)
        .bind(&filter.instance_ids)
        .bind(&filter.global_account_ids)
        .bind(&filter.subaccount_ids)
        .bind(&filter.runtime_ids)
        .bind(&filter.regions)
        .bind(&filter.plan_ids)
        .bind(&filter.plan_names)
        .bind(filter.expired)
        .bind(i64::from(filter.page_size))
        .bind(filter.offset())
        .fetch_all(pool)
        .await
        .map_err(query_error("list_instances"))?;

    let count_sql = format!("SELECT COUNT(*) FROM instances {INSTANCE_FILTER}");
    let total: (i64,) = sqlx::query_as(&count_sql)
        .bind(&filter.instance_ids)
        .bind(&filter.global_account_ids)
        .bind(&filter.subaccount_ids)
        .bind(&filter.runtime_ids)
        .bind(&filter.regions)
        .bind(&filter.plan_ids)
        .bind(&filter.plan_names)
        .bind(filter.expired)
        .fetch_one(pool)
        .await
        .map_err(query_error("count_instances"))?;

    Ok((rows, total.0))
}

pub async fn active_instance_counts(pool: &PgPool) -> Result<Vec<InstanceCountRow>, StorageError> {
    sqlx::query_as::<_, InstanceCountRow>(
        r#"
        SELECT global_account_id, subaccount_id, COUNT(*) AS count
        FROM instances
        WHERE deleted_at IS NULL
        GROUP BY global_account_id, subaccount_id
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(query_error("active_instance_counts"))
}

pub async fn license_type_counts(
    pool: &PgPool,
) -> Result<Vec<LicenseTypeCountRow>, StorageError> {
    sqlx::query_as::<_, LicenseTypeCountRow>(
        r#"
        SELECT (provisioning_parameters::json -> 'ers_context' ->> 'license_type') AS license_type,
               COUNT(*) AS count
        FROM instances
        WHERE deleted_at IS NULL
        GROUP BY license_type
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(query_error("license_type_counts"))
}

pub async fn list_deleted_instance_ids(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<String>, StorageError> {
    sqlx::query_scalar(
        r#"
        SELECT instance_id FROM instances
        WHERE deleted_at IS NOT NULL
        ORDER BY deleted_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(query_error("list_deleted_instance_ids"))
}

pub async fn update_instance(pool: &PgPool, row: &InstanceRow) -> Result<u64, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE instances
        SET runtime_id = $2,
            global_account_id = $3,
            subaccount_id = $4,
            service_plan_id = $5,
            service_plan_name = $6,
            provider_region = $7,
            provisioning_parameters = $8,
            updated_at = $9,
            deleted_at = $10,
            expired_at = $11,
            version = version + 1
        WHERE instance_id = $1 AND version = $12
        "#,
    )
    .bind(&row.instance_id)
    .bind(&row.runtime_id)
    .bind(&row.global_account_id)
    .bind(&row.subaccount_id)
    .bind(&row.service_plan_id)
    .bind(&row.service_plan_name)
    .bind(&row.provider_region)
    .bind(&row.provisioning_parameters)
    .bind(row.updated_at)
    .bind(row.deleted_at)
    .bind(row.expired_at)
    .bind(row.version)
    .execute(pool)
    .await
    .map_err(query_error("update_instance"))?;

    Ok(result.rows_affected())
}

pub async fn delete_instance(pool: &PgPool, instance_id: &str) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM instances WHERE instance_id = $1")
        .bind(instance_id)
        .execute(pool)
        .await
        .map_err(query_error("delete_instance"))?;
    Ok(())
}

// ============================================================================
// Bindings
// ============================================================================

pub async fn insert_binding(pool: &PgPool, row: &BindingRow) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO bindings (id, instance_id, kubeconfig, expiration_seconds,
                              created_by, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&row.id)
    .bind(&row.instance_id)
    .bind(&row.kubeconfig)
    .bind(row.expiration_seconds)
    .bind(&row.created_by)
    .bind(row.created_at)
    .bind(row.expires_at)
    .execute(pool)
    .await
    .map_err(insert_error("binding", &row.id))?;

    Ok(())
}

pub async fn get_binding(
    pool: &PgPool,
    instance_id: &str,
    binding_id: &str,
) -> Result<Option<BindingRow>, StorageError> {
    let sql = format!("{SELECT_BINDINGS} WHERE instance_id = $1 AND id = $2");
    sqlx::query_as::<_, BindingRow>(&sql)
        .bind(instance_id)
        .bind(binding_id)
        .fetch_optional(pool)
        .await
        .map_err(query_error("get_binding"))
}

pub async fn update_binding(pool: &PgPool, row: &BindingRow) -> Result<u64, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE bindings
        SET kubeconfig = $3,
            expiration_seconds = $4,
            created_by = $5,
            expires_at = $6
        WHERE instance_id = $1 AND id = $2
        "#,
    )
    .bind(&row.instance_id)
    .bind(&row.id)
    .bind(&row.kubeconfig)
    .bind(row.expiration_seconds)
    .bind(&row.created_by)
    .bind(row.expires_at)
    .execute(pool)
    .await
    .map_err(query_error("update_binding"))?;

    Ok(result.rows_affected())
}

pub async fn delete_binding(
    pool: &PgPool,
    instance_id: &str,
    binding_id: &str,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM bindings WHERE instance_id = $1 AND id = $2")
        .bind(instance_id)
        .bind(binding_id)
        .execute(pool)
        .await
        .map_err(query_error("delete_binding"))?;
    Ok(())
}

pub async fn list_bindings(
    pool: &PgPool,
    instance_id: &str,
) -> Result<Vec<BindingRow>, StorageError> {
    let sql = format!("{SELECT_BINDINGS} WHERE instance_id = $1 ORDER BY created_at, id");
    sqlx::query_as::<_, BindingRow>(&sql)
        .bind(instance_id)
        .fetch_all(pool)
        .await
        .map_err(query_error("list_bindings"))
}

pub async fn list_expired_bindings(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<BindingRow>, StorageError> {
    let sql = format!("{SELECT_BINDINGS} WHERE expires_at < $1 ORDER BY expires_at, id");
    sqlx::query_as::<_, BindingRow>(&sql)
        .bind(now)
        .fetch_all(pool)
        .await
        .map_err(query_error("list_expired_bindings"))
}

/// Check database connectivity.
pub async fn health_check(pool: &PgPool) -> Result<bool, StorageError> {
    let result: Result<(i32,), _> = sqlx::query_as("SELECT 1").fetch_one(pool).await;
    Ok(result.is_ok())
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn insert_operation(&self, row: &OperationRow) -> Result<(), StorageError> {
        insert_operation(&self.pool, row).await
    }

    async fn get_operation_by_id(&self, id: &str) -> Result<Option<OperationRow>, StorageError> {
        get_operation_by_id(&self.pool, id).await
    }

    async fn list_all_operations(&self) -> Result<Vec<OperationRow>, StorageError> {
        list_all_operations(&self.pool).await
    }

    async fn get_operations_for_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<OperationRow>, StorageError> {
        get_operations_for_ids(&self.pool, ids).await
    }

    async fn list_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<OperationRow>, StorageError> {
        list_operations_by_instance_id(&self.pool, instance_id).await
    }

    async fn list_operations_by_type_and_instance_id(
        &self,
        instance_id: &str,
        operation_type: OperationType,
    ) -> Result<Vec<OperationRow>, StorageError> {
        list_operations_by_type_and_instance_id(&self.pool, instance_id, operation_type).await
    }

    async fn list_operations_by_type(
        &self,
        operation_type: OperationType,
    ) -> Result<Vec<OperationRow>, StorageError> {
        list_operations_by_type(&self.pool, operation_type).await
    }

    async fn list_operations_in_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OperationRow>, StorageError> {
        list_operations_in_time_range(&self.pool, from, to).await
    }

    async fn get_last_operation(
        &self,
        instance_id: &str,
        types: &[OperationType],
    ) -> Result<Option<OperationRow>, StorageError> {
        get_last_operation(&self.pool, instance_id, types).await
    }

    async fn list_operations_by_type_and_state(
        &self,
        operation_type: OperationType,
        state: OperationState,
    ) -> Result<Vec<OperationRow>, StorageError> {
        list_operations_by_type_and_state(&self.pool, operation_type, state).await
    }

    async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> Result<(Vec<OperationRow>, i64), StorageError> {
        list_operations(&self.pool, filter).await
    }

    async fn operation_stats(
        &self,
        state: Option<OperationState>,
    ) -> Result<Vec<OperationStatsRow>, StorageError> {
        operation_stats(&self.pool, state).await
    }

    async fn update_operation(&self, row: &OperationRow) -> Result<u64, StorageError> {
        update_operation(&self.pool, row).await
    }

    async fn delete_operation(&self, id: &str) -> Result<(), StorageError> {
        delete_operation(&self.pool, id).await
    }

    async fn insert_instance(&self, row: &InstanceRow) -> Result<(), StorageError> {
        insert_instance(&self.pool, row).await
    }

    async fn get_instance_by_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceRow>, StorageError> {
        get_instance_by_id(&self.pool, instance_id).await
    }

    async fn find_instances_for_subaccounts(
        &self,
        subaccount_ids: &[String],
    ) -> Result<Vec<InstanceRow>, StorageError> {
        find_instances_for_subaccounts(&self.pool, subaccount_ids).await
    }

    async fn find_instances_for_runtimes(
        &self,
        runtime_ids: &[String],
    ) -> Result<Vec<InstanceRow>, StorageError> {
        find_instances_for_runtimes(&self.pool, runtime_ids).await
    }

    async fn list_distinct_subaccounts(&self) -> Result<Vec<String>, StorageError> {
        list_distinct_subaccounts(&self.pool).await
    }

    async fn count_instances_for_global_account(
        &self,
        global_account_id: &str,
    ) -> Result<i64, StorageError> {
        count_instances_for_global_account(&self.pool, global_account_id).await
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<(Vec<InstanceRow>, i64), StorageError> {
        list_instances(&self.pool, filter).await
    }

    async fn active_instance_counts(&self) -> Result<Vec<InstanceCountRow>, StorageError> {
        active_instance_counts(&self.pool).await
    }

    async fn license_type_counts(&self) -> Result<Vec<LicenseTypeCountRow>, StorageError> {
        license_type_counts(&self.pool).await
    }

    async fn list_deleted_instance_ids(&self, limit: i64) -> Result<Vec<String>, StorageError> {
        list_deleted_instance_ids(&self.pool, limit).await
    }

    async fn update_instance(&self, row: &InstanceRow) -> Result<u64, StorageError> {
        update_instance(&self.pool, row).await
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), StorageError> {
        delete_instance(&self.pool, instance_id).await
    }

    async fn insert_binding(&self, row: &BindingRow) -> Result<(), StorageError> {
        insert_binding(&self.pool, row).await
    }

    async fn get_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<Option<BindingRow>, StorageError> {
        get_binding(&self.pool, instance_id, binding_id).await
    }

    async fn update_binding(&self, row: &BindingRow) -> Result<u64, StorageError> {
        update_binding(&self.pool, row).await
    }

    async fn delete_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<(), StorageError> {
        delete_binding(&self.pool, instance_id, binding_id).await
    }

    async fn list_bindings(&self, instance_id: &str) -> Result<Vec<BindingRow>, StorageError> {
        list_bindings(&self.pool, instance_id).await
    }

    async fn list_expired_bindings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BindingRow>, StorageError> {
        list_expired_bindings(&self.pool, now).await
    }

    async fn health_check(&self) -> Result<bool, StorageError> {
        health_check(&self.pool).await
    }
}
