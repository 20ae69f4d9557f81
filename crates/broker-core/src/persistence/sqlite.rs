//! SQLite-backed storage backend.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::StorageError;
use crate::model::{InstanceFilter, OperationFilter, OperationState, OperationType};

use super::{
    BindingRow, InstanceCountRow, InstanceRow, LicenseTypeCountRow, OperationRow,
    OperationStatsRow, StorageBackend, insert_error, query_error,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const SELECT_OPERATIONS: &str = "SELECT id, instance_id, operation_type, state, description, \
     created_at, updated_at, version, data, provisioning_parameters, finished_stages \
     FROM operations";

const SELECT_INSTANCES: &str = "SELECT instance_id, runtime_id, global_account_id, \
     subaccount_id, service_plan_id, service_plan_name, provider_region, \
     provisioning_parameters, created_at, updated_at, deleted_at, expired_at, version \
     FROM instances";

const SELECT_BINDINGS: &str = "SELECT id, instance_id, kubeconfig, expiration_seconds, \
     created_by, created_at, expires_at FROM bindings";

/// `AND column IN (...)` for a non-empty value list.
fn push_any_of<'a>(builder: &mut QueryBuilder<'a, Sqlite>, column: &str, values: &'a [String]) {
    if values.is_empty() {
        return;
    }
    builder.push(format!(" AND {column} IN ("));
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

fn push_instance_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a InstanceFilter) {
    builder.push(" WHERE deleted_at IS NULL");
    push_any_of(builder, "instance_id", &filter.instance_ids);
    push_any_of(builder, "global_account_id", &filter.global_account_ids);
    push_any_of(builder, "subaccount_id", &filter.subaccount_ids);
    push_any_of(builder, "runtime_id", &filter.runtime_ids);
    push_any_of(builder, "provider_region", &filter.regions);
    push_any_of(builder, "service_plan_id", &filter.plan_ids);
    push_any_of(builder, "service_plan_name", &filter.plan_names);
    match filter.expired {
        Some(true) => {
            builder.push(" AND expired_at IS NOT NULL");
        }
        Some(false) => {
            builder.push(" AND expired_at IS NULL");
        }
        None => {}
    }
}

/// SQLite-backed storage backend.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Create a new SQLite backend from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database file at `path` and run all migrations.
    ///
    /// Parent directories are created when missing.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::database(
                    "create_dir",
                    format!("Failed to create directory {:?}: {}", parent, e),
                )
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| {
                StorageError::database(
                    "connect",
                    format!("Failed to connect to SQLite at {:?}: {}", path, e),
                )
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StorageError::database("migrate", e))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn insert_operation(&self, row: &OperationRow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO operations (id, instance_id, operation_type, state, description,
                                    created_at, updated_at, version, data,
                                    provisioning_parameters, finished_stages)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
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
        .execute(&self.pool)
        .await
        .map_err(insert_error("operation", &row.id))?;

        Ok(())
    }

    async fn get_operation_by_id(&self, id: &str) -> Result<Option<OperationRow>, StorageError> {
        let sql = format!("{SELECT_OPERATIONS} WHERE id = ?");
        sqlx::query_as::<_, OperationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("get_operation_by_id"))
    }

    async fn list_all_operations(&self) -> Result<Vec<OperationRow>, StorageError> {
        let sql = format!("{SELECT_OPERATIONS} ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, OperationRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_all_operations"))
    }

    async fn get_operations_for_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<OperationRow>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_OPERATIONS);
        builder.push(" WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY created_at DESC, id DESC");

        builder
            .build_query_as::<OperationRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("get_operations_for_ids"))
    }

    async fn list_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<OperationRow>, StorageError> {
        let sql =
            format!("{SELECT_OPERATIONS} WHERE instance_id = ? ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, OperationRow>(&sql)
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_operations_by_instance_id"))
    }

    async fn list_operations_by_type_and_instance_id(
        &self,
        instance_id: &str,
        operation_type: OperationType,
    ) -> Result<Vec<OperationRow>, StorageError> {
        let sql = format!(
            "{SELECT_OPERATIONS} WHERE instance_id = ? AND operation_type = ? \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, OperationRow>(&sql)
            .bind(instance_id)
            .bind(operation_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_operations_by_type_and_instance_id"))
    }

    async fn list_operations_by_type(
        &self,
        operation_type: OperationType,
    ) -> Result<Vec<OperationRow>, StorageError> {
        let sql = format!(
            "{SELECT_OPERATIONS} WHERE operation_type = ? ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, OperationRow>(&sql)
            .bind(operation_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_operations_by_type"))
    }

    async fn list_operations_in_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<OperationRow>, StorageError> {
        let sql = format!(
            "{SELECT_OPERATIONS} WHERE (created_at BETWEEN ?1 AND ?2) \
             OR (updated_at BETWEEN ?1 AND ?2) ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, OperationRow>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_operations_in_time_range"))
    }

    async fn get_last_operation(
        &self,
        instance_id: &str,
        types: &[OperationType],
    ) -> Result<Option<OperationRow>, StorageError> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_OPERATIONS);
        builder.push(" WHERE instance_id = ");
        builder.push_bind(instance_id);
        builder.push(" AND state <> ");
        builder.push_bind(OperationState::Pending.as_str());
        if !types.is_empty() {
            builder.push(" AND operation_type IN (");
            let mut separated = builder.separated(", ");
            for t in types {
                separated.push_bind(t.as_str());
            }
            separated.push_unseparated(")");
        }
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT 1");

        builder
            .build_query_as::<OperationRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("get_last_operation"))
    }

    async fn list_operations_by_type_and_state(
        &self,
        operation_type: OperationType,
        state: OperationState,
    ) -> Result<Vec<OperationRow>, StorageError> {
        let sql = format!(
            "{SELECT_OPERATIONS} WHERE operation_type = ? AND state = ? \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, OperationRow>(&sql)
            .bind(operation_type.as_str())
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_operations_by_type_and_state"))
    }

    async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> Result<(Vec<OperationRow>, i64), StorageError> {
        fn push_state_filter(builder: &mut QueryBuilder<'_, Sqlite>, states: &[OperationState]) {
            if states.is_empty() {
                return;
            }
            builder.push(" WHERE state IN (");
            let mut separated = builder.separated(", ");
            for state in states {
                separated.push_bind(state.as_str());
            }
            separated.push_unseparated(")");
        }

        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_OPERATIONS);
        push_state_filter(&mut builder, &filter.states);
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        builder.push_bind(i64::from(filter.page_size));
        builder.push(" OFFSET ");
        builder.push_bind(filter.offset());

        let rows = builder
            .build_query_as::<OperationRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_operations"))?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM operations");
        push_state_filter(&mut count, &filter.states);
        let total: (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("count_operations"))?;

        Ok((rows, total.0))
    }

    async fn operation_stats(
        &self,
        state: Option<OperationState>,
    ) -> Result<Vec<OperationStatsRow>, StorageError> {
        sqlx::query_as::<_, OperationStatsRow>(
            r#"
            SELECT operation_type,
                   state,
                   json_extract(provisioning_parameters, '$.plan_id') AS plan_id,
                   COUNT(*) AS count
            FROM operations
            WHERE ?1 IS NULL OR state = ?1
            GROUP BY operation_type, state, plan_id
            "#,
        )
        .bind(state.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("operation_stats"))
    }

    async fn update_operation(&self, row: &OperationRow) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET instance_id = ?2,
                state = ?3,
                description = ?4,
                updated_at = ?5,
                data = ?6,
                provisioning_parameters = ?7,
                finished_stages = ?8,
                version = version + 1
            WHERE id = ?1 AND version = ?9
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
        .execute(&self.pool)
        .await
        .map_err(query_error("update_operation"))?;

        Ok(result.rows_affected())
    }

    async fn delete_operation(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM operations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error("delete_operation"))?;
        Ok(())
    }

    async fn insert_instance(&self, row: &InstanceRow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO instances (instance_id, runtime_id, global_account_id, subaccount_id,
                                   service_plan_id, service_plan_name, provider_region,
                                   provisioning_parameters, created_at, updated_at,
                                   deleted_at, expired_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
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
        .execute(&self.pool)
        .await
        .map_err(insert_error("instance", &row.instance_id))?;

        Ok(())
    }

    async fn get_instance_by_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceRow>, StorageError> {
        let sql = format!("{SELECT_INSTANCES} WHERE instance_id = ?");
        sqlx::query_as::<_, InstanceRow>(&sql)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("get_instance_by_id"))
    }

    async fn find_instances_for_subaccounts(
        &self,
        subaccount_ids: &[String],
    ) -> Result<Vec<InstanceRow>, StorageError> {
        if subaccount_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_INSTANCES);
        builder.push(" WHERE subaccount_id IN (");
        let mut separated = builder.separated(", ");
        for id in subaccount_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY created_at");

        builder
            .build_query_as::<InstanceRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("find_instances_for_subaccounts"))
    }

    async fn find_instances_for_runtimes(
        &self,
        runtime_ids: &[String],
    ) -> Result<Vec<InstanceRow>, StorageError> {
        if runtime_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_INSTANCES);
        builder.push(" WHERE deleted_at IS NULL");
        push_any_of(&mut builder, "runtime_id", runtime_ids);
        builder.push(" ORDER BY created_at, instance_id");

        builder
            .build_query_as::<InstanceRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("find_instances_for_runtimes"))
    }

    async fn list_distinct_subaccounts(&self) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar(
            r#"
            SELECT DISTINCT subaccount_id FROM instances
            WHERE deleted_at IS NULL AND subaccount_id <> ''
            ORDER BY subaccount_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list_distinct_subaccounts"))
    }

    async fn count_instances_for_global_account(
        &self,
        global_account_id: &str,
    ) -> Result<i64, StorageError> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM instances WHERE global_account_id = ? AND deleted_at IS NULL",
        )
        .bind(global_account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("count_instances_for_global_account"))
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<(Vec<InstanceRow>, i64), StorageError> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_INSTANCES);
        push_instance_filter(&mut builder, filter);
        builder.push(" ORDER BY created_at, instance_id LIMIT ");
        builder.push_bind(i64::from(filter.page_size));
        builder.push(" OFFSET ");
        builder.push_bind(filter.offset());

        let rows = builder
            .build_query_as::<InstanceRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_instances"))?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM instances");
        push_instance_filter(&mut count, filter);
        let total: (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("count_instances"))?;

        Ok((rows, total.0))
    }

    async fn active_instance_counts(&self) -> Result<Vec<InstanceCountRow>, StorageError> {
        sqlx::query_as::<_, InstanceCountRow>(
            r#"
            SELECT global_account_id, subaccount_id, COUNT(*) AS count
            FROM instances
            WHERE deleted_at IS NULL
            GROUP BY global_account_id, subaccount_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("active_instance_counts"))
    }

    async fn license_type_counts(&self) -> Result<Vec<LicenseTypeCountRow>, StorageError> {
        sqlx::query_as::<_, LicenseTypeCountRow>(
            r#"
            SELECT json_extract(provisioning_parameters, '$.ers_context.license_type')
                       AS license_type,
                   COUNT(*) AS count
            FROM instances
            WHERE deleted_at IS NULL
            GROUP BY license_type
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("license_type_counts"))
    }

    async fn list_deleted_instance_ids(&self, limit: i64) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar(
            r#"
            SELECT instance_id FROM instances
            WHERE deleted_at IS NOT NULL
            ORDER BY deleted_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list_deleted_instance_ids"))
    }

    async fn update_instance(&self, row: &InstanceRow) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET runtime_id = ?2,
                global_account_id = ?3,
                subaccount_id = ?4,
                service_plan_id = ?5,
                service_plan_name = ?6,
                provider_region = ?7,
                provisioning_parameters = ?8,
                updated_at = ?9,
                deleted_at = ?10,
                expired_at = ?11,
                version = version + 1
            WHERE instance_id = ?1 AND version = ?12
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
        .execute(&self.pool)
        .await
        .map_err(query_error("update_instance"))?;

        Ok(result.rows_affected())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM instances WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(query_error("delete_instance"))?;
        Ok(())
    }

    async fn insert_binding(&self, row: &BindingRow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO bindings (id, instance_id, kubeconfig, expiration_seconds,
                                  created_by, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&row.id)
        .bind(&row.instance_id)
        .bind(&row.kubeconfig)
        .bind(row.expiration_seconds)
        .bind(&row.created_by)
        .bind(row.created_at)
        .bind(row.expires_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error("binding", &row.id))?;

        Ok(())
    }

    async fn get_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<Option<BindingRow>, StorageError> {
        let sql = format!("{SELECT_BINDINGS} WHERE instance_id = ? AND id = ?");
        sqlx::query_as::<_, BindingRow>(&sql)
            .bind(instance_id)
            .bind(binding_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("get_binding"))
    }

    async fn update_binding(&self, row: &BindingRow) -> Result<u64, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE bindings
            SET kubeconfig = ?3,
                expiration_seconds = ?4,
                created_by = ?5,
                expires_at = ?6
            WHERE instance_id = ?1 AND id = ?2
            "#,
        )
        .bind(&row.instance_id)
        .bind(&row.id)
        .bind(&row.kubeconfig)
        .bind(row.expiration_seconds)
        .bind(&row.created_by)
        .bind(row.expires_at)
        .execute(&self.pool)
        .await
        .map_err(query_error("update_binding"))?;

        Ok(result.rows_affected())
    }

    async fn delete_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM bindings WHERE instance_id = ? AND id = ?")
            .bind(instance_id)
            .bind(binding_id)
            .execute(&self.pool)
            .await
            .map_err(query_error("delete_binding"))?;
        Ok(())
    }

    async fn list_bindings(&self, instance_id: &str) -> Result<Vec<BindingRow>, StorageError> {
        let sql = format!("{SELECT_BINDINGS} WHERE instance_id = ? ORDER BY created_at, id");
        sqlx::query_as::<_, BindingRow>(&sql)
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_bindings"))
    }

    async fn list_expired_bindings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BindingRow>, StorageError> {
        let sql = format!("{SELECT_BINDINGS} WHERE expires_at < ? ORDER BY expires_at, id");
        sqlx::query_as::<_, BindingRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("list_expired_bindings"))
    }

    async fn health_check(&self) -> Result<bool, StorageError> {
        let result: Result<(i32,), _> = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await;
        Ok(result.is_ok())
    }
}
