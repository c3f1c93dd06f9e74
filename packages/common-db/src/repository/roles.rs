//! Repositório de papéis e permissões
//!
//! Os papéis são linhas na tabela `roles` com seus atributos de capacidade;
//! as permissões são pares (operação, papel). Os serviços recarregam a tabela
//! inteira após cada mutação administrativa e trocam o snapshot em memória.

use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::DbError;
use crate::models::RoleAttributes;

/// Contrato de persistência de papéis e permissões
#[allow(async_fn_in_trait)]
pub trait RolePermissionRepository {
    /// Carrega a tabela completa de atributos de papéis
    async fn load_role_attributes(&self) -> Result<Vec<RoleAttributes>, DbError>;

    /// Id de um papel pelo nome, se existir
    async fn role_id(&self, name: &str) -> Result<Option<i64>, DbError>;

    /// Insere um novo papel e retorna o id atribuído
    async fn append_role(&self, role: &RoleAttributes) -> Result<i64, DbError>;

    /// Remove um papel pelo id (as permissões associadas caem em cascata)
    async fn remove_role(&self, id: i64) -> Result<bool, DbError>;

    /// Carrega o mapa completo operação -> papéis
    async fn load_permissions(&self) -> Result<HashMap<String, HashSet<String>>, DbError>;

    /// Busca permissões filtrando por operações e/ou papéis
    /// (conjuntos vazios significam "sem filtro")
    async fn find_permissions(
        &self,
        operations: &HashSet<String>,
        roles: &HashSet<String>,
    ) -> Result<HashMap<String, HashSet<String>>, DbError>;

    /// Papéis atualmente autorizados para uma operação
    async fn operation_roles(&self, operation: &str) -> Result<HashSet<String>, DbError>;

    /// Concede papéis a uma operação
    async fn append_permissions(
        &self,
        operation: &str,
        roles: &HashSet<String>,
    ) -> Result<(), DbError>;

    /// Revoga papéis de uma operação
    async fn remove_permissions(
        &self,
        operation: &str,
        roles: &HashSet<String>,
    ) -> Result<(), DbError>;
}

/// Implementação SQLite do repositório de papéis e permissões
#[derive(Debug, Clone)]
pub struct SqliteRolePermissionRepository {
    pool: SqlitePool,
}

impl SqliteRolePermissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl RolePermissionRepository for SqliteRolePermissionRepository {
    async fn load_role_attributes(&self) -> Result<Vec<RoleAttributes>, DbError> {
        let roles = sqlx::query_as::<_, RoleAttributes>(
            "SELECT name, active, is_admin, is_chief, is_doctor, is_patient FROM roles ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        debug!("Carregados {} papéis", roles.len());
        Ok(roles)
    }

    async fn role_id(&self, name: &str) -> Result<Option<i64>, DbError> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(id)
    }

    async fn append_role(&self, role: &RoleAttributes) -> Result<i64, DbError> {
        let inserted = sqlx::query(
            "INSERT INTO roles (name, active, is_admin, is_chief, is_doctor, is_patient) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&role.name)
        .bind(role.active)
        .bind(role.admin)
        .bind(role.chief)
        .bind(role.doctor)
        .bind(role.patient)
        .execute(&self.pool)
        .await?;

        Ok(inserted.last_insert_rowid())
    }

    async fn remove_role(&self, id: i64) -> Result<bool, DbError> {
        let removed = sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(removed.rows_affected() > 0)
    }

    async fn load_permissions(&self) -> Result<HashMap<String, HashSet<String>>, DbError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT operation, role FROM operation_permissions")
                .fetch_all(&self.pool)
                .await?;

        let mut permissions: HashMap<String, HashSet<String>> = HashMap::new();
        for (operation, role) in rows {
            permissions.entry(operation).or_default().insert(role);
        }

        debug!("Carregadas permissões de {} operações", permissions.len());
        Ok(permissions)
    }

    async fn find_permissions(
        &self,
        operations: &HashSet<String>,
        roles: &HashSet<String>,
    ) -> Result<HashMap<String, HashSet<String>>, DbError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT operation, role FROM operation_permissions WHERE 1 = 1");

        if !operations.is_empty() {
            builder.push(" AND operation IN (");
            let mut values = builder.separated(", ");
            for operation in operations {
                values.push_bind(operation.clone());
            }
            values.push_unseparated(")");
        }

        if !roles.is_empty() {
            builder.push(" AND role IN (");
            let mut values = builder.separated(", ");
            for role in roles {
                values.push_bind(role.clone());
            }
            values.push_unseparated(")");
        }

        let rows: Vec<(String, String)> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let mut permissions: HashMap<String, HashSet<String>> = HashMap::new();
        for (operation, role) in rows {
            permissions.entry(operation).or_default().insert(role);
        }

        Ok(permissions)
    }

    async fn operation_roles(&self, operation: &str) -> Result<HashSet<String>, DbError> {
        let roles: Vec<String> =
            sqlx::query_scalar("SELECT role FROM operation_permissions WHERE operation = ?")
                .bind(operation)
                .fetch_all(&self.pool)
                .await?;

        Ok(roles.into_iter().collect())
    }

    async fn append_permissions(
        &self,
        operation: &str,
        roles: &HashSet<String>,
    ) -> Result<(), DbError> {
        // Todas as concessões entram na mesma transação
        let mut transaction = self.pool.begin().await?;

        for role in roles {
            sqlx::query("INSERT INTO operation_permissions (operation, role) VALUES (?, ?)")
                .bind(operation)
                .bind(role)
                .execute(&mut *transaction)
                .await?;
        }

        transaction.commit().await?;
        Ok(())
    }

    async fn remove_permissions(
        &self,
        operation: &str,
        roles: &HashSet<String>,
    ) -> Result<(), DbError> {
        if roles.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM operation_permissions WHERE operation = ");
        builder.push_bind(operation.to_string());
        builder.push(" AND role IN (");
        let mut values = builder.separated(", ");
        for role in roles {
            values.push_bind(role.clone());
        }
        values.push_unseparated(")");

        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}
