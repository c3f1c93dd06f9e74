//! Administração de papéis e permissões
//!
//! Superfície administrativa que altera a configuração de autorização em
//! tempo de execução: o mapa operação -> papéis e o catálogo de papéis com
//! seus pacotes de capacidades. Toda mutação persistida recarrega o registro
//! correspondente, de modo que as próximas decisões de autorização já
//! enxerguem o novo estado.

use std::sync::Arc;
use tracing::info;
use validator::Validate;

use common_db::error::DbError;
use common_db::models::RoleAttributes;
use common_db::repository::RolePermissionRepository;

use crate::auth::{AuthContext, Capability};
use crate::dto::*;
use crate::error::ServiceError;
use crate::guard::AuthorizationGuard;
use crate::operations;
use crate::registry::{PermissionRegistry, RoleRegistry};

/// Lista nomes de papéis de forma determinística para mensagens de erro
fn sorted_names<'a, I: IntoIterator<Item = &'a String>>(names: I) -> String {
    let mut names: Vec<&str> = names.into_iter().map(String::as_str).collect();
    names.sort_unstable();
    names.join(", ")
}

/// Serviço administrativo, genérico sobre o contrato de persistência
pub struct RolePermissionService<R> {
    repository: R,
    roles: Arc<RoleRegistry>,
    permissions: Arc<PermissionRegistry>,
    guard: AuthorizationGuard,
}

impl<R: RolePermissionRepository> RolePermissionService<R> {
    pub fn new(
        repository: R,
        roles: Arc<RoleRegistry>,
        permissions: Arc<PermissionRegistry>,
        guard: AuthorizationGuard,
    ) -> Self {
        Self {
            repository,
            roles,
            permissions,
            guard,
        }
    }

    /// Porta de entrada de toda operação administrativa: identidade válida,
    /// mapa de permissões da operação e capacidade de administração
    fn check_admin(&self, operation: &str, auth: &AuthContext) -> Result<(), ServiceError> {
        if !auth.is_authenticated() {
            return Err(ServiceError::Unauthorized);
        }
        self.guard
            .authorize(operation, auth, &self.permissions.snapshot())?;
        if !self
            .roles
            .snapshot()
            .has_capability(&auth.active_roles(), Capability::Admin)
        {
            return Err(ServiceError::Forbidden(
                "Operação restrita a administradores".to_string(),
            ));
        }
        Ok(())
    }

    /// Papéis pedidos precisam existir no catálogo
    fn check_known_roles(
        &self,
        roles: &std::collections::HashSet<String>,
    ) -> Result<(), ServiceError> {
        if roles.is_empty() {
            return Err(ServiceError::Validation(
                "Nenhum papel informado".to_string(),
            ));
        }
        let unknown = self.roles.snapshot().unknown_roles(roles);
        if !unknown.is_empty() {
            return Err(ServiceError::Validation(format!(
                "Papéis desconhecidos: {}",
                sorted_names(&unknown)
            )));
        }
        Ok(())
    }

    /// Consulta o mapa de permissões, com filtros opcionais por operação e
    /// por papel
    pub async fn find_permissions(
        &self,
        request: &PermissionsFindRequest,
        auth: &AuthContext,
    ) -> Result<PermissionsFindResponse, ServiceError> {
        self.check_admin(operations::PERMISSIONS_FIND, auth)?;

        let permissions = self
            .repository
            .find_permissions(&request.operations, &request.roles)
            .await?;
        Ok(PermissionsFindResponse { permissions })
    }

    /// Concede papéis a uma operação e recarrega o registro de permissões
    pub async fn append_permissions(
        &self,
        request: &PermissionsAppendRemoveRequest,
        auth: &AuthContext,
    ) -> Result<PermissionsAppendRemoveResponse, ServiceError> {
        self.check_admin(operations::PERMISSIONS_APPEND, auth)?;
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        self.check_known_roles(&request.roles)?;

        let current = self.repository.operation_roles(&request.operation).await?;
        let already: Vec<&String> = request.roles.intersection(&current).collect();
        if !already.is_empty() {
            return Err(ServiceError::Conflict(format!(
                "Papéis já concedidos à operação {}: {}",
                request.operation,
                sorted_names(already)
            )));
        }

        self.repository
            .append_permissions(&request.operation, &request.roles)
            .await?;
        self.permissions.reload(&self.repository).await?;

        let roles = self.repository.operation_roles(&request.operation).await?;
        info!(
            "Permissões da operação {} atualizadas por {}",
            request.operation, auth.id
        );
        Ok(PermissionsAppendRemoveResponse {
            operation: request.operation.clone(),
            roles,
        })
    }

    /// Revoga papéis de uma operação e recarrega o registro de permissões
    pub async fn remove_permissions(
        &self,
        request: &PermissionsAppendRemoveRequest,
        auth: &AuthContext,
    ) -> Result<PermissionsAppendRemoveResponse, ServiceError> {
        self.check_admin(operations::PERMISSIONS_REMOVE, auth)?;
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        self.check_known_roles(&request.roles)?;

        let current = self.repository.operation_roles(&request.operation).await?;
        let missing: Vec<&String> = request.roles.difference(&current).collect();
        if !missing.is_empty() {
            return Err(ServiceError::Validation(format!(
                "Papéis não concedidos à operação {}: {}",
                request.operation,
                sorted_names(missing)
            )));
        }

        self.repository
            .remove_permissions(&request.operation, &request.roles)
            .await?;
        self.permissions.reload(&self.repository).await?;

        let roles = self.repository.operation_roles(&request.operation).await?;
        info!(
            "Permissões da operação {} atualizadas por {}",
            request.operation, auth.id
        );
        Ok(PermissionsAppendRemoveResponse {
            operation: request.operation.clone(),
            roles,
        })
    }

    /// Lista papéis do catálogo, opcionalmente restritos aos que carregam
    /// alguma das capacidades pedidas
    pub async fn find_roles(
        &self,
        request: &RolesFindRequest,
        auth: &AuthContext,
    ) -> Result<RolesFindResponse, ServiceError> {
        self.check_admin(operations::ROLES_FIND, auth)?;

        let snapshot = self.roles.snapshot();
        let mut roles: Vec<RoleAttributes> = if request.capabilities.is_empty() {
            snapshot.all().cloned().collect()
        } else {
            let selected: std::collections::HashSet<String> = request
                .capabilities
                .iter()
                .flat_map(|capability| snapshot.roles_with_capability(*capability))
                .collect();
            snapshot
                .all()
                .filter(|role| selected.contains(&role.name))
                .cloned()
                .collect()
        };
        roles.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(RolesFindResponse { roles })
    }

    /// Cadastra um novo papel com seu pacote de capacidades
    pub async fn append_role(
        &self,
        request: &RoleAppendRequest,
        auth: &AuthContext,
    ) -> Result<RoleAppendResponse, ServiceError> {
        self.check_admin(operations::ROLES_APPEND, auth)?;
        request
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;
        if request.has_no_capability() {
            return Err(ServiceError::Validation(format!(
                "Papel {} sem nenhuma capacidade",
                request.name
            )));
        }
        if self.roles.snapshot().get(&request.name).is_some() {
            return Err(ServiceError::Conflict(format!(
                "Papel {} já existe",
                request.name
            )));
        }

        let attributes = request.clone().into_attributes();
        let id = match self.repository.append_role(&attributes).await {
            Ok(id) => id,
            // Corrida entre a leitura do snapshot e a inserção
            Err(DbError::ConstraintViolation(_)) => {
                return Err(ServiceError::Conflict(format!(
                    "Papel {} já existe",
                    request.name
                )))
            }
            Err(e) => return Err(e.into()),
        };
        self.roles.reload(&self.repository).await?;

        info!("Papel {} cadastrado por {}", request.name, auth.id);
        Ok(RoleAppendResponse { id })
    }

    /// Remove um papel; as permissões que o citam caem em cascata, então os
    /// dois registros são recarregados
    pub async fn remove_role(
        &self,
        request: &RoleRemoveRequest,
        auth: &AuthContext,
    ) -> Result<RoleRemoveResponse, ServiceError> {
        self.check_admin(operations::ROLES_REMOVE, auth)?;

        let id = self
            .repository
            .role_id(&request.role)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Papel {} não existe", request.role))
            })?;

        if !self.repository.remove_role(id).await? {
            return Err(ServiceError::NotFound(format!(
                "Papel {} não existe",
                request.role
            )));
        }
        self.roles.reload(&self.repository).await?;
        self.permissions.reload(&self.repository).await?;

        info!("Papel {} removido por {}", request.role, auth.id);
        Ok(RoleRemoveResponse { id })
    }
}
