//! Guarda de autorização transversal
//!
//! Avalia o mapa de permissões antes das operações administrativas. As
//! operações de agendamento embutem suas próprias verificações de capacidade
//! porque as regras delas são mais finas que uma lista de papéis (posse,
//! código de acesso).

use crate::auth::AuthContext;
use crate::config::AuthConfig;
use crate::error::ServiceError;
use crate::registry::PermissionSnapshot;
use std::collections::HashSet;
use tracing::warn;

/// Verifica a interseção entre os papéis ativos do chamador e os papéis
/// permitidos de uma operação
#[derive(Debug, Clone)]
pub struct AuthorizationGuard {
    anonymous_role: String,
}

impl AuthorizationGuard {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            anonymous_role: config.anonymous_role.clone(),
        }
    }

    /// Permite a operação quando ela não tem restrição registrada ou quando
    /// algum papel ativo do chamador consta na lista de permitidos
    pub fn authorize(
        &self,
        operation: &str,
        auth: &AuthContext,
        permissions: &PermissionSnapshot,
    ) -> Result<(), ServiceError> {
        let Some(allowed) = permissions.allowed_roles(operation) else {
            return Ok(());
        };
        if allowed.is_empty() {
            return Ok(());
        }

        let active = if auth.is_authenticated() {
            auth.active_roles()
        } else {
            HashSet::from([self.anonymous_role.clone()])
        };

        if active.iter().any(|role| allowed.contains(role)) {
            return Ok(());
        }

        warn!(
            "Acesso negado à operação {} para o usuário {}",
            operation, auth.id
        );
        Err(ServiceError::Forbidden(
            "Operação não permitida para os papéis do usuário".to_string(),
        ))
    }
}
