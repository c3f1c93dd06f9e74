//! Registro de permissões por operação
//!
//! Mapa operação -> papéis autorizados, mutável via ações administrativas.
//! Operações sem mapeamento são liberadas para qualquer chamador; a ausência
//! de entrada não é erro.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use common_db::repository::RolePermissionRepository;

use crate::error::ServiceError;

/// Visão imutável do mapa de permissões em um instante
#[derive(Debug, Clone, Default)]
pub struct PermissionSnapshot {
    permissions: HashMap<String, HashSet<String>>,
}

impl PermissionSnapshot {
    /// Monta o snapshot a partir do mapa carregado do banco
    pub fn from_map(permissions: HashMap<String, HashSet<String>>) -> Self {
        Self { permissions }
    }

    /// Papéis autorizados para a operação; `None` quando não há restrição
    /// registrada (política desta aplicação: liberada)
    pub fn allowed_roles(&self, operation: &str) -> Option<&HashSet<String>> {
        self.permissions.get(operation)
    }

    /// Dump completo para auditoria/recarga
    pub fn all(&self) -> &HashMap<String, HashSet<String>> {
        &self.permissions
    }
}

/// Registro de permissões com troca atômica de snapshot
#[derive(Debug)]
pub struct PermissionRegistry {
    current: RwLock<Arc<PermissionSnapshot>>,
}

impl PermissionRegistry {
    /// Carrega o registro a partir do repositório; um mapa vazio é válido
    /// (nenhuma operação restrita)
    pub async fn load<R: RolePermissionRepository>(repository: &R) -> Result<Self, ServiceError> {
        let permissions = repository.load_permissions().await?;
        info!("Registro de permissões carregado ({} operações)", permissions.len());
        Ok(Self {
            current: RwLock::new(Arc::new(PermissionSnapshot::from_map(permissions))),
        })
    }

    /// Recarrega o mapa inteiro e troca o snapshot
    pub async fn reload<R: RolePermissionRepository>(
        &self,
        repository: &R,
    ) -> Result<(), ServiceError> {
        let permissions = repository.load_permissions().await?;
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(PermissionSnapshot::from_map(permissions));
        info!("Registro de permissões recarregado");
        Ok(())
    }

    /// Snapshot atual
    pub fn snapshot(&self) -> Arc<PermissionSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
