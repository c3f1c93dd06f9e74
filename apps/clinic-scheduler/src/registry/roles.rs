//! Registro de atributos de papéis
//!
//! Substitui o estado global mutável do sistema anterior por um objeto
//! injetado explicitamente: cada componente que precisa de dados de
//! capacidade recebe uma referência ao registro e lê um snapshot atômico.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use common_db::models::RoleAttributes;
use common_db::repository::RolePermissionRepository;

use crate::auth::Capability;
use crate::error::ServiceError;

/// Visão imutável da tabela de papéis em um instante
#[derive(Debug, Clone, Default)]
pub struct RoleSnapshot {
    roles: HashMap<String, RoleAttributes>,
}

impl RoleSnapshot {
    /// Monta o snapshot a partir das linhas carregadas do banco
    pub fn from_rows(rows: Vec<RoleAttributes>) -> Self {
        let roles = rows.into_iter().map(|r| (r.name.clone(), r)).collect();
        Self { roles }
    }

    fn capability_flag(attributes: &RoleAttributes, capability: Capability) -> bool {
        match capability {
            Capability::Admin => attributes.admin,
            Capability::Chief => attributes.chief,
            Capability::Doctor => attributes.doctor,
            Capability::Patient => attributes.patient,
        }
    }

    /// Verdadeiro se algum papel do conjunto carrega a capacidade
    pub fn has_capability(&self, role_names: &HashSet<String>, capability: Capability) -> bool {
        role_names.iter().any(|name| {
            self.roles
                .get(name)
                .map_or(false, |attributes| Self::capability_flag(attributes, capability))
        })
    }

    /// Busca inversa: todos os papéis que carregam a capacidade
    pub fn roles_with_capability(&self, capability: Capability) -> HashSet<String> {
        self.roles
            .values()
            .filter(|attributes| Self::capability_flag(attributes, capability))
            .map(|attributes| attributes.name.clone())
            .collect()
    }

    /// Flag "ativo por padrão" de cada papel pedido, usada ao conceder papéis
    /// a um usuário recém-registrado
    pub fn default_active_flags(&self, role_names: &HashSet<String>) -> HashMap<String, bool> {
        self.roles
            .iter()
            .filter(|(name, _)| role_names.contains(*name))
            .map(|(name, attributes)| (name.clone(), attributes.active))
            .collect()
    }

    /// Subconjunto dos nomes pedidos que o registro não conhece, usado na
    /// validação de requisições antes de qualquer atribuição
    pub fn unknown_roles(&self, role_names: &HashSet<String>) -> HashSet<String> {
        role_names
            .iter()
            .filter(|name| !self.roles.contains_key(*name))
            .cloned()
            .collect()
    }

    /// Atributos de um papel pelo nome
    pub fn get(&self, name: &str) -> Option<&RoleAttributes> {
        self.roles.get(name)
    }

    /// Todos os papéis do snapshot
    pub fn all(&self) -> impl Iterator<Item = &RoleAttributes> {
        self.roles.values()
    }
}

/// Registro de papéis com troca atômica de snapshot
///
/// Só pode ser construído por [`RoleRegistry::load`]; consultá-lo antes da
/// primeira carga é impossível por construção, e uma tabela vazia falha na
/// carga com erro de configuração.
#[derive(Debug)]
pub struct RoleRegistry {
    current: RwLock<Arc<RoleSnapshot>>,
}

impl RoleRegistry {
    /// Carrega o registro a partir do repositório; falha se não houver papéis
    pub async fn load<R: RolePermissionRepository>(repository: &R) -> Result<Self, ServiceError> {
        let snapshot = Self::fetch_snapshot(repository).await?;
        info!("Registro de papéis carregado");
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Recarrega a tabela inteira e troca o snapshot
    pub async fn reload<R: RolePermissionRepository>(
        &self,
        repository: &R,
    ) -> Result<(), ServiceError> {
        let snapshot = Self::fetch_snapshot(repository).await?;
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(snapshot);
        info!("Registro de papéis recarregado");
        Ok(())
    }

    /// Snapshot atual; operações em voo podem concluir contra uma versão
    /// anterior, mas nunca observam uma troca pela metade
    pub fn snapshot(&self) -> Arc<RoleSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn fetch_snapshot<R: RolePermissionRepository>(
        repository: &R,
    ) -> Result<RoleSnapshot, ServiceError> {
        let rows = repository.load_role_attributes().await?;
        if rows.is_empty() {
            return Err(ServiceError::Configuration(
                "Nenhum papel configurado no banco de dados".to_string(),
            ));
        }
        Ok(RoleSnapshot::from_rows(rows))
    }
}
