//! Estruturas de requisição e resposta das operações expostas
//!
//! A camada de transporte (externa) desserializa para estes tipos e injeta o
//! contexto de autenticação; os serviços respondem com os tipos de resposta
//! ou com [`crate::error::ServiceError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use validator::{Validate, ValidationError};

use common_db::models::{Appointment, AppointmentStatus, RoleAttributes};

use crate::auth::Capability;

/// Abertura de uma nova consulta pelo médico autenticado
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentOpenRequest {
    /// Instante da consulta
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentOpenResponse {
    /// Id atribuído à nova consulta
    pub id: i64,
}

/// Reserva de uma consulta aberta pelo paciente autenticado
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentBookRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentBookResponse {
    pub id: i64,
    /// Código de acesso de 8 dígitos, prova presencial exigida no fechamento
    pub access_code: String,
}

/// Liberação de uma reserva
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentUnBookRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentUnBookResponse {
    pub id: i64,
}

/// Fechamento de uma consulta reservada
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentCloseRequest {
    pub id: i64,
    /// Código de acesso apresentado pelo médico
    pub access_code: String,
    /// Resultado da consulta
    pub result: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentCloseResponse {
    pub id: i64,
}

/// Cancelamento de uma consulta ainda livre
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentCancelRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentCancelResponse {
    pub id: i64,
}

/// Busca de consultas; os filtros efetivos são moldados pelas capacidades do
/// chamador antes de chegar ao repositório
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentFindRequest {
    /// Início do período (inclusivo)
    pub start: DateTime<Utc>,
    /// Fim do período (inclusivo)
    pub end: DateTime<Utc>,
    /// Filtra por médicos (vazio = sem filtro)
    #[serde(default)]
    pub doctor_ids: HashSet<i64>,
    /// Filtra por pacientes (vazio = sem filtro)
    #[serde(default)]
    pub patient_ids: HashSet<i64>,
    /// Filtra por status (vazio = sem filtro)
    #[serde(default)]
    pub statuses: HashSet<AppointmentStatus>,
    /// Restringe às consultas do próprio chamador
    #[serde(default)]
    pub own_only: bool,
    /// Restringe às consultas ainda sem paciente
    #[serde(default)]
    pub available_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentFindResponse {
    pub appointments: Vec<Appointment>,
}

/// Consulta administrativa do mapa de permissões
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsFindRequest {
    /// Filtra por operações (vazio = sem filtro)
    #[serde(default)]
    pub operations: HashSet<String>,
    /// Filtra por papéis (vazio = sem filtro)
    #[serde(default)]
    pub roles: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsFindResponse {
    pub permissions: HashMap<String, HashSet<String>>,
}

/// Recusa valores vazios ou compostos só de espaços
fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some("Valor vazio".into());
        return Err(error);
    }
    Ok(())
}

/// Concessão ou revogação de papéis para uma operação
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PermissionsAppendRemoveRequest {
    /// Nome da operação
    #[validate(custom = "validate_not_blank")]
    pub operation: String,
    /// Papéis a conceder/revogar
    pub roles: HashSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsAppendRemoveResponse {
    pub operation: String,
    /// Papéis da operação após a mutação
    pub roles: HashSet<String>,
}

/// Consulta administrativa de papéis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolesFindRequest {
    /// Restringe aos papéis que carregam alguma destas capacidades
    /// (vazio = todos)
    #[serde(default)]
    pub capabilities: HashSet<Capability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolesFindResponse {
    pub roles: Vec<RoleAttributes>,
}

/// Cadastro de um novo papel com seu pacote de atributos
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RoleAppendRequest {
    /// Nome do papel
    #[validate(custom = "validate_not_blank")]
    pub name: String,
    /// Ativo por padrão ao ser concedido
    pub active: bool,
    pub admin: bool,
    pub chief: bool,
    pub doctor: bool,
    pub patient: bool,
}

impl RoleAppendRequest {
    /// Converte para o modelo persistido
    pub fn into_attributes(self) -> RoleAttributes {
        RoleAttributes {
            name: self.name,
            active: self.active,
            admin: self.admin,
            chief: self.chief,
            doctor: self.doctor,
            patient: self.patient,
        }
    }

    /// Verdadeiro se nenhum atributo de capacidade foi marcado
    pub fn has_no_capability(&self) -> bool {
        !(self.admin || self.chief || self.doctor || self.patient)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAppendResponse {
    /// Id atribuído ao novo papel
    pub id: i64,
}

/// Remoção de um papel pelo nome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRemoveRequest {
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRemoveResponse {
    /// Id do papel removido
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role_request(name: &str) -> RoleAppendRequest {
        RoleAppendRequest {
            name: name.to_string(),
            active: true,
            admin: false,
            chief: false,
            doctor: true,
            patient: false,
        }
    }

    #[test]
    fn test_role_name_rejects_blank_values() {
        assert!(role_request("").validate().is_err());
        assert!(role_request("   ").validate().is_err());
        assert!(role_request("\t\n").validate().is_err());
        assert!(role_request("residente").validate().is_ok());
    }

    #[test]
    fn test_operation_rejects_blank_values() {
        let request = PermissionsAppendRemoveRequest {
            operation: "  ".to_string(),
            roles: HashSet::from(["medico".to_string()]),
        };
        assert!(request.validate().is_err());

        let request = PermissionsAppendRemoveRequest {
            operation: "/api/appointments/open".to_string(),
            roles: HashSet::new(),
        };
        assert!(request.validate().is_ok());
    }
}
