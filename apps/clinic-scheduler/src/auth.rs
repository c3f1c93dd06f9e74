//! Identidade do chamador e capacidades
//!
//! O contexto de autenticação chega pronto da camada de transporte (externa);
//! aqui ficam apenas o tipo que os serviços consomem, o enum de capacidades e
//! o predicado de posse compartilhado pelas operações de agendamento.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use common_db::models::{Appointment, PersonSnapshot};

/// Capacidade booleana carregada por um papel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Gestão de papéis e permissões
    Admin,
    /// Opera sobre consultas de qualquer médico
    Chief,
    /// Abre, fecha e cancela as próprias consultas
    Doctor,
    /// Reserva e libera consultas
    Patient,
}

/// Principal autenticado: id, dados de perfil e papéis com flag de atividade
///
/// Um usuário pode possuir um papel desativado (por exemplo, um papel de
/// paciente adormecido de alguém que hoje é só equipe); papéis inativos não
/// contam para autorização.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Id do usuário (0 = anônimo)
    pub id: i64,
    /// Primeiro nome
    pub first_name: String,
    /// Sobrenome
    pub second_name: String,
    /// Descrição do perfil
    pub description: String,
    /// Papéis do usuário com a flag "ativo" de cada um
    pub roles: HashMap<String, bool>,
}

impl AuthContext {
    /// Contexto de chamada não autenticada
    pub fn anonymous() -> Self {
        Self {
            id: 0,
            first_name: String::new(),
            second_name: String::new(),
            description: String::new(),
            roles: HashMap::new(),
        }
    }

    /// Indica se há identidade válida
    pub fn is_authenticated(&self) -> bool {
        self.id > 0
    }

    /// Indica se o perfil tem todos os campos de exibição preenchidos
    pub fn has_complete_profile(&self) -> bool {
        !self.first_name.trim().is_empty()
            && !self.second_name.trim().is_empty()
            && !self.description.trim().is_empty()
    }

    /// Papéis atualmente ativos do usuário
    pub fn active_roles(&self) -> HashSet<String> {
        self.roles
            .iter()
            .filter(|(_, active)| **active)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Snapshot de exibição do usuário, desnormalizado na consulta
    pub fn person_snapshot(&self) -> PersonSnapshot {
        PersonSnapshot {
            id: self.id,
            first_name: self.first_name.clone(),
            second_name: self.second_name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Lado relevante de uma consulta para a verificação de posse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerSide {
    /// O chamador deve ser o médico da consulta
    Doctor,
    /// O chamador deve ser o paciente vinculado
    Patient,
}

/// Predicado único de posse, compartilhado por unbook/close/cancel para que as
/// operações não divirjam entre si
pub fn is_owner(auth: &AuthContext, appointment: &Appointment, side: OwnerSide) -> bool {
    if !auth.is_authenticated() {
        return false;
    }
    match side {
        OwnerSide::Doctor => appointment.doctor.id == auth.id,
        OwnerSide::Patient => appointment
            .patient
            .as_ref()
            .map_or(false, |patient| patient.id == auth.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn context(id: i64) -> AuthContext {
        AuthContext {
            id,
            first_name: "Marcos".to_string(),
            second_name: "Pereira".to_string(),
            description: "Ortopedia".to_string(),
            roles: HashMap::from([
                ("medico".to_string(), true),
                ("paciente".to_string(), false),
            ]),
        }
    }

    fn appointment(doctor_id: i64, patient_id: Option<i64>) -> Appointment {
        let scheduled_at = Utc.with_ymd_and_hms(2026, 9, 10, 10, 0, 0).unwrap();
        let mut appointment = Appointment::open_slot(
            scheduled_at,
            PersonSnapshot {
                id: doctor_id,
                first_name: "Ana".to_string(),
                second_name: "Souza".to_string(),
                description: "Cardiologia".to_string(),
            },
        );
        appointment.patient = patient_id.map(|id| PersonSnapshot {
            id,
            first_name: "Julia".to_string(),
            second_name: "Mendes".to_string(),
            description: "Paciente".to_string(),
        });
        appointment
    }

    #[test]
    fn test_active_roles_skips_inactive() {
        let auth = context(5);
        assert_eq!(
            auth.active_roles(),
            HashSet::from(["medico".to_string()])
        );
    }

    #[test]
    fn test_anonymous_has_no_identity() {
        let auth = AuthContext::anonymous();
        assert!(!auth.is_authenticated());
        assert!(!auth.has_complete_profile());
        assert!(auth.active_roles().is_empty());
    }

    #[test]
    fn test_profile_completeness_ignores_blank_fields() {
        let mut auth = context(5);
        assert!(auth.has_complete_profile());
        auth.description = "   ".to_string();
        assert!(!auth.has_complete_profile());
    }

    #[test]
    fn test_is_owner_by_side() {
        let auth = context(5);

        assert!(is_owner(&auth, &appointment(5, None), OwnerSide::Doctor));
        assert!(!is_owner(&auth, &appointment(6, None), OwnerSide::Doctor));

        assert!(is_owner(&auth, &appointment(6, Some(5)), OwnerSide::Patient));
        assert!(!is_owner(&auth, &appointment(6, Some(9)), OwnerSide::Patient));
        assert!(!is_owner(&auth, &appointment(6, None), OwnerSide::Patient));

        // Anônimo nunca é dono
        let anonymous = AuthContext::anonymous();
        assert!(!is_owner(&anonymous, &appointment(0, None), OwnerSide::Doctor));
    }
}
