//! Modelos de dados compartilhados entre aplicações
//!
//! Este módulo define as estruturas de dados principais usadas pelo ecossistema da clínica

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// Código de acesso mascarado em resultados de busca
pub const MASKED_ACCESS_CODE: &str = "*****";

/// Valor exibido no lugar dos dados do paciente quando mascarados
pub const MASKED_PATIENT_FIELD: &str = "N/A";

/// Sentinela gravada no código de acesso quando um chefe fecha a consulta
/// sem conhecer o código original
pub const CHIEF_CLOSE_ACCESS_CODE: &str = "--------";

/// Status possíveis de um agendamento
///
/// As transições são monótonas: `Open` pode ir para `Closed` ou `Canceled`;
/// os dois últimos são terminais.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Cancelado (terminal)
    Canceled,
    /// Aberto, com ou sem paciente vinculado
    Open,
    /// Concluído pelo médico ou chefe (terminal)
    Closed,
}

impl AppointmentStatus {
    /// Valor persistido no banco: -1 = cancelado, 0 = aberto, 1 = fechado
    pub fn as_i64(self) -> i64 {
        match self {
            AppointmentStatus::Canceled => -1,
            AppointmentStatus::Open => 0,
            AppointmentStatus::Closed => 1,
        }
    }

    /// Converte do valor persistido
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            -1 => Some(AppointmentStatus::Canceled),
            0 => Some(AppointmentStatus::Open),
            1 => Some(AppointmentStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppointmentStatus::Canceled => write!(f, "canceled"),
            AppointmentStatus::Open => write!(f, "open"),
            AppointmentStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Dados de exibição de um participante (médico ou paciente), capturados
/// no momento da abertura/reserva e desnormalizados na própria consulta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonSnapshot {
    /// Identificador do usuário
    pub id: i64,
    /// Primeiro nome
    pub first_name: String,
    /// Sobrenome
    pub second_name: String,
    /// Descrição (especialidade, observações)
    pub description: String,
}

impl PersonSnapshot {
    /// Snapshot mascarado, exibido a quem não pode ver os dados do paciente
    pub fn masked() -> Self {
        Self {
            id: 0,
            first_name: MASKED_PATIENT_FIELD.to_string(),
            second_name: MASKED_PATIENT_FIELD.to_string(),
            description: MASKED_PATIENT_FIELD.to_string(),
        }
    }
}

/// Representa uma consulta/agendamento
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    /// Identificador único da consulta (0 = ainda não persistida)
    pub id: i64,
    /// Data e hora agendada para a consulta
    pub scheduled_at: DateTime<Utc>,
    /// Status atual da consulta
    pub status: AppointmentStatus,
    /// Médico responsável (snapshot capturado na abertura)
    pub doctor: PersonSnapshot,
    /// Paciente vinculado (snapshot capturado na reserva), ausente enquanto livre
    pub patient: Option<PersonSnapshot>,
    /// Código de acesso gerado na reserva, exigido no fechamento pelo médico
    pub access_code: String,
    /// Resultado da consulta, preenchido no fechamento
    pub result: String,
}

impl Appointment {
    /// Nova consulta aberta, ainda sem id e sem paciente
    pub fn open_slot(scheduled_at: DateTime<Utc>, doctor: PersonSnapshot) -> Self {
        Self {
            id: 0,
            scheduled_at,
            status: AppointmentStatus::Open,
            doctor,
            patient: None,
            access_code: String::new(),
            result: String::new(),
        }
    }

    /// Indica se há paciente vinculado
    pub fn is_booked(&self) -> bool {
        self.patient.as_ref().map_or(false, |p| p.id > 0)
    }
}

impl FromRow<'_, SqliteRow> for Appointment {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let raw_status: i64 = row.try_get("status")?;
        let status = AppointmentStatus::from_i64(raw_status).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: String::from("status"),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Valor de status inválido: {}", raw_status),
                )),
            }
        })?;

        let patient_id: Option<i64> = row.try_get("patient_id")?;
        let patient = match patient_id {
            Some(id) if id > 0 => Some(PersonSnapshot {
                id,
                first_name: row.try_get("patient_first_name")?,
                second_name: row.try_get("patient_second_name")?,
                description: row.try_get("patient_description")?,
            }),
            _ => None,
        };

        Ok(Self {
            id: row.try_get("id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            status,
            doctor: PersonSnapshot {
                id: row.try_get("doctor_id")?,
                first_name: row.try_get("doctor_first_name")?,
                second_name: row.try_get("doctor_second_name")?,
                description: row.try_get("doctor_description")?,
            },
            patient,
            access_code: row.try_get("access_code")?,
            result: row.try_get("result")?,
        })
    }
}

/// Atributos booleanos configuráveis de um papel
///
/// Um papel é um pacote nomeado de capacidades; o conjunto completo de papéis
/// conhecidos é estado administrativo mutável, recarregado integralmente após
/// qualquer alteração.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RoleAttributes {
    /// Nome do papel
    pub name: String,
    /// Papel ativo por padrão ao ser concedido a um novo usuário
    pub active: bool,
    /// Capacidade administrativa (gestão de papéis e permissões)
    #[sqlx(rename = "is_admin")]
    pub admin: bool,
    /// Capacidade de chefia (opera sobre consultas de qualquer médico)
    #[sqlx(rename = "is_chief")]
    pub chief: bool,
    /// Capacidade de médico (abre, fecha e cancela as próprias consultas)
    #[sqlx(rename = "is_doctor")]
    pub doctor: bool,
    /// Capacidade de paciente (reserva e libera consultas)
    #[sqlx(rename = "is_patient")]
    pub patient: bool,
}
