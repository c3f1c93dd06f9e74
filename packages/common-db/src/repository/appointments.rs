//! Repositório de agendamentos
//!
//! Todas as atualizações de estado usam cláusulas de guarda (`WHERE status = 0
//! AND ...`) para que duas operações concorrentes sobre a mesma consulta nunca
//! tenham sucesso ao mesmo tempo: a segunda não encontra linha para atualizar.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

use crate::error::DbError;
use crate::models::{Appointment, AppointmentStatus, PersonSnapshot, MASKED_ACCESS_CODE};

/// Filtro de busca de agendamentos
///
/// Conjuntos vazios de ids/status significam "sem filtro naquela dimensão".
#[derive(Debug, Clone)]
pub struct AppointmentFilter {
    /// Início do período (inclusivo)
    pub from: DateTime<Utc>,
    /// Fim do período (inclusivo)
    pub to: DateTime<Utc>,
    /// Filtra por médicos
    pub doctor_ids: HashSet<i64>,
    /// Filtra por pacientes
    pub patient_ids: HashSet<i64>,
    /// Filtra por status
    pub statuses: HashSet<AppointmentStatus>,
    /// Mascara o código de acesso nos resultados
    pub mask_access_code: bool,
    /// Mascara os dados do paciente nos resultados
    pub mask_patient_info: bool,
    /// Restringe a consultas ainda sem paciente
    pub available_only: bool,
}

impl AppointmentFilter {
    /// Filtro sem restrições além do período
    pub fn for_period(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            doctor_ids: HashSet::new(),
            patient_ids: HashSet::new(),
            statuses: HashSet::new(),
            mask_access_code: false,
            mask_patient_info: false,
            available_only: false,
        }
    }
}

/// Resultado da tentativa de abertura de uma consulta
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Consulta criada com o id atribuído
    Created(i64),
    /// Conflito de horário com outra consulta aberta do mesmo médico
    Conflict {
        /// Id da consulta conflitante
        id: i64,
        /// Horário da consulta conflitante
        scheduled_at: DateTime<Utc>,
    },
}

/// Resultado da tentativa de reserva de uma consulta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookOutcome {
    /// Paciente vinculado com sucesso
    Booked,
    /// A consulta já não estava aberta e livre
    SlotTaken,
    /// O paciente atingiu o limite diário de consultas
    DayLimitReached,
}

/// Contrato de persistência consumido pelo serviço de agendamento
#[allow(async_fn_in_trait)]
pub trait AppointmentRepository {
    /// Busca uma consulta pelo id
    async fn get_by_id(&self, id: i64) -> Result<Option<Appointment>, DbError>;

    /// Busca consultas pelo filtro, aplicando o mascaramento solicitado
    async fn find(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, DbError>;

    /// Insere uma nova consulta aberta, verificando conflito de horário
    /// dentro da mesma transação
    async fn open(
        &self,
        appointment: &Appointment,
        conflict_from: DateTime<Utc>,
        conflict_to: DateTime<Utc>,
    ) -> Result<OpenOutcome, DbError>;

    /// Vincula um paciente a uma consulta aberta e livre, desde que ele ainda
    /// não tenha atingido o limite diário de consultas em `[day_from, day_to]`;
    /// estado e limite são verificados na mesma instrução de atualização
    async fn book(
        &self,
        appointment_id: i64,
        patient: &PersonSnapshot,
        access_code: &str,
        day_from: DateTime<Utc>,
        day_to: DateTime<Utc>,
        day_limit: i64,
    ) -> Result<BookOutcome, DbError>;

    /// Desvincula o paciente de uma consulta aberta e reservada
    async fn un_book(&self, appointment_id: i64) -> Result<bool, DbError>;

    /// Fecha uma consulta aberta e reservada, gravando o resultado
    async fn close(
        &self,
        appointment_id: i64,
        access_code: &str,
        result: &str,
    ) -> Result<bool, DbError>;

    /// Cancela uma consulta aberta e ainda livre
    async fn cancel(&self, appointment_id: i64) -> Result<bool, DbError>;
}

const APPOINTMENT_COLUMNS: &str = "id, scheduled_at, status, \
    doctor_id, doctor_first_name, doctor_second_name, doctor_description, \
    patient_id, patient_first_name, patient_second_name, patient_description, \
    access_code, result";

/// Implementação SQLite do repositório de agendamentos
#[derive(Debug, Clone)]
pub struct SqliteAppointmentRepository {
    pool: SqlitePool,
}

impl SqliteAppointmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl AppointmentRepository for SqliteAppointmentRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<Appointment>, DbError> {
        if id <= 0 {
            return Ok(None);
        }

        let appointment = sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {} FROM appointments WHERE id = ?",
            APPOINTMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(appointment)
    }

    async fn find(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, DbError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM appointments WHERE scheduled_at BETWEEN ",
            APPOINTMENT_COLUMNS
        ));
        builder.push_bind(filter.from);
        builder.push(" AND ");
        builder.push_bind(filter.to);

        if !filter.doctor_ids.is_empty() {
            builder.push(" AND doctor_id IN (");
            let mut ids = builder.separated(", ");
            for id in &filter.doctor_ids {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }

        if !filter.patient_ids.is_empty() {
            builder.push(" AND patient_id IN (");
            let mut ids = builder.separated(", ");
            for id in &filter.patient_ids {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
        }

        if !filter.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut statuses = builder.separated(", ");
            for status in &filter.statuses {
                statuses.push_bind(status.as_i64());
            }
            statuses.push_unseparated(")");
        }

        if filter.available_only {
            builder.push(" AND (patient_id IS NULL OR patient_id = 0)");
        }

        builder.push(" ORDER BY scheduled_at");

        let mut appointments = builder
            .build_query_as::<Appointment>()
            .fetch_all(&self.pool)
            .await?;

        // Mascaramento aplicado sobre os resultados antes de sair do repositório
        for appointment in &mut appointments {
            if filter.mask_access_code {
                appointment.access_code = MASKED_ACCESS_CODE.to_string();
            }
            if filter.mask_patient_info && appointment.patient.is_some() {
                appointment.patient = Some(PersonSnapshot::masked());
            }
        }

        debug!("Busca de agendamentos retornou {} linhas", appointments.len());
        Ok(appointments)
    }

    async fn open(
        &self,
        appointment: &Appointment,
        conflict_from: DateTime<Utc>,
        conflict_to: DateTime<Utc>,
    ) -> Result<OpenOutcome, DbError> {
        // Verificação de conflito e inserção na mesma transação: duas aberturas
        // concorrentes para horários sobrepostos não passam ambas (a segunda
        // escrita falha no modo WAL e o chamador reenvia)
        let mut transaction = self.pool.begin().await?;

        let conflict: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, scheduled_at FROM appointments \
             WHERE doctor_id = ? AND status = 0 AND scheduled_at BETWEEN ? AND ? \
             ORDER BY scheduled_at LIMIT 1",
        )
        .bind(appointment.doctor.id)
        .bind(conflict_from)
        .bind(conflict_to)
        .fetch_optional(&mut *transaction)
        .await?;

        if let Some((id, scheduled_at)) = conflict {
            transaction.rollback().await?;
            return Ok(OpenOutcome::Conflict { id, scheduled_at });
        }

        let inserted = sqlx::query(
            "INSERT INTO appointments \
             (scheduled_at, status, doctor_id, doctor_first_name, doctor_second_name, doctor_description) \
             VALUES (?, 0, ?, ?, ?, ?)",
        )
        .bind(appointment.scheduled_at)
        .bind(appointment.doctor.id)
        .bind(&appointment.doctor.first_name)
        .bind(&appointment.doctor.second_name)
        .bind(&appointment.doctor.description)
        .execute(&mut *transaction)
        .await?;

        let id = inserted.last_insert_rowid();
        transaction.commit().await?;

        if id == 0 {
            return Err(DbError::InternalError(
                "Banco não retornou id para a nova consulta".to_string(),
            ));
        }

        debug!("Consulta {} aberta para o médico {}", id, appointment.doctor.id);
        Ok(OpenOutcome::Created(id))
    }

    async fn book(
        &self,
        appointment_id: i64,
        patient: &PersonSnapshot,
        access_code: &str,
        day_from: DateTime<Utc>,
        day_to: DateTime<Utc>,
        day_limit: i64,
    ) -> Result<BookOutcome, DbError> {
        // A contagem do limite diário entra como guarda da própria instrução:
        // duas reservas concorrentes em consultas distintas do mesmo dia não
        // passam ambas do limite
        let updated = sqlx::query(
            "UPDATE appointments \
             SET patient_id = ?, patient_first_name = ?, patient_second_name = ?, \
                 patient_description = ?, access_code = ? \
             WHERE id = ? AND status = 0 AND (patient_id IS NULL OR patient_id = 0) \
               AND (SELECT COUNT(*) FROM appointments other \
                    WHERE other.patient_id = ? AND other.status IN (0, 1) \
                      AND other.scheduled_at BETWEEN ? AND ?) < ?",
        )
        .bind(patient.id)
        .bind(&patient.first_name)
        .bind(&patient.second_name)
        .bind(&patient.description)
        .bind(access_code)
        .bind(appointment_id)
        .bind(patient.id)
        .bind(day_from)
        .bind(day_to)
        .bind(day_limit)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(BookOutcome::Booked);
        }

        // Distingue o motivo da recusa para a mensagem de erro
        let row: Option<(i64, Option<i64>)> =
            sqlx::query_as("SELECT status, patient_id FROM appointments WHERE id = ?")
                .bind(appointment_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match row {
            Some((0, patient_id)) if patient_id.unwrap_or(0) <= 0 => BookOutcome::DayLimitReached,
            _ => BookOutcome::SlotTaken,
        })
    }

    async fn un_book(&self, appointment_id: i64) -> Result<bool, DbError> {
        let updated = sqlx::query(
            "UPDATE appointments \
             SET patient_id = NULL, patient_first_name = '', patient_second_name = '', \
                 patient_description = '', access_code = '' \
             WHERE id = ? AND status = 0 AND patient_id IS NOT NULL",
        )
        .bind(appointment_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn close(
        &self,
        appointment_id: i64,
        access_code: &str,
        result: &str,
    ) -> Result<bool, DbError> {
        let updated = sqlx::query(
            "UPDATE appointments SET status = 1, access_code = ?, result = ? \
             WHERE id = ? AND status = 0 AND patient_id IS NOT NULL",
        )
        .bind(access_code)
        .bind(result)
        .bind(appointment_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn cancel(&self, appointment_id: i64) -> Result<bool, DbError> {
        let updated = sqlx::query(
            "UPDATE appointments SET status = -1 \
             WHERE id = ? AND status = 0 AND (patient_id IS NULL OR patient_id = 0)",
        )
        .bind(appointment_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }
}
