//! Serviço de agendamento de consultas
//!
//! Máquina de estados das consultas (aberta -> fechada | cancelada) com
//! detecção de conflito de horário e regras de autorização específicas por
//! transição. As regras aqui são mais finas que o mapa de permissões: posse
//! da consulta, código de acesso e limites de política de agendamento.

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::info;

use common_db::models::{
    Appointment, AppointmentStatus, PersonSnapshot, CHIEF_CLOSE_ACCESS_CODE,
};
use common_db::repository::{
    AppointmentFilter, AppointmentRepository, BookOutcome, OpenOutcome,
};

use crate::auth::{is_owner, AuthContext, Capability, OwnerSide};
use crate::config::SchedulerConfig;
use crate::dto::*;
use crate::error::ServiceError;
use crate::registry::RoleRegistry;

/// Tamanho do código de acesso gerado na reserva
const ACCESS_CODE_LEN: usize = 8;

/// Início do dia (00:00:00.000) em UTC
fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Fim do dia (23:59:59.999) em UTC
fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date + Days::new(1)) - Duration::milliseconds(1)
}

/// Gera um código de acesso numérico aleatório
fn generate_access_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ACCESS_CODE_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Erro de estado para consultas que não estão mais abertas, distinguindo
/// fechada de cancelada na mensagem
fn wrong_state_error(
    status: AppointmentStatus,
    when_closed: &str,
    when_canceled: &str,
) -> ServiceError {
    match status {
        AppointmentStatus::Closed => ServiceError::WrongState(when_closed.to_string()),
        _ => ServiceError::WrongState(when_canceled.to_string()),
    }
}

/// Serviço de agendamento, genérico sobre o contrato de persistência
pub struct AppointmentService<R> {
    repository: R,
    roles: Arc<RoleRegistry>,
    config: SchedulerConfig,
}

impl<R: AppointmentRepository> AppointmentService<R> {
    pub fn new(repository: R, roles: Arc<RoleRegistry>, config: SchedulerConfig) -> Self {
        Self {
            repository,
            roles,
            config,
        }
    }

    /// Exige identidade autenticada com perfil completo e devolve o snapshot
    /// de exibição do chamador
    fn require_profile(auth: &AuthContext) -> Result<PersonSnapshot, ServiceError> {
        if !auth.is_authenticated() {
            return Err(ServiceError::Unauthorized);
        }
        if !auth.has_complete_profile() {
            return Err(ServiceError::Validation(
                "Dados de perfil do usuário incompletos".to_string(),
            ));
        }
        Ok(auth.person_snapshot())
    }

    /// Verdadeiro se o chamador carrega a capacidade em algum papel ativo
    fn has_capability(&self, auth: &AuthContext, capability: Capability) -> bool {
        self.roles
            .snapshot()
            .has_capability(&auth.active_roles(), capability)
    }

    /// Busca a consulta ou falha com `NotFound`
    async fn fetch(&self, id: i64) -> Result<Appointment, ServiceError> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Consulta {} não existe", id)))
    }

    /// Abre uma nova consulta para o médico autenticado
    ///
    /// O horário precisa cair na janela de abertura configurada e não pode
    /// conflitar com outra consulta aberta do mesmo médico dentro da
    /// distância mínima; a verificação de conflito corre dentro da transação
    /// de inserção do repositório.
    pub async fn open(
        &self,
        request: &AppointmentOpenRequest,
        auth: &AuthContext,
    ) -> Result<AppointmentOpenResponse, ServiceError> {
        let doctor = Self::require_profile(auth)?;

        let today = Utc::now().date_naive();
        let window_from = start_of_day(today) + Duration::days(self.config.start_period_days);
        let window_to = end_of_day(today) + Duration::days(self.config.end_period_days);

        let scheduled_at = request.scheduled_at;
        if scheduled_at < window_from || scheduled_at > window_to {
            return Err(ServiceError::OutOfWindow {
                from: window_from.date_naive(),
                to: window_to.date_naive(),
            });
        }

        let gap = Duration::seconds(self.config.minimal_appointment_gap_secs);
        let slot = Appointment::open_slot(scheduled_at, doctor);

        match self
            .repository
            .open(&slot, scheduled_at - gap, scheduled_at + gap)
            .await?
        {
            OpenOutcome::Created(id) => {
                info!("Consulta {} aberta pelo médico {}", id, auth.id);
                Ok(AppointmentOpenResponse { id })
            }
            OpenOutcome::Conflict { id, scheduled_at } => {
                Err(ServiceError::SlotConflict { id, scheduled_at })
            }
        }
    }

    /// Reserva uma consulta aberta para o paciente autenticado
    ///
    /// Aplica o limite diário de consultas do paciente e gera o código de
    /// acesso apresentado no fechamento.
    pub async fn book(
        &self,
        request: &AppointmentBookRequest,
        auth: &AuthContext,
    ) -> Result<AppointmentBookResponse, ServiceError> {
        let patient = Self::require_profile(auth)?;

        let appointment = self.fetch(request.id).await?;
        if appointment.status != AppointmentStatus::Open {
            return Err(wrong_state_error(
                appointment.status,
                "Consulta fechada",
                "Consulta cancelada",
            ));
        }
        if appointment.is_booked() {
            return Err(ServiceError::Conflict("Consulta já reservada".to_string()));
        }

        // O limite diário (consultas abertas ou fechadas do paciente no dia
        // da consulta alvo) é imposto pela guarda da própria atualização
        let day = appointment.scheduled_at.date_naive();
        let access_code = generate_access_code();
        match self
            .repository
            .book(
                appointment.id,
                &patient,
                &access_code,
                start_of_day(day),
                end_of_day(day),
                self.config.appointment_day_limit,
            )
            .await?
        {
            BookOutcome::Booked => {
                info!("Consulta {} reservada pelo paciente {}", appointment.id, auth.id);
                Ok(AppointmentBookResponse {
                    id: appointment.id,
                    access_code,
                })
            }
            BookOutcome::DayLimitReached => Err(ServiceError::DayLimitExceeded { date: day }),
            // Outra reserva passou na frente entre a leitura e a atualização
            BookOutcome::SlotTaken => Err(ServiceError::Conflict(
                "A consulta foi reservada por outra operação".to_string(),
            )),
        }
    }

    /// Libera a reserva de uma consulta aberta
    ///
    /// Um chefe libera qualquer reserva; um paciente, apenas a própria.
    pub async fn un_book(
        &self,
        request: &AppointmentUnBookRequest,
        auth: &AuthContext,
    ) -> Result<AppointmentUnBookResponse, ServiceError> {
        if !auth.is_authenticated() {
            return Err(ServiceError::Unauthorized);
        }

        let is_patient = self.has_capability(auth, Capability::Patient);
        let is_chief = self.has_capability(auth, Capability::Chief);
        if !(is_patient || is_chief) {
            return Err(ServiceError::Forbidden(
                "Somente pacientes e chefes podem liberar uma reserva".to_string(),
            ));
        }

        let appointment = self.fetch(request.id).await?;
        if appointment.status != AppointmentStatus::Open {
            return Err(wrong_state_error(
                appointment.status,
                "Consulta fechada",
                "Consulta cancelada",
            ));
        }
        if !appointment.is_booked() {
            return Err(ServiceError::WrongState(
                "Consulta sem reserva não pode ser liberada".to_string(),
            ));
        }

        if !is_chief && !is_owner(auth, &appointment, OwnerSide::Patient) {
            return Err(ServiceError::Forbidden(
                "Paciente não pode liberar reserva de outro paciente".to_string(),
            ));
        }

        if !self.repository.un_book(appointment.id).await? {
            return Err(ServiceError::Conflict(
                "A consulta foi modificada por outra operação".to_string(),
            ));
        }

        info!("Reserva da consulta {} liberada pelo usuário {}", appointment.id, auth.id);
        Ok(AppointmentUnBookResponse { id: appointment.id })
    }

    /// Fecha uma consulta reservada, gravando o resultado
    ///
    /// O médico titular precisa apresentar o código de acesso da reserva;
    /// um chefe fecha sem código, e a sentinela substitui o código gravado.
    pub async fn close(
        &self,
        request: &AppointmentCloseRequest,
        auth: &AuthContext,
    ) -> Result<AppointmentCloseResponse, ServiceError> {
        if !auth.is_authenticated() {
            return Err(ServiceError::Unauthorized);
        }

        let is_doctor = self.has_capability(auth, Capability::Doctor);
        let is_chief = self.has_capability(auth, Capability::Chief);
        if !(is_doctor || is_chief) {
            return Err(ServiceError::Forbidden(
                "Somente médicos e chefes podem fechar uma consulta".to_string(),
            ));
        }

        let appointment = self.fetch(request.id).await?;
        if appointment.status != AppointmentStatus::Open {
            return Err(wrong_state_error(
                appointment.status,
                "Consulta já fechada",
                "Consulta cancelada",
            ));
        }
        if !appointment.is_booked() {
            return Err(ServiceError::WrongState(
                "Consulta sem reserva não pode ser fechada".to_string(),
            ));
        }

        let access_code = if is_doctor {
            if !is_owner(auth, &appointment, OwnerSide::Doctor) {
                return Err(ServiceError::Forbidden(
                    "Médico não pode fechar consulta de outro médico".to_string(),
                ));
            }
            if request.access_code != appointment.access_code {
                return Err(ServiceError::Forbidden(
                    "Código de acesso incorreto".to_string(),
                ));
            }
            appointment.access_code.clone()
        } else {
            // Fechamento por chefia: o código original é substituído pela
            // sentinela antes de persistir
            CHIEF_CLOSE_ACCESS_CODE.to_string()
        };

        if !self
            .repository
            .close(appointment.id, &access_code, &request.result)
            .await?
        {
            return Err(ServiceError::Conflict(
                "A consulta foi modificada por outra operação".to_string(),
            ));
        }

        info!("Consulta {} fechada pelo usuário {}", appointment.id, auth.id);
        Ok(AppointmentCloseResponse { id: appointment.id })
    }

    /// Cancela uma consulta ainda sem reserva
    ///
    /// Reservas nunca são canceladas, nem por chefia: primeiro libera-se a
    /// reserva. Um chefe cancela qualquer consulta livre; um médico, apenas
    /// as próprias.
    pub async fn cancel(
        &self,
        request: &AppointmentCancelRequest,
        auth: &AuthContext,
    ) -> Result<AppointmentCancelResponse, ServiceError> {
        if !auth.is_authenticated() {
            return Err(ServiceError::Unauthorized);
        }

        let is_doctor = self.has_capability(auth, Capability::Doctor);
        let is_chief = self.has_capability(auth, Capability::Chief);
        if !(is_doctor || is_chief) {
            return Err(ServiceError::Forbidden(
                "Somente médicos e chefes podem cancelar uma consulta".to_string(),
            ));
        }

        let appointment = self.fetch(request.id).await?;
        if appointment.status != AppointmentStatus::Open {
            return Err(wrong_state_error(
                appointment.status,
                "Consulta fechada",
                "Consulta já cancelada",
            ));
        }
        if appointment.is_booked() {
            return Err(ServiceError::Conflict(
                "Consulta reservada não pode ser cancelada".to_string(),
            ));
        }

        if !is_chief && !is_owner(auth, &appointment, OwnerSide::Doctor) {
            return Err(ServiceError::Forbidden(
                "Médico não pode cancelar consulta de outro médico".to_string(),
            ));
        }

        if !self.repository.cancel(appointment.id).await? {
            return Err(ServiceError::Conflict(
                "A consulta foi modificada por outra operação".to_string(),
            ));
        }

        info!("Consulta {} cancelada pelo usuário {}", appointment.id, auth.id);
        Ok(AppointmentCancelResponse { id: appointment.id })
    }

    /// Busca consultas moldando filtros e mascaramento pelas capacidades do
    /// chamador
    ///
    /// Pacientes sem outras capacidades enxergam apenas consultas abertas e,
    /// fora das próprias, com código e dados de paciente mascarados. Médicos
    /// sem chefia nunca recebem código de acesso por aqui e, fora das
    /// próprias consultas, perdem o filtro por paciente e os dados dele.
    /// Admin e chefia recebem resultados completos.
    pub async fn find(
        &self,
        request: &AppointmentFindRequest,
        auth: &AuthContext,
    ) -> Result<AppointmentFindResponse, ServiceError> {
        if !auth.is_authenticated() {
            return Err(ServiceError::Unauthorized);
        }
        if request.start >= request.end {
            return Err(ServiceError::Validation(
                "Período de busca inválido".to_string(),
            ));
        }

        let snapshot = self.roles.snapshot();
        let active = auth.active_roles();
        let is_admin = snapshot.has_capability(&active, Capability::Admin);
        let is_chief = snapshot.has_capability(&active, Capability::Chief);
        let is_doctor = snapshot.has_capability(&active, Capability::Doctor);
        let is_patient = snapshot.has_capability(&active, Capability::Patient);

        let mut doctor_ids = request.doctor_ids.clone();
        let mut patient_ids = request.patient_ids.clone();
        let mut statuses = request.statuses.clone();
        let mut mask_access_code = false;
        let mut mask_patient_info = false;

        if is_patient && !(is_admin || is_chief || is_doctor) {
            mask_access_code = true;
            mask_patient_info = true;
            patient_ids.clear();
            if request.own_only {
                patient_ids.insert(auth.id);
                mask_access_code = false;
                mask_patient_info = false;
            }
            statuses.clear();
            statuses.insert(AppointmentStatus::Open);
        }

        if is_doctor && !(is_admin || is_chief) {
            mask_access_code = true;
            mask_patient_info = true;
            if request.own_only {
                doctor_ids.clear();
                doctor_ids.insert(auth.id);
                mask_patient_info = false;
            } else {
                patient_ids.clear();
            }
        }

        let filter = AppointmentFilter {
            from: request.start,
            to: request.end,
            doctor_ids,
            patient_ids,
            statuses,
            mask_access_code,
            mask_patient_info,
            available_only: request.available_only,
        };

        let appointments = self.repository.find(&filter).await?;
        Ok(AppointmentFindResponse { appointments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use common_db::models::{RoleAttributes, MASKED_ACCESS_CODE, MASKED_PATIENT_FIELD};
    use common_db::repository::{
        RolePermissionRepository, SqliteAppointmentRepository, SqliteRolePermissionRepository,
    };
    use common_db::{init_db_pool, DbConfig};
    use std::collections::{HashMap, HashSet};
    use tempfile::tempdir;

    type Service = AppointmentService<SqliteAppointmentRepository>;

    async fn service_with(
        dir: &tempfile::TempDir,
        config: SchedulerConfig,
    ) -> Result<Service> {
        let db_config = DbConfig {
            db_path: dir.path().join("scheduler.db").to_str().unwrap().to_string(),
            max_connections: 2,
        };
        let pool = init_db_pool(&db_config).await?;

        // Papéis padrão da clínica
        let role_repo = SqliteRolePermissionRepository::new(pool.clone());
        for (name, admin, chief, doctor, patient) in [
            ("admin", true, false, false, false),
            ("chefe", false, true, false, false),
            ("medico", false, false, true, false),
            ("paciente", false, false, false, true),
        ] {
            role_repo
                .append_role(&RoleAttributes {
                    name: name.to_string(),
                    active: true,
                    admin,
                    chief,
                    doctor,
                    patient,
                })
                .await?;
        }

        let registry = Arc::new(RoleRegistry::load(&role_repo).await?);
        Ok(AppointmentService::new(
            SqliteAppointmentRepository::new(pool),
            registry,
            config,
        ))
    }

    async fn service(dir: &tempfile::TempDir) -> Result<Service> {
        service_with(
            dir,
            SchedulerConfig {
                minimal_appointment_gap_secs: 1800,
                start_period_days: 0,
                end_period_days: 30,
                appointment_day_limit: 3,
            },
        )
        .await
    }

    fn user(id: i64, role: &str) -> AuthContext {
        AuthContext {
            id,
            first_name: "Nome".to_string(),
            second_name: "Sobrenome".to_string(),
            description: "Perfil completo".to_string(),
            roles: HashMap::from([(role.to_string(), true)]),
        }
    }

    fn tomorrow_at(hour: i64) -> DateTime<Utc> {
        start_of_day(Utc::now().date_naive() + Days::new(1)) + Duration::hours(hour)
    }

    async fn open_slot(service: &Service, doctor: &AuthContext, at: DateTime<Utc>) -> Result<i64> {
        let response = service
            .open(&AppointmentOpenRequest { scheduled_at: at }, doctor)
            .await?;
        Ok(response.id)
    }

    #[tokio::test]
    async fn test_open_requires_identity_and_profile() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let request = AppointmentOpenRequest { scheduled_at: tomorrow_at(10) };

        let result = service.open(&request, &AuthContext::anonymous()).await;
        assert!(matches!(result, Err(ServiceError::Unauthorized)));

        let mut incomplete = user(1, "medico");
        incomplete.description = " ".to_string();
        let result = service.open(&request, &incomplete).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_open_window_boundaries() -> Result<()> {
        let dir = tempdir()?;
        let service = service_with(
            &dir,
            SchedulerConfig {
                minimal_appointment_gap_secs: 1800,
                start_period_days: 1,
                end_period_days: 5,
                appointment_day_limit: 3,
            },
        )
        .await?;
        let doctor = user(1, "medico");

        let today = Utc::now().date_naive();
        let window_from = start_of_day(today) + Duration::days(1);
        let window_to = end_of_day(today) + Duration::days(5);

        // Um segundo antes do início: fora da janela
        let result = service
            .open(
                &AppointmentOpenRequest { scheduled_at: window_from - Duration::seconds(1) },
                &doctor,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::OutOfWindow { .. })));

        // Exatamente no início: dentro
        assert!(open_slot(&service, &doctor, window_from).await? > 0);

        // Exatamente no fim: dentro
        assert!(open_slot(&service, &doctor, window_to).await? > 0);

        // Um segundo depois do fim: fora, carregando o intervalo válido
        let result = service
            .open(
                &AppointmentOpenRequest { scheduled_at: window_to + Duration::seconds(1) },
                &doctor,
            )
            .await;
        match result {
            Err(ServiceError::OutOfWindow { from, to }) => {
                assert_eq!(from, window_from.date_naive());
                assert_eq!(to, window_to.date_naive());
            }
            other => panic!("esperava OutOfWindow, veio {:?}", other.map(|r| r.id)),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_open_gap_conflict() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let doctor = user(1, "medico");

        let base = tomorrow_at(10);
        let first = open_slot(&service, &doctor, base).await?;

        // Dentro da distância mínima: conflito nomeando a consulta existente
        let result = service
            .open(
                &AppointmentOpenRequest {
                    scheduled_at: base + Duration::seconds(1800 - 1),
                },
                &doctor,
            )
            .await;
        match result {
            Err(ServiceError::SlotConflict { id, scheduled_at }) => {
                assert_eq!(id, first);
                assert_eq!(scheduled_at, base);
            }
            other => panic!("esperava SlotConflict, veio {:?}", other.map(|r| r.id)),
        }

        // Logo além da distância mínima: permitido
        let second = open_slot(&service, &doctor, base + Duration::seconds(1800 + 1)).await?;
        assert!(second > first);

        // Outro médico no mesmo horário: permitido
        assert!(open_slot(&service, &user(2, "medico"), base).await? > 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_book_generates_access_code() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let doctor = user(1, "medico");
        let patient = user(50, "paciente");

        let id = open_slot(&service, &doctor, tomorrow_at(10)).await?;
        let response = service.book(&AppointmentBookRequest { id }, &patient).await?;

        assert_eq!(response.id, id);
        assert_eq!(response.access_code.len(), 8);
        assert!(response.access_code.chars().all(|c| c.is_ascii_digit()));

        // Reservar de novo falha para qualquer chamador
        let result = service.book(&AppointmentBookRequest { id }, &user(51, "paciente")).await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        let result = service.book(&AppointmentBookRequest { id }, &patient).await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));

        // Consulta inexistente
        let result = service.book(&AppointmentBookRequest { id: 999 }, &patient).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_book_day_limit() -> Result<()> {
        let dir = tempdir()?;
        let service = service_with(
            &dir,
            SchedulerConfig {
                minimal_appointment_gap_secs: 1800,
                start_period_days: 0,
                end_period_days: 30,
                appointment_day_limit: 1,
            },
        )
        .await?;
        let doctor = user(1, "medico");
        let patient = user(50, "paciente");

        let first = open_slot(&service, &doctor, tomorrow_at(10)).await?;
        let second = open_slot(&service, &doctor, tomorrow_at(14)).await?;

        service.book(&AppointmentBookRequest { id: first }, &patient).await?;

        // Mesmo dia, limite 1: recusado nomeando a data
        let result = service.book(&AppointmentBookRequest { id: second }, &patient).await;
        match result {
            Err(ServiceError::DayLimitExceeded { date }) => {
                assert_eq!(date, tomorrow_at(14).date_naive());
            }
            other => panic!("esperava DayLimitExceeded, veio {:?}", other.map(|r| r.id)),
        }

        // Outro paciente ainda pode reservar
        service.book(&AppointmentBookRequest { id: second }, &user(51, "paciente")).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_un_book_ownership() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let doctor = user(1, "medico");
        let patient = user(50, "paciente");

        let id = open_slot(&service, &doctor, tomorrow_at(10)).await?;

        // Sem reserva não há o que liberar
        let result = service.un_book(&AppointmentUnBookRequest { id }, &patient).await;
        assert!(matches!(result, Err(ServiceError::WrongState(_))));

        service.book(&AppointmentBookRequest { id }, &patient).await?;

        // Médico não carrega capacidade de paciente nem de chefia
        let result = service.un_book(&AppointmentUnBookRequest { id }, &doctor).await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        // Outro paciente não é o dono da reserva
        let result = service
            .un_book(&AppointmentUnBookRequest { id }, &user(51, "paciente"))
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        // O próprio paciente libera
        service.un_book(&AppointmentUnBookRequest { id }, &patient).await?;

        // Chefe libera a reserva de qualquer paciente
        service.book(&AppointmentBookRequest { id }, &patient).await?;
        service.un_book(&AppointmentUnBookRequest { id }, &user(9, "chefe")).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_close_with_access_code() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let doctor = user(1, "medico");
        let patient = user(50, "paciente");

        let id = open_slot(&service, &doctor, tomorrow_at(10)).await?;

        // Sem reserva não fecha
        let result = service
            .close(
                &AppointmentCloseRequest {
                    id,
                    access_code: String::new(),
                    result: "ok".to_string(),
                },
                &doctor,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::WrongState(_))));

        let booked = service.book(&AppointmentBookRequest { id }, &patient).await?;

        // Código errado: recusado sem mudar o estado
        let result = service
            .close(
                &AppointmentCloseRequest {
                    id,
                    access_code: "00000000".to_string(),
                    result: "ok".to_string(),
                },
                &doctor,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        // Outro médico não fecha consulta alheia
        let result = service
            .close(
                &AppointmentCloseRequest {
                    id,
                    access_code: booked.access_code.clone(),
                    result: "ok".to_string(),
                },
                &user(2, "medico"),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        // Paciente não tem capacidade de fechar
        let result = service
            .close(
                &AppointmentCloseRequest {
                    id,
                    access_code: booked.access_code.clone(),
                    result: "ok".to_string(),
                },
                &patient,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        // Código correto: fecha e grava o resultado
        service
            .close(
                &AppointmentCloseRequest {
                    id,
                    access_code: booked.access_code.clone(),
                    result: "ok".to_string(),
                },
                &doctor,
            )
            .await?;

        // Segunda tentativa encontra estado terminal
        let result = service
            .close(
                &AppointmentCloseRequest {
                    id,
                    access_code: booked.access_code,
                    result: "de novo".to_string(),
                },
                &doctor,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::WrongState(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_close_by_chief_masks_access_code() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let doctor = user(1, "medico");
        let patient = user(50, "paciente");
        let admin = user(99, "admin");

        let id = open_slot(&service, &doctor, tomorrow_at(10)).await?;
        service.book(&AppointmentBookRequest { id }, &patient).await?;

        // Chefe fecha sem código; a sentinela substitui o código gravado
        service
            .close(
                &AppointmentCloseRequest {
                    id,
                    access_code: String::new(),
                    result: "fechada pela chefia".to_string(),
                },
                &user(9, "chefe"),
            )
            .await?;

        let found = service
            .find(
                &AppointmentFindRequest {
                    start: tomorrow_at(0),
                    end: tomorrow_at(23),
                    doctor_ids: HashSet::new(),
                    patient_ids: HashSet::new(),
                    statuses: HashSet::new(),
                    own_only: false,
                    available_only: false,
                },
                &admin,
            )
            .await?;
        let closed = found
            .appointments
            .iter()
            .find(|a| a.id == id)
            .expect("consulta fechada");
        assert_eq!(closed.status, AppointmentStatus::Closed);
        assert_eq!(closed.access_code, CHIEF_CLOSE_ACCESS_CODE);
        assert_eq!(closed.result, "fechada pela chefia");

        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_rules() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let doctor = user(1, "medico");
        let patient = user(50, "paciente");

        let free = open_slot(&service, &doctor, tomorrow_at(10)).await?;
        let booked = open_slot(&service, &doctor, tomorrow_at(14)).await?;
        service.book(&AppointmentBookRequest { id: booked }, &patient).await?;

        // Consulta reservada não se cancela, nem pela chefia
        let result = service
            .cancel(&AppointmentCancelRequest { id: booked }, &user(9, "chefe"))
            .await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        let result = service.cancel(&AppointmentCancelRequest { id: booked }, &doctor).await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));

        // Outro médico não cancela consulta alheia
        let result = service
            .cancel(&AppointmentCancelRequest { id: free }, &user(2, "medico"))
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        // Paciente não tem capacidade de cancelar
        let result = service.cancel(&AppointmentCancelRequest { id: free }, &patient).await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        // O médico titular cancela a própria consulta livre
        service.cancel(&AppointmentCancelRequest { id: free }, &doctor).await?;

        // Já cancelada: estado terminal
        let result = service.cancel(&AppointmentCancelRequest { id: free }, &doctor).await;
        assert!(matches!(result, Err(ServiceError::WrongState(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_find_masks_for_plain_patient() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let doctor = user(1, "medico");
        let patient = user(50, "paciente");
        let other = user(51, "paciente");

        let mine = open_slot(&service, &doctor, tomorrow_at(10)).await?;
        let theirs = open_slot(&service, &doctor, tomorrow_at(14)).await?;
        let closed = open_slot(&service, &doctor, tomorrow_at(18)).await?;

        let my_booking = service.book(&AppointmentBookRequest { id: mine }, &patient).await?;
        service.book(&AppointmentBookRequest { id: theirs }, &other).await?;
        let closed_booking = service.book(&AppointmentBookRequest { id: closed }, &other).await?;
        service
            .close(
                &AppointmentCloseRequest {
                    id: closed,
                    access_code: closed_booking.access_code,
                    result: "ok".to_string(),
                },
                &doctor,
            )
            .await?;

        let request = AppointmentFindRequest {
            start: tomorrow_at(0),
            end: tomorrow_at(23),
            doctor_ids: HashSet::new(),
            patient_ids: HashSet::new(),
            statuses: HashSet::new(),
            own_only: false,
            available_only: false,
        };

        // Paciente sem outras capacidades: só consultas abertas, tudo mascarado
        let found = service.find(&request, &patient).await?;
        assert!(found.appointments.iter().all(|a| a.status == AppointmentStatus::Open));
        assert!(found.appointments.iter().all(|a| a.access_code == MASKED_ACCESS_CODE));
        for appointment in found.appointments.iter().filter(|a| a.is_booked()) {
            let masked = appointment.patient.as_ref().expect("paciente mascarado");
            assert_eq!(masked.first_name, MASKED_PATIENT_FIELD);
        }

        // own_only: apenas a própria reserva, com código visível
        let own_request = AppointmentFindRequest { own_only: true, ..request.clone() };
        let found = service.find(&own_request, &patient).await?;
        assert_eq!(found.appointments.len(), 1);
        assert_eq!(found.appointments[0].id, mine);
        assert_eq!(found.appointments[0].access_code, my_booking.access_code);

        Ok(())
    }

    #[tokio::test]
    async fn test_find_shapes_for_plain_doctor() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let doctor = user(1, "medico");
        let other_doctor = user(2, "medico");
        let patient = user(50, "paciente");

        let mine = open_slot(&service, &doctor, tomorrow_at(10)).await?;
        let theirs = open_slot(&service, &other_doctor, tomorrow_at(10)).await?;
        service.book(&AppointmentBookRequest { id: mine }, &patient).await?;
        service.book(&AppointmentBookRequest { id: theirs }, &patient).await?;

        let request = AppointmentFindRequest {
            start: tomorrow_at(0),
            end: tomorrow_at(23),
            doctor_ids: HashSet::new(),
            patient_ids: HashSet::from([50]),
            statuses: HashSet::new(),
            own_only: false,
            available_only: false,
        };

        // Fora das próprias: filtro por paciente é descartado e dados do
        // paciente mascarados; código nunca aparece
        let found = service.find(&request, &doctor).await?;
        assert_eq!(found.appointments.len(), 2);
        assert!(found.appointments.iter().all(|a| a.access_code == MASKED_ACCESS_CODE));
        assert!(found
            .appointments
            .iter()
            .all(|a| a.patient.as_ref().map_or(true, |p| p.first_name == MASKED_PATIENT_FIELD)));

        // own_only: restringe ao próprio médico e revela o paciente, mas não o código
        let own_request = AppointmentFindRequest { own_only: true, ..request };
        let found = service.find(&own_request, &doctor).await?;
        assert_eq!(found.appointments.len(), 1);
        assert_eq!(found.appointments[0].id, mine);
        assert_eq!(found.appointments[0].access_code, MASKED_ACCESS_CODE);
        let visible = found.appointments[0].patient.as_ref().expect("paciente visível");
        assert_eq!(visible.id, 50);

        Ok(())
    }

    #[tokio::test]
    async fn test_find_validates_range_and_identity() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;

        let request = AppointmentFindRequest {
            start: tomorrow_at(10),
            end: tomorrow_at(10),
            doctor_ids: HashSet::new(),
            patient_ids: HashSet::new(),
            statuses: HashSet::new(),
            own_only: false,
            available_only: false,
        };

        let result = service.find(&request, &AuthContext::anonymous()).await;
        assert!(matches!(result, Err(ServiceError::Unauthorized)));

        let result = service.find(&request, &user(50, "paciente")).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_find_available_only() -> Result<()> {
        let dir = tempdir()?;
        let service = service(&dir).await?;
        let doctor = user(1, "medico");
        let admin = user(99, "admin");

        let free = open_slot(&service, &doctor, tomorrow_at(10)).await?;
        let booked = open_slot(&service, &doctor, tomorrow_at(14)).await?;
        service
            .book(&AppointmentBookRequest { id: booked }, &user(50, "paciente"))
            .await?;

        let request = AppointmentFindRequest {
            start: tomorrow_at(0),
            end: tomorrow_at(23),
            doctor_ids: HashSet::new(),
            patient_ids: HashSet::new(),
            statuses: HashSet::new(),
            own_only: false,
            available_only: true,
        };

        let found = service.find(&request, &admin).await?;
        assert_eq!(found.appointments.iter().map(|a| a.id).collect::<Vec<_>>(), vec![free]);

        Ok(())
    }
}
