//! Configuração dos serviços de agendamento
//!
//! Os parâmetros são carregados no bootstrap do processo e injetados
//! explicitamente nos serviços; não há estado global.

/// Parâmetros de política de agendamento
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Distância mínima, em segundos, entre duas consultas abertas do mesmo
    /// médico (janela de conflito de ± este valor)
    pub minimal_appointment_gap_secs: i64,
    /// Deslocamento, em dias inteiros a partir de hoje, do início da janela
    /// de abertura de consultas
    pub start_period_days: i64,
    /// Deslocamento, em dias inteiros, do fim da janela de abertura
    pub end_period_days: i64,
    /// Máximo de consultas que um paciente pode ter no mesmo dia
    pub appointment_day_limit: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            minimal_appointment_gap_secs: 1800,
            start_period_days: 0,
            end_period_days: 30,
            appointment_day_limit: 3,
        }
    }
}

/// Parâmetros de identidade e autorização
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Nome do papel atribuído a chamadas não autenticadas
    pub anonymous_role: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            anonymous_role: "anonymous".to_string(),
        }
    }
}
