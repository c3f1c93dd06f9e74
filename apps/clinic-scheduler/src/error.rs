//! Definições de erro para os serviços de agendamento
//!
//! Todos os erros são levantados no ponto de detecção e chegam intactos à
//! borda do chamador; nenhuma camada interna reexecuta ou rebaixa um erro.

use chrono::{DateTime, NaiveDate, Utc};
use common_db::error::DbError;
use thiserror::Error;

/// Erros de domínio dos serviços de agendamento e administração
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Usuário não autenticado")]
    Unauthorized,

    #[error("Permissão negada: {0}")]
    Forbidden(String),

    #[error("Requisição inválida: {0}")]
    Validation(String),

    #[error("Não encontrado: {0}")]
    NotFound(String),

    #[error("Estado inválido para a operação: {0}")]
    WrongState(String),

    #[error("Conflito: {0}")]
    Conflict(String),

    #[error(
        "Conflito de horário com a consulta nº {id} de {}",
        scheduled_at.format("%d.%m.%Y %H:%M")
    )]
    SlotConflict {
        /// Id da consulta conflitante
        id: i64,
        /// Horário da consulta conflitante
        scheduled_at: DateTime<Utc>,
    },

    #[error(
        "Fora do período permitido. Dias válidos de {} até {}",
        from.format("%d.%m.%Y"),
        to.format("%d.%m.%Y")
    )]
    OutOfWindow {
        /// Primeiro dia válido da janela de abertura
        from: NaiveDate,
        /// Último dia válido da janela de abertura
        to: NaiveDate,
    },

    #[error("Limite diário de consultas atingido para {}", date.format("%d.%m.%Y"))]
    DayLimitExceeded {
        /// Dia em que o limite foi atingido
        date: NaiveDate,
    },

    #[error("Erro de configuração: {0}")]
    Configuration(String),

    #[error("Erro de acesso a dados: {0}")]
    DataAccess(#[from] DbError),
}

impl ServiceError {
    /// Classe de status HTTP correspondente, usada pela camada de transporte
    /// (externa a esta biblioteca) ao serializar o erro
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::Unauthorized => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::Validation(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::WrongState(_) => 409,
            ServiceError::Conflict(_) | ServiceError::SlotConflict { .. } => 409,
            ServiceError::OutOfWindow { .. } | ServiceError::DayLimitExceeded { .. } => 422,
            ServiceError::Configuration(_) | ServiceError::DataAccess(_) => 500,
        }
    }
}
