//! Serviço de agendamento de consultas da clínica
//!
//! Dois blocos compõem o serviço: o agendamento em si (abrir, reservar,
//! liberar, fechar, cancelar e buscar consultas, com detecção de conflito de
//! horário) e a autorização dirigida por atributos (papéis com pacotes de
//! capacidades e um mapa operação -> papéis, ambos mutáveis em tempo de
//! execução via superfície administrativa).
//!
//! A camada de transporte fica fora deste crate: os serviços recebem um
//! [`auth::AuthContext`] já autenticado e DTOs já desserializados, e devolvem
//! [`error::ServiceError`] com o status HTTP sugerido em
//! [`error::ServiceError::http_status`].

pub mod admin;
pub mod auth;
pub mod config;
pub mod dto;
pub mod error;
pub mod guard;
pub mod registry;
pub mod scheduler;

/// Nomes canônicos das operações, usados como chave no mapa de permissões
pub mod operations {
    pub const APPOINTMENTS_OPEN: &str = "/api/appointments/open";
    pub const APPOINTMENTS_BOOK: &str = "/api/appointments/book";
    pub const APPOINTMENTS_UN_BOOK: &str = "/api/appointments/un-book";
    pub const APPOINTMENTS_CLOSE: &str = "/api/appointments/close";
    pub const APPOINTMENTS_CANCEL: &str = "/api/appointments/cancel";
    pub const APPOINTMENTS_FIND: &str = "/api/appointments/find";

    pub const PERMISSIONS_FIND: &str = "/api/permissions/find";
    pub const PERMISSIONS_APPEND: &str = "/api/permissions/append";
    pub const PERMISSIONS_REMOVE: &str = "/api/permissions/remove";

    pub const ROLES_FIND: &str = "/api/roles/find";
    pub const ROLES_APPEND: &str = "/api/roles/append";
    pub const ROLES_REMOVE: &str = "/api/roles/remove";
}

pub use admin::RolePermissionService;
pub use auth::{AuthContext, Capability};
pub use error::ServiceError;
pub use guard::AuthorizationGuard;
pub use registry::{PermissionRegistry, RoleRegistry};
pub use scheduler::AppointmentService;
