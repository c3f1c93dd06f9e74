//! Repositórios SQLite consumidos pelos serviços da clínica

pub mod appointments;
pub mod roles;

pub use appointments::{
    AppointmentFilter, AppointmentRepository, BookOutcome, OpenOutcome,
    SqliteAppointmentRepository,
};
pub use roles::{RolePermissionRepository, SqliteRolePermissionRepository};
