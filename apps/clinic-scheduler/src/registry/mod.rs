//! Registros compartilhados de papéis e permissões
//!
//! Ambos seguem o mesmo esquema: um snapshot imutável atrás de um `RwLock`,
//! clonado (`Arc`) pelos leitores e trocado por inteiro após cada mutação
//! administrativa. Um leitor nunca observa um registro parcialmente
//! atualizado; operações em voo podem terminar contra o snapshot anterior.

pub mod permissions;
pub mod roles;

pub use permissions::{PermissionRegistry, PermissionSnapshot};
pub use roles::{RoleRegistry, RoleSnapshot};
