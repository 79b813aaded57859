//! Passkey credential registration and login ceremonies.

pub mod memory;
pub mod repo;
mod service;

pub use memory::MemoryPasskeyRepo;
pub use repo::{PasskeyRepo, PgPasskeyRepo, StoredPasskey};
pub use service::{
    CeremonyConfig, CeremonyError, CeremonyStart, CredentialSummary, PasskeyService,
};
