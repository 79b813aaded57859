//! Time-based one-time password second factor.
//!
//! Secrets are stored encrypted with a key bound to the owning subject, see
//! [`crypto`]. Backup codes are Argon2id hashed and single use.

pub mod backup;
pub mod crypto;
pub mod memory;
pub mod repo;
mod service;

pub use memory::MemoryTotpRepo;
#[cfg(test)]
pub(crate) use service::build_totp;
pub use repo::{PgTotpRepo, StoredBackupCode, TotpRepo};
pub use service::{EnrollmentOutcome, EnrollmentStart, TotpService};
