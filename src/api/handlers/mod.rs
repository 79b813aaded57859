pub mod health;
pub mod login;
pub mod passkeys;
pub mod principal;
pub mod sessions;
pub mod totp;
pub mod types;
pub mod utils;
