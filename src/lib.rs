//! # Muster (Authentication & Session Security Core)
//!
//! `muster` is the authentication core for the members portal. It covers
//! password login hardened by a dual-axis attempt guard and a geographic
//! access gate, TOTP second factors with single-use backup codes, passkey
//! ceremonies, and stateless signed session tokens backed by a revocable
//! session registry.
//!
//! ## Login pipeline
//!
//! A login attempt walks, in order: geo gate, attempt guard, primary
//! credential check, and (when enrolled) a second factor. Only then is a
//! token minted and its session registered. Failed steps record a failure
//! in the attempt guard, except geo rejections, which are logged but not
//! counted.
//!
//! ## Failure posture
//!
//! - Attempt guard and geo gate fail **open** on storage trouble. They are
//!   secondary defenses layered over credential hashing; an outage must
//!   not lock every member out.
//! - Token validation and session lookups fail **closed**. A token that
//!   cannot be confirmed is not honored.
//!
//! ## Enumeration resistance
//!
//! Unknown usernames, wrong passwords, wrong codes, and rejected passkey
//! assertions all surface as the same "authentication failed" response.
//! Passkey login starts return a decoy challenge for unknown accounts.

pub mod api;
pub mod attempts;
pub mod auth;
pub mod cli;
pub mod directory;
pub mod geo;
pub mod passkeys;
pub mod sessions;
pub mod token;
pub mod totp;
