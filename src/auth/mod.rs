//! Login orchestration and the error taxonomy shared by all of it.

mod error;
mod flow;

pub use error::AuthError;
pub use flow::{AuthFlow, LoginOutcome, SecondFactor};
