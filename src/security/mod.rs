//! API key check, SQL validation and rate limiting.

pub mod credential;
pub mod rate_limiter;
pub mod validator;

pub use credential::CredentialGate;
pub use rate_limiter::RateLimiter;
pub use validator::{
    RejectionReason, SqlValidator, TableRestriction, ValidationVerdict, normalize,
};
