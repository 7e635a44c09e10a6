//! Bearer-token claims, roles, and the auth error taxonomy for Telecare.

pub mod claims;
pub mod encoding;
pub mod error;

pub use claims::{Claims, Role};
pub use error::{AuthError, ErrorResponse, Recovery, RecoveryAction};

#[cfg(any(test, feature = "test-util"))]
pub use claims::mint_unsigned;
