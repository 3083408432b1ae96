//! Archive authentication.
//!
//! [`AuthenticatedSession`] owns the HTTP client, cookie jar and token state
//! for a run. [`Credentials`] come from the caller and are never persisted.

mod credentials;
mod error;
mod session;

pub use credentials::Credentials;
pub use error::AuthError;
pub use session::{AuthenticatedSession, SessionConfig};
