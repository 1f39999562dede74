pub mod auth_error;
pub mod call_error;

pub use auth_error::{AuthError, AuthResult};
pub use call_error::CallError;
