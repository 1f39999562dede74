pub mod executor;
pub mod identity;

pub use executor::{classify_response, AuthenticatedExecutor};
pub use identity::current_user;
