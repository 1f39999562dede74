pub mod env;

pub use env::AuthSettings;
