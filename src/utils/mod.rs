pub mod string_utils;

pub use string_utils::{token_preview, truncate_safe};
