//! # ebay-auth
//!
//! Gerenciador do ciclo de vida do token OAuth2 de um usuário eBay.
//!
//! - [`auth::AuthorizationFlow`]: login interativo com servidor de callback local
//! - [`auth::TokenClient`]: troca de código, refresh e consulta de identidade
//! - [`auth::TokenStore`]: credenciais persistidas no `.env`
//! - [`client::AuthenticatedExecutor`]: toda chamada autenticada passa por aqui
//!   (refresh + uma nova tentativa em HTTP 401)
//!
//! ```no_run
//! use std::sync::Arc;
//! use ebay_auth::{classify_response, AuthSettings, AuthenticatedExecutor, TokenClient, TokenStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = AuthSettings::load()?;
//! let store = Arc::new(TokenStore::open(&settings.token_file)?);
//! let client = Arc::new(TokenClient::new(settings, store)?);
//! let executor = AuthenticatedExecutor::new(client.clone());
//!
//! let http = client.http_client().clone();
//! let body = executor
//!     .execute(|token| {
//!         let request = http
//!             .get("https://api.ebay.com/sell/inventory/v1/inventory_item")
//!             .bearer_auth(token);
//!         async move {
//!             let response = classify_response(request.send().await?).await?;
//!             Ok::<_, ebay_auth::CallError>(response.text().await?)
//!         }
//!     })
//!     .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod utils;

pub use auth::{
    AuthorizationFlow, CallbackListener, CallbackResult, Identity, LoginResult, TokenClient,
    TokenRecord, TokenRefresher, TokenStore, TokenUpdate,
};
pub use client::{classify_response, current_user, AuthenticatedExecutor};
pub use config::AuthSettings;
pub use error::{AuthError, AuthResult, CallError};
