//! # eBay OAuth2 Authentication Module
//!
//! Ciclo de vida completo do token OAuth2 do usuário.
//!
//! ## Responsabilidades:
//! - Login interativo (consent URL, navegador, servidor de callback local)
//! - Trocar authorization code por access/refresh token
//! - Renovar o access token (refresh único mesmo com chamadas concorrentes)
//! - Persistir credenciais e identidade do usuário no `.env`
//!
//! ## Estrutura:
//! - `store.rs`: Armazenamento das credenciais
//! - `callback.rs`: Servidor HTTP efêmero do redirect
//! - `oauth.rs`: Orquestração do login
//! - `exchange.rs`: Cliente do endpoint de token e de identidade

pub mod callback;
pub mod exchange;
pub mod oauth;
pub mod store;

pub use callback::{CallbackHandle, CallbackListener, CallbackResult};
pub use exchange::{TokenClient, TokenRefresher};
pub use oauth::{AuthorizationFlow, AuthorizationState, LoginResult, PendingLogin};
pub use store::{Identity, TokenRecord, TokenStore, TokenUpdate};
