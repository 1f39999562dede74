use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use crate::auth::callback::{CallbackHandle, CallbackListener, CallbackResult};
use crate::auth::exchange::TokenClient;
use crate::auth::store::TokenRecord;
use crate::error::{AuthError, AuthResult};

/// Estado de uma tentativa de login (um por tentativa, nunca reutilizado)
#[derive(Debug, Clone)]
pub struct AuthorizationState {
    pub state_nonce: String,
    pub redirect_target: String,
    pub started_at: DateTime<Utc>,
}

impl AuthorizationState {
    pub fn new(redirect_target: impl Into<String>) -> Self {
        Self {
            state_nonce: Uuid::new_v4().simple().to_string(),
            redirect_target: redirect_target.into(),
            started_at: Utc::now(),
        }
    }
}

/// Resultado do login reportado ao operador
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResult {
    Success {
        user_id: Option<String>,
        user_name: Option<String>,
    },
    Failure {
        message: String,
        details: Option<String>,
    },
}

impl LoginResult {
    pub fn from_error(error: &AuthError) -> Self {
        Self::Failure {
            message: error.to_string(),
            details: error.details(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<TokenRecord> for LoginResult {
    fn from(record: TokenRecord) -> Self {
        Self::Success {
            user_id: record.user_id,
            user_name: record.user_name,
        }
    }
}

/// Fluxo OAuth2 authorization code com servidor de callback local
pub struct AuthorizationFlow {
    client: Arc<TokenClient>,
}

impl AuthorizationFlow {
    pub fn new(client: Arc<TokenClient>) -> Self {
        Self { client }
    }

    /// Gera a URL de consentimento do provedor
    pub fn authorization_url(&self, state: &AuthorizationState) -> String {
        let settings = self.client.settings();
        let scope = settings.scope_list().join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            settings.auth_url,
            urlencoding::encode(&settings.client_id),
            urlencoding::encode(&state.redirect_target),
            urlencoding::encode(&scope),
            urlencoding::encode(&state.state_nonce)
        )
    }

    /// Executa o login completo e resume o resultado
    pub async fn login(&self) -> LoginResult {
        let outcome = match self.begin().await {
            Ok(pending) => pending.finish().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(record) => LoginResult::from(record),
            Err(e) => {
                warn!("❌ [OAuth] Login falhou: {}", e);
                LoginResult::from_error(&e)
            }
        }
    }

    /// Primeira etapa: sobe o servidor de callback e abre o navegador
    ///
    /// O bind acontece antes de abrir o navegador, então o redirect nunca
    /// chega a uma porta fechada.
    pub async fn begin(&self) -> AuthResult<PendingLogin> {
        let settings = self.client.settings();
        settings.validate()?;

        info!("🚀 [OAuth] Iniciando fluxo de autenticação OAuth2");

        let state = AuthorizationState::new(settings.redirect_uri.clone());
        let listener = CallbackListener::bind(settings).await?;
        let handle = listener.spawn();

        let authorization_url = self.authorization_url(&state);

        if settings.open_browser {
            if let Err(e) = webbrowser::open(&authorization_url) {
                warn!("⚠️ [OAuth] Não foi possível abrir o navegador automaticamente: {}", e);
            } else {
                info!("🌐 [OAuth] Navegador aberto automaticamente");
            }
        }
        info!("🔗 [OAuth] URL de autorização: {}", authorization_url);
        info!("⏳ [OAuth] Aguardando autorização do usuário...");

        Ok(PendingLogin {
            state,
            authorization_url,
            handle,
            client: self.client.clone(),
            timeout: settings.login_timeout(),
        })
    }
}

/// Login aguardando o redirect do provedor
pub struct PendingLogin {
    state: AuthorizationState,
    authorization_url: String,
    handle: CallbackHandle,
    client: Arc<TokenClient>,
    timeout: Duration,
}

impl PendingLogin {
    pub fn authorization_url(&self) -> &str {
        &self.authorization_url
    }

    pub fn state(&self) -> &AuthorizationState {
        &self.state
    }

    pub fn callback_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Segunda etapa, resumida em [`LoginResult`]
    pub async fn complete(self) -> LoginResult {
        match self.finish().await {
            Ok(record) => LoginResult::from(record),
            Err(e) => {
                warn!("❌ [OAuth] Login falhou: {}", e);
                LoginResult::from_error(&e)
            }
        }
    }

    /// Aguarda o callback, verifica o `state` (CSRF) e troca o código
    pub async fn finish(self) -> AuthResult<TokenRecord> {
        let Self { state, handle, client, timeout, .. } = self;

        match handle.wait(timeout).await? {
            CallbackResult::Success { code, state: received } => {
                if received.as_deref() != Some(state.state_nonce.as_str()) {
                    warn!("🚫 [OAuth] Parâmetro state divergente - callback descartado");
                    let mut denied = AuthError::denied("parâmetro state ausente ou divergente (possível CSRF)");
                    if let AuthError::AuthorizationDenied { fields, .. } = &mut denied {
                        fields.insert("state".to_string(), received.unwrap_or_default());
                    }
                    return Err(denied);
                }

                info!("✅ [OAuth] Código de autorização validado");
                client.exchange_code(&code).await
            }
            CallbackResult::ProviderError { fields } => {
                let message = fields
                    .get("error_description")
                    .or_else(|| fields.get("error"))
                    .cloned()
                    .unwrap_or_else(|| "erro desconhecido".to_string());

                Err(AuthError::AuthorizationDenied { message, fields })
            }
            CallbackResult::Malformed { raw_path } => Err(AuthError::MalformedCallback(raw_path)),
        }
    }
}
