//! Token Exchange Client
//!
//! Chamadas ao endpoint de token do provedor (authorization_code e
//! refresh_token) e ao endpoint de identidade. Todo token obtido é gravado
//! no [`TokenStore`].

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use crate::auth::store::{Identity, TokenRecord, TokenStore, TokenUpdate};
use crate::config::AuthSettings;
use crate::error::{AuthError, AuthResult};
use crate::utils::token_preview;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Resposta do endpoint de token
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_update(self, obtained_at: DateTime<Utc>) -> TokenUpdate {
        TokenUpdate {
            expires_at: self
                .expires_in
                .map(|secs| obtained_at + ChronoDuration::seconds(secs)),
            access_token: Some(self.access_token),
            refresh_token: self.refresh_token,
            obtained_at: Some(obtained_at),
            ..Default::default()
        }
    }
}

/// Como gravar um token recém-obtido
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// Refresh: mescla com as credenciais existentes
    Merge,
    /// Login novo: descarta as credenciais anteriores
    Replace,
}

/// O que o executor precisa para manter um token válido
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Credencial atual (sem chamada de rede)
    fn current_token(&self) -> Option<TokenRecord>;

    /// Renova o access token; `stale` é o token que o chamador viu (`None` = nenhum)
    async fn refresh_access_token(&self, stale: Option<&str>) -> AuthResult<String>;
}

/// Cliente do endpoint de token OAuth2
pub struct TokenClient {
    http: Client,
    settings: AuthSettings,
    store: Arc<TokenStore>,
    // Serializa refreshes concorrentes (single-flight)
    refresh_lock: AsyncMutex<()>,
    // Token obtido mas não gravado: vale até o fim do processo
    unsaved: RwLock<Option<TokenRecord>>,
    // Refresh recusado pelo provedor: só um novo login libera
    reauth_required: AtomicBool,
}

impl TokenClient {
    pub fn new(settings: AuthSettings, store: Arc<TokenStore>) -> AuthResult<Self> {
        let http = Client::builder()
            .timeout(settings.http_timeout())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            settings,
            store,
            refresh_lock: AsyncMutex::new(()),
            unsaved: RwLock::new(None),
            reauth_required: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Cliente HTTP com os timeouts configurados, reutilizável pelas chamadas de API
    pub fn http_client(&self) -> &Client {
        &self.http
    }

    /// Indica que um refresh foi recusado e só um novo login resolve
    pub fn requires_login(&self) -> bool {
        self.reauth_required.load(Ordering::SeqCst)
    }

    /// Credencial em uso: a não gravada (se houver) ou a do store
    fn current_record(&self) -> Option<TokenRecord> {
        if self.requires_login() {
            return None;
        }
        self.read_unsaved().clone().or_else(|| self.store.get())
    }

    fn current_refresh_token(&self) -> Option<String> {
        self.read_unsaved()
            .as_ref()
            .and_then(|record| record.refresh_token.clone())
            .or_else(|| self.store.refresh_token())
    }

    /// Troca o código de autorização por tokens e resolve a identidade
    ///
    /// As credenciais anteriores são substituídas. Se a consulta de identidade
    /// falhar, os tokens são gravados mesmo assim e o registro volta sem
    /// `user_id`/`user_name`.
    pub async fn exchange_code(&self, code: &str) -> AuthResult<TokenRecord> {
        info!("🔄 [TokenClient] Trocando código de autorização por token");

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ];

        let response = self.post_token_form(&params).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("❌ [TokenClient] Troca de código recusada: status {}", status);
            return Err(AuthError::TokenExchangeFailed {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        if token.access_token.is_empty() {
            error!("❌ [TokenClient] Troca de código retornou access token vazio");
            return Err(AuthError::TokenExchangeFailed {
                status: status.as_u16(),
                body,
            });
        }
        debug!(
            "[TokenClient] Token recebido: {} (tipo {:?}, refresh token: {})",
            token_preview(&token.access_token),
            token.token_type,
            token.refresh_token.is_some()
        );

        let identity = match self.fetch_identity(&token.access_token).await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!("⚠️ [TokenClient] Identidade indisponível, tokens serão salvos sem ela: {}", e);
                None
            }
        };

        let mut update = token.into_update(Utc::now());
        if let Some(identity) = &identity {
            update = update.with_identity(identity);
        }

        let record = self.persist(update, WriteMode::Replace);
        self.reauth_required.store(false, Ordering::SeqCst);
        info!(
            "✅ [TokenClient] Login concluído para {}",
            record.user_name.as_deref().unwrap_or("<usuário desconhecido>")
        );
        Ok(record)
    }

    /// Renova o access token incondicionalmente
    pub async fn refresh(&self) -> AuthResult<String> {
        let _guard = self.refresh_lock.lock().await;
        self.request_refresh().await
    }

    /// Renova o access token, no máximo um refresh por vez
    ///
    /// `stale` é o token que o chamador viu (ou `None` se não havia token).
    /// Quem esperou outro refresh terminar reaproveita o token atual se ele
    /// for diferente de `stale` e ainda não tiver expirado.
    pub async fn refresh_after(&self, stale: Option<&str>) -> AuthResult<String> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.current_record() {
            if Some(current.access_token.as_str()) != stale && !current.is_expired() {
                debug!("[TokenClient] Refresh já realizado por outra chamada - reutilizando token");
                return Ok(current.access_token);
            }
        }

        self.request_refresh().await
    }

    async fn request_refresh(&self) -> AuthResult<String> {
        if self.requires_login() {
            return Err(AuthError::refresh_error(
                "refresh token já recusado pelo provedor nesta sessão",
            ));
        }

        let refresh_token = self
            .current_refresh_token()
            .ok_or_else(|| AuthError::refresh_error("nenhum refresh token armazenado"))?;

        info!("🔄 [TokenClient] Renovando access token");

        let scope = self.settings.scope_list().join(" ");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self.post_token_form(&params).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            error!("❌ [TokenClient] Refresh recusado: status {}", status);
            self.require_login();
            return Err(AuthError::refresh_error(format!("status {}: {}", status.as_u16(), body)));
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        if token.access_token.is_empty() {
            error!("❌ [TokenClient] Refresh retornou access token vazio");
            return Err(AuthError::refresh_error("provedor retornou access token vazio"));
        }

        let access_token = token.access_token.clone();
        if token.refresh_token.is_some() {
            debug!("[TokenClient] Provedor emitiu novo refresh token");
        }

        self.persist(token.into_update(Utc::now()), WriteMode::Merge);
        info!("✅ [TokenClient] Access token renovado: {}", token_preview(&access_token));

        Ok(access_token)
    }

    /// Consulta a identidade do usuário dono do token
    pub async fn fetch_identity(&self, access_token: &str) -> AuthResult<Identity> {
        let response = self
            .http
            .get(&self.settings.identity_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AuthError::identity_error(format!("status {}: {}", status.as_u16(), body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| AuthError::identity_error(format!("resposta inválida: {}", e)))
    }

    /// Grava a identidade resolvida fora do login (ex.: `whoami`)
    pub fn save_identity(&self, identity: &Identity) -> AuthResult<()> {
        if let Some(unsaved) = self.write_unsaved().as_mut() {
            unsaved.user_id = Some(identity.user_id.clone());
            unsaved.user_name = Some(identity.user_name.clone());
        }
        self.store.put(TokenUpdate::default().with_identity(identity))?;
        Ok(())
    }

    async fn post_token_form(&self, params: &[(&str, &str)]) -> AuthResult<Response> {
        let response = self
            .http
            .post(&self.settings.token_url)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(params)
            .send()
            .await?;

        Ok(response)
    }

    /// Falha de escrita não invalida o token: ele segue válido neste processo
    fn persist(&self, update: TokenUpdate, mode: WriteMode) -> TokenRecord {
        let update = match mode {
            WriteMode::Merge => self.with_unsaved_fields(update),
            WriteMode::Replace => update,
        };
        let fallback = self.fallback_record(&update, mode);

        let written = match mode {
            WriteMode::Merge => self.store.put(update),
            WriteMode::Replace => self.store.replace(update),
        };

        match written {
            Ok(record) => {
                *self.write_unsaved() = None;
                record.unwrap_or(fallback)
            }
            Err(e) => {
                warn!(
                    "⚠️ [TokenStore] Token não foi persistido ({}); válido apenas para este processo",
                    e
                );
                *self.write_unsaved() = Some(fallback.clone());
                fallback
            }
        }
    }

    // Campos que só existem no token não gravado entram na próxima gravação
    fn with_unsaved_fields(&self, mut update: TokenUpdate) -> TokenUpdate {
        if let Some(unsaved) = self.read_unsaved().as_ref() {
            update.refresh_token = update.refresh_token.or_else(|| unsaved.refresh_token.clone());
            update.user_id = update.user_id.or_else(|| unsaved.user_id.clone());
            update.user_name = update.user_name.or_else(|| unsaved.user_name.clone());
        }
        update
    }

    fn fallback_record(&self, update: &TokenUpdate, mode: WriteMode) -> TokenRecord {
        let (refresh_token, identity) = match mode {
            WriteMode::Merge => (self.current_refresh_token(), self.store.identity()),
            WriteMode::Replace => (None, None),
        };

        TokenRecord {
            access_token: update.access_token.clone().unwrap_or_default(),
            refresh_token: update.refresh_token.clone().or(refresh_token),
            obtained_at: update.obtained_at.unwrap_or_else(Utc::now),
            expires_at: update.expires_at,
            user_id: update
                .user_id
                .clone()
                .or_else(|| identity.as_ref().map(|i| i.user_id.clone())),
            user_name: update.user_name.clone().or_else(|| identity.map(|i| i.user_name)),
        }
    }

    /// Refresh recusado: descarta o access token e bloqueia refreshes até o próximo login
    fn require_login(&self) {
        self.reauth_required.store(true, Ordering::SeqCst);
        *self.write_unsaved() = None;

        if let Err(e) = self.store.invalidate_access_token() {
            warn!("⚠️ [TokenStore] Access token recusado não foi removido: {}", e);
        }
    }

    fn read_unsaved(&self) -> RwLockReadGuard<'_, Option<TokenRecord>> {
        self.unsaved.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_unsaved(&self) -> RwLockWriteGuard<'_, Option<TokenRecord>> {
        self.unsaved.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenRefresher for TokenClient {
    fn current_token(&self) -> Option<TokenRecord> {
        self.current_record()
    }

    async fn refresh_access_token(&self, stale: Option<&str>) -> AuthResult<String> {
        self.refresh_after(stale).await
    }
}
