use config::{Config, Environment};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use crate::error::{AuthError, AuthResult};

pub const DEFAULT_AUTH_URL: &str = "https://auth.ebay.com/oauth2/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://api.ebay.com/identity/v1/oauth2/token";
pub const DEFAULT_IDENTITY_URL: &str = "https://apiz.ebay.com/commerce/identity/v1/user/";
pub const DEFAULT_SCOPES: &str = "https://api.ebay.com/oauth/api_scope \
https://api.ebay.com/oauth/api_scope/sell.inventory \
https://api.ebay.com/oauth/api_scope/commerce.identity.readonly";

/// Configurações do OAuth2 do eBay
///
/// Carregadas de variáveis `EBAY_*` (e do arquivo `.env`, quando existir).
/// `redirect_uri` é o alvo enviado ao provedor (no eBay, o RuName); o
/// servidor local escuta em `callback_host:callback_port/callback_path`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(default = "default_callback_host")]
    pub callback_host: String,
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_open_browser")]
    pub open_browser: bool,
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_identity_url() -> String {
    DEFAULT_IDENTITY_URL.to_string()
}

fn default_scopes() -> String {
    DEFAULT_SCOPES.to_string()
}

fn default_callback_host() -> String {
    "localhost".to_string()
}

fn default_callback_port() -> u16 {
    9292
}

fn default_callback_path() -> String {
    "/oauth/callback".to_string()
}

fn default_login_timeout_secs() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_token_file() -> PathBuf {
    PathBuf::from(".env")
}

fn default_open_browser() -> bool {
    true
}

impl AuthSettings {
    /// Cria configurações com os valores padrão de endpoints, porta e timeouts
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            identity_url: default_identity_url(),
            scopes: default_scopes(),
            callback_host: default_callback_host(),
            callback_port: default_callback_port(),
            callback_path: default_callback_path(),
            login_timeout_secs: default_login_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            token_file: default_token_file(),
            open_browser: default_open_browser(),
        }
    }

    /// Carrega o `.env` (se existir) e depois as variáveis de ambiente
    pub fn load() -> AuthResult<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("Arquivo .env carregado de {}", path.display()),
            Err(_) => tracing::debug!("Arquivo .env não encontrado - usando variáveis de ambiente do sistema"),
        }

        Self::from_environment()
    }

    /// Lê apenas as variáveis `EBAY_*` do processo e valida o resultado
    pub fn from_environment() -> AuthResult<Self> {
        let settings: Self = Config::builder()
            .add_source(Environment::with_prefix("EBAY"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AuthError::config_error(format!("Falha ao carregar configurações: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Valida se todas as configurações obrigatórias estão presentes
    pub fn validate(&self) -> AuthResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::config_error("EBAY_CLIENT_ID é obrigatório"));
        }

        if self.client_secret.trim().is_empty() {
            return Err(AuthError::config_error("EBAY_CLIENT_SECRET é obrigatório"));
        }

        if self.redirect_uri.trim().is_empty() {
            return Err(AuthError::config_error("EBAY_REDIRECT_URI é obrigatório"));
        }

        for (name, url) in [
            ("EBAY_AUTH_URL", &self.auth_url),
            ("EBAY_TOKEN_URL", &self.token_url),
            ("EBAY_IDENTITY_URL", &self.identity_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AuthError::config_error(format!("{} deve ser uma URL válida: {}", name, url)));
            }
        }

        if !self.callback_path.starts_with('/') {
            return Err(AuthError::config_error("EBAY_CALLBACK_PATH deve começar com '/'"));
        }

        if self.login_timeout_secs == 0 || self.http_timeout_secs == 0 {
            return Err(AuthError::config_error("Timeouts devem ser maiores que zero"));
        }

        if self.scope_list().is_empty() {
            return Err(AuthError::config_error("EBAY_SCOPES não pode ser vazio"));
        }

        Ok(())
    }

    /// URL local onde o servidor de callback escuta
    pub fn callback_url(&self) -> String {
        format!("http://{}:{}{}", self.callback_host, self.callback_port, self.callback_path)
    }

    pub fn scope_list(&self) -> Vec<String> {
        self.scopes.split_whitespace().map(str::to_string).collect()
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Resumo da configuração sem segredos (para `status`)
    pub fn summary(&self) -> BTreeMap<String, String> {
        let mut info = BTreeMap::new();
        info.insert("client_id".to_string(), self.client_id.clone());
        info.insert("redirect_uri".to_string(), self.redirect_uri.clone());
        info.insert("callback_url".to_string(), self.callback_url());
        info.insert("token_url".to_string(), self.token_url.clone());
        info.insert("identity_url".to_string(), self.identity_url.clone());
        info.insert("token_file".to_string(), self.token_file.display().to_string());
        info.insert("login_timeout_secs".to_string(), self.login_timeout_secs.to_string());
        info
    }
}
