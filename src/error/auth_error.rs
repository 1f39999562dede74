use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Tipos de erro do ciclo de vida OAuth2 (login, troca de código, refresh, armazenamento)
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Configuração inválida: {0}")]
    Configuration(String),

    #[error("Autorização negada: {message}")]
    AuthorizationDenied {
        message: String,
        fields: BTreeMap<String, String>,
    },

    #[error("Callback OAuth2 malformado (sem 'code' nem 'error'): {0}")]
    MalformedCallback(String),

    #[error("Nenhum callback recebido em {}s; servidor local encerrado", .0.as_secs())]
    CallbackTimeout(Duration),

    #[error("Erro do servidor de callback: {0}")]
    CallbackServer(String),

    #[error("Falha ao trocar código por token (status {status}): {body}")]
    TokenExchangeFailed { status: u16, body: String },

    #[error("Falha no refresh do token: {0}. É necessário executar o login novamente")]
    RefreshFailed(String),

    #[error("Falha ao consultar identidade do usuário: {0}")]
    IdentityLookupFailed(String),

    #[error("Erro de rede: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Erro de armazenamento: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Erro de serialização: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn callback_error(msg: impl Into<String>) -> Self {
        Self::CallbackServer(msg.into())
    }

    pub fn refresh_error(msg: impl Into<String>) -> Self {
        Self::RefreshFailed(msg.into())
    }

    pub fn identity_error(msg: impl Into<String>) -> Self {
        Self::IdentityLookupFailed(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            message: msg.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Indica que só um novo login interativo resolve o erro
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::RefreshFailed(_)
                | Self::TokenExchangeFailed { .. }
                | Self::AuthorizationDenied { .. }
                | Self::CallbackTimeout(_)
                | Self::MalformedCallback(_)
        )
    }

    /// Detalhes estruturados para relatórios ao operador
    pub fn details(&self) -> Option<String> {
        match self {
            Self::AuthorizationDenied { fields, .. } if !fields.is_empty() => Some(
                fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            Self::TokenExchangeFailed { body, .. } => Some(body.clone()),
            _ => None,
        }
    }
}

/// Tipo de resultado padrão para operações de autenticação
pub type AuthResult<T> = Result<T, AuthError>;
