use thiserror::Error;

/// Classificação das falhas de uma chamada autenticada à API do provedor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// HTTP 401: o token foi recusado
    #[error("Não autorizado (HTTP 401): token recusado pelo provedor")]
    Unauthorized,

    /// Qualquer outro status não-2xx
    #[error("Requisição rejeitada pelo provedor (status {status}): {body}")]
    ProviderRejected { status: u16, body: String },

    /// Falha de rede antes de existir uma resposta HTTP
    #[error("Erro de transporte: {0}")]
    Transport(String),

    /// Sem token válido e refresh impossível
    #[error("Token indisponível: {0}. Reautenticação necessária: execute `ebay-auth login`")]
    TokenUnavailable(String),
}

impl CallError {
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::ProviderRejected {
            status,
            body: body.into(),
        }
    }

    /// Indica que o chamador deve disparar um novo login em vez de repetir a chamada
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::TokenUnavailable(_))
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
