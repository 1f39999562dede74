use reqwest::Client;
use tracing::warn;
use crate::auth::store::Identity;
use crate::client::executor::{classify_response, AuthenticatedExecutor};
use crate::error::CallError;

/// Consulta o usuário dono do token através do executor (com refresh em 401)
pub async fn current_user(
    executor: &AuthenticatedExecutor,
    http: &Client,
    identity_url: &str,
) -> Result<Identity, CallError> {
    executor
        .execute(|token| {
            let request = http.get(identity_url).bearer_auth(token);
            async move {
                let response = classify_response(request.send().await?).await?;
                let status = response.status().as_u16();
                let body = response.text().await?;
                parse_identity(status, body)
            }
        })
        .await
}

// Corpo 2xx ilegível é falha do provedor, não de rede
fn parse_identity(status: u16, body: String) -> Result<Identity, CallError> {
    match serde_json::from_str::<Identity>(&body) {
        Ok(identity) => Ok(identity),
        Err(e) => {
            warn!("⚠️ [Identity] Resposta de identidade inválida: {}", e);
            Err(CallError::rejected(status, body))
        }
    }
}
