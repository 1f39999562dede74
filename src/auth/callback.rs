use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::config::AuthSettings;
use crate::error::{AuthError, AuthResult};

/// Tempo máximo para o servidor terminar de responder ao navegador
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Resultado do redirect OAuth2, produzido uma única vez por tentativa
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Success { code: String, state: Option<String> },
    ProviderError { fields: BTreeMap<String, String> },
    Malformed { raw_path: String },
}

impl CallbackResult {
    /// `code` presente → Success; senão `error` → ProviderError; senão Malformed
    pub fn from_query<I>(params: I, raw_path: &str) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let fields: BTreeMap<String, String> = params.into_iter().collect();

        if let Some(code) = fields.get("code").filter(|c| !c.is_empty()) {
            return Self::Success {
                code: code.clone(),
                state: fields.get("state").cloned(),
            };
        }

        if fields.contains_key("error") {
            return Self::ProviderError { fields };
        }

        Self::Malformed {
            raw_path: raw_path.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Servidor HTTP local que recebe o redirect do provedor
///
/// O bind acontece em [`CallbackListener::bind`], antes de o navegador ser
/// aberto, para que o redirect nunca chegue antes do servidor.
pub struct CallbackListener {
    listener: TcpListener,
    path: String,
    local_addr: SocketAddr,
}

impl CallbackListener {
    pub async fn bind(settings: &AuthSettings) -> AuthResult<Self> {
        Self::bind_to(&settings.callback_host, settings.callback_port, &settings.callback_path).await
    }

    pub async fn bind_to(host: &str, port: u16, path: &str) -> AuthResult<Self> {
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            AuthError::callback_error(format!("Falha ao abrir servidor em {}:{}: {}", host, port, e))
        })?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| AuthError::callback_error(format!("Endereço local indisponível: {}", e)))?;

        debug!("[Callback] Porta {} reservada para {}", local_addr, path);

        Ok(Self {
            listener,
            path: path.to_string(),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Inicia o servidor em uma task separada
    pub fn spawn(self) -> CallbackHandle {
        let Self { listener, path, local_addr } = self;
        let (result_tx, result_rx) = oneshot::channel::<CallbackResult>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = ListenerState {
            result_tx: Arc::new(Mutex::new(Some(result_tx))),
            shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
        };

        let mut router = Router::new().route(&path, get(handle_callback));
        if path != "/" {
            router = router.route("/", get(|| async { Html(WAITING_PAGE) }));
        }
        let app = router.fallback(not_found).with_state(state);

        info!("🌐 [Callback] Servidor de callback iniciado em http://{}{}", local_addr, path);

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        CallbackHandle {
            local_addr,
            result_rx,
            task,
        }
    }
}

#[derive(Clone)]
struct ListenerState {
    result_tx: Arc<Mutex<Option<oneshot::Sender<CallbackResult>>>>,
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

async fn handle_callback(
    State(state): State<ListenerState>,
    uri: Uri,
    Query(params): Query<Vec<(String, String)>>,
) -> Html<&'static str> {
    let result = CallbackResult::from_query(params, &uri.to_string());
    let page = if result.is_success() { SUCCESS_PAGE } else { ERROR_PAGE };

    match &result {
        CallbackResult::Success { .. } => info!("✅ [Callback] Código de autorização recebido"),
        CallbackResult::ProviderError { fields } => {
            warn!("❌ [Callback] Provedor retornou erro: {:?}", fields.get("error"))
        }
        CallbackResult::Malformed { raw_path } => warn!("⚠️ [Callback] Callback sem 'code' nem 'error': {}", raw_path),
    }

    let sender = state.result_tx.lock().ok().and_then(|mut tx| tx.take());
    match sender {
        Some(tx) => {
            let _ = tx.send(result);
            // Encerramento gracioso: a resposta em andamento ainda é entregue
            if let Some(shutdown) = state.shutdown_tx.lock().ok().and_then(|mut tx| tx.take()) {
                let _ = shutdown.send(());
            }
        }
        None => debug!("[Callback] Callback repetido ignorado"),
    }

    Html(page)
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Handle do servidor em execução; consumido por [`CallbackHandle::wait`]
pub struct CallbackHandle {
    local_addr: SocketAddr,
    result_rx: oneshot::Receiver<CallbackResult>,
    task: JoinHandle<io::Result<()>>,
}

impl CallbackHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Aguarda o callback com timeout
    ///
    /// No timeout o servidor é abortado e aguardado antes do retorno, então
    /// a porta já está livre para um novo bind.
    pub async fn wait(self, timeout: Duration) -> AuthResult<CallbackResult> {
        let Self { result_rx, mut task, .. } = self;

        match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(result)) => {
                if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                    debug!("[Callback] Conexões ainda abertas - forçando encerramento");
                    task.abort();
                    let _ = task.await;
                }
                info!("🔒 [Callback] Servidor de callback encerrado");
                Ok(result)
            }
            Ok(Err(_)) => {
                let detail = match task.await {
                    Ok(Err(e)) => e.to_string(),
                    Ok(Ok(())) => "servidor encerrou sem callback".to_string(),
                    Err(e) => e.to_string(),
                };
                Err(AuthError::callback_error(format!("Canal de comunicação fechado: {}", detail)))
            }
            Err(_) => {
                task.abort();
                let _ = task.await;
                warn!("⏰ [Callback] Nenhum callback em {}s - servidor encerrado", timeout.as_secs());
                Err(AuthError::CallbackTimeout(timeout))
            }
        }
    }
}

// Páginas HTML para o servidor de callback
const WAITING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>eBay OAuth2 - Aguardando Autorização</title>
    <meta charset="UTF-8">
    <style>
        body { font-family: Arial, sans-serif; background: #f5f5f5; text-align: center; padding: 20px; }
        .container { max-width: 600px; margin: 50px auto; background: white; padding: 30px; border-radius: 8px; }
        h1 { color: #0064d2; }
    </style>
</head>
<body>
    <div class="container">
        <h1>🔐 eBay OAuth2</h1>
        <h2>Aguardando autorização...</h2>
        <p>Por favor, complete o processo de autorização no eBay.</p>
    </div>
</body>
</html>
"#;

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>eBay OAuth2 - Autorização Concluída</title>
    <meta charset="UTF-8">
    <style>
        body { font-family: Arial, sans-serif; background: #f5f5f5; text-align: center; padding: 20px; }
        .container { max-width: 600px; margin: 50px auto; background: white; padding: 30px; border-radius: 8px; }
        h1 { color: #28a745; }
    </style>
</head>
<body>
    <div class="container">
        <div style="font-size: 64px">✅</div>
        <h1>Autorização Concluída!</h1>
        <p>Você pode fechar esta janela e retornar ao terminal.</p>
    </div>
    <script>
        setTimeout(() => { window.close(); }, 3000);
    </script>
</body>
</html>
"#;

const ERROR_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>eBay OAuth2 - Erro na Autorização</title>
    <meta charset="UTF-8">
    <style>
        body { font-family: Arial, sans-serif; background: #f5f5f5; text-align: center; padding: 20px; }
        .container { max-width: 600px; margin: 50px auto; background: white; padding: 30px; border-radius: 8px; }
        h1 { color: #dc3545; }
    </style>
</head>
<body>
    <div class="container">
        <div style="font-size: 64px">❌</div>
        <h1>Erro na Autorização</h1>
        <p>O eBay não retornou um código de autorização.</p>
        <p>Verifique o terminal, tente novamente e feche esta janela.</p>
    </div>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_code_and_state() {
        let result = CallbackResult::from_query(
            pairs(&[("code", "ABC"), ("state", "XYZ")]),
            "/oauth/callback?code=ABC&state=XYZ",
        );

        assert_eq!(
            result,
            CallbackResult::Success {
                code: "ABC".to_string(),
                state: Some("XYZ".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_provider_error_keeps_all_fields() {
        let result = CallbackResult::from_query(
            pairs(&[("error", "access_denied"), ("error_description", "user declined")]),
            "/oauth/callback?error=access_denied&error_description=user+declined",
        );

        match result {
            CallbackResult::ProviderError { fields } => {
                assert_eq!(fields.get("error").map(String::as_str), Some("access_denied"));
                assert_eq!(fields.get("error_description").map(String::as_str), Some("user declined"));
            }
            other => panic!("esperado ProviderError, obtido {:?}", other),
        }
    }

    #[test]
    fn test_parse_neither_code_nor_error() {
        let result = CallbackResult::from_query(pairs(&[("foo", "bar")]), "/oauth/callback?foo=bar");
        assert_eq!(
            result,
            CallbackResult::Malformed {
                raw_path: "/oauth/callback?foo=bar".to_string()
            }
        );

        let empty_code = CallbackResult::from_query(pairs(&[("code", "")]), "/oauth/callback?code=");
        assert!(matches!(empty_code, CallbackResult::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_listener_delivers_callback_once() {
        let listener = CallbackListener::bind_to("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let addr = listener.local_addr();
        let handle = listener.spawn();

        let client = reqwest::Client::new();

        let waiting = client.get(format!("http://{}/", addr)).send().await.unwrap();
        assert_eq!(waiting.status(), 200);
        assert!(waiting.text().await.unwrap().contains("Aguardando"));

        let missing = client.get(format!("http://{}/favicon.ico", addr)).send().await.unwrap();
        assert_eq!(missing.status(), 404);

        let response = client
            .get(format!("http://{}/oauth/callback?code=ABC&state=XYZ", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.text().await.unwrap().contains("Autorização Concluída"));

        let result = handle.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            result,
            CallbackResult::Success {
                code: "ABC".to_string(),
                state: Some("XYZ".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_provider_error_serves_error_page() {
        let listener = CallbackListener::bind_to("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let addr = listener.local_addr();
        let handle = listener.spawn();

        let body = reqwest::get(format!("http://{}/oauth/callback?error=access_denied", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("Erro na Autorização"));

        let result = handle.wait(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(result, CallbackResult::ProviderError { .. }));
    }

    #[tokio::test]
    async fn test_timeout_releases_port() {
        let listener = CallbackListener::bind_to("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let port = listener.local_addr().port();
        let handle = listener.spawn();

        let result = handle.wait(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(AuthError::CallbackTimeout(_))));

        let rebound = CallbackListener::bind_to("127.0.0.1", port, "/oauth/callback").await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_callback_error() {
        let first = CallbackListener::bind_to("127.0.0.1", 0, "/oauth/callback").await.unwrap();
        let port = first.local_addr().port();

        let second = CallbackListener::bind_to("127.0.0.1", port, "/oauth/callback").await;
        assert!(matches!(second, Err(AuthError::CallbackServer(_))));
    }
}
