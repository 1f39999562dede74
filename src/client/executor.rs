//! Authenticated Executor
//!
//! Ponto único por onde passam as chamadas autenticadas: obtém o token
//! atual, executa a lógica do chamador e, em caso de 401, renova o token e
//! repete a chamada uma única vez.

use reqwest::{Response, StatusCode};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::auth::exchange::TokenRefresher;
use crate::error::{AuthError, CallError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Retried,
}

/// Executor de chamadas autenticadas
#[derive(Clone)]
pub struct AuthenticatedExecutor {
    refresher: Arc<dyn TokenRefresher>,
}

impl AuthenticatedExecutor {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { refresher }
    }

    /// Executa `request_logic` com o token atual
    ///
    /// - token ausente ou expirado: refresh antes da primeira chamada
    /// - `Unauthorized`: refresh e uma nova tentativa com o token renovado
    /// - `ProviderRejected` / `Transport`: devolvidos sem nova tentativa
    pub async fn execute<T, F, Fut>(&self, mut request_logic: F) -> Result<T, CallError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let mut token = self.valid_token().await?;
        let mut attempt = Attempt::Initial;

        loop {
            match request_logic(token.clone()).await {
                Err(CallError::Unauthorized) if attempt == Attempt::Initial => {
                    warn!("🔑 [Executor] HTTP 401 - renovando token e repetindo a chamada");
                    token = self.refresh(Some(&token)).await?;
                    attempt = Attempt::Retried;
                }
                Err(CallError::Unauthorized) => {
                    warn!("❌ [Executor] HTTP 401 mesmo após refresh");
                    return Err(CallError::Unauthorized);
                }
                outcome => return outcome,
            }
        }
    }

    /// Alias de [`AuthenticatedExecutor::execute`]
    pub async fn execute_authenticated<T, F, Fut>(&self, request_logic: F) -> Result<T, CallError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.execute(request_logic).await
    }

    async fn valid_token(&self) -> Result<String, CallError> {
        match self.refresher.current_token() {
            Some(record) if !record.is_expired() => Ok(record.access_token),
            Some(record) => {
                info!("⏰ [Executor] Token expirado ou prestes a expirar - renovando");
                self.refresh(Some(&record.access_token)).await
            }
            None => {
                debug!("[Executor] Nenhum access token armazenado - tentando refresh");
                self.refresh(None).await
            }
        }
    }

    async fn refresh(&self, stale: Option<&str>) -> Result<String, CallError> {
        self.refresher
            .refresh_access_token(stale)
            .await
            .map_err(|e| match e {
                AuthError::Transport(err) => CallError::Transport(err.to_string()),
                other => CallError::TokenUnavailable(other.to_string()),
            })
    }
}

/// Classifica a resposta HTTP: 2xx → Ok, 401 → `Unauthorized`, resto → `ProviderRejected`
pub async fn classify_response(response: Response) -> Result<Response, CallError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(CallError::Unauthorized);
    }

    let body = response.text().await.unwrap_or_default();
    Err(CallError::rejected(status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::TokenRecord;
    use crate::error::AuthResult;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Refresher em memória: cada refresh emite `AT{n+1}`
    struct StubRefresher {
        current: Mutex<Option<TokenRecord>>,
        refreshes: AtomicUsize,
        fail_with: Option<fn() -> AuthError>,
    }

    impl StubRefresher {
        fn with_token(token: Option<&str>) -> Self {
            Self {
                current: Mutex::new(token.map(|t| record(t, None))),
                refreshes: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        fn failing(token: Option<&str>, error: fn() -> AuthError) -> Self {
            Self {
                fail_with: Some(error),
                ..Self::with_token(token)
            }
        }

        fn refresh_count(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    fn record(token: &str, expires_in_secs: Option<i64>) -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            access_token: token.to_string(),
            refresh_token: Some("RT1".to_string()),
            obtained_at: now,
            expires_at: expires_in_secs.map(|secs| now + ChronoDuration::seconds(secs)),
            user_id: None,
            user_name: None,
        }
    }

    #[async_trait]
    impl TokenRefresher for StubRefresher {
        fn current_token(&self) -> Option<TokenRecord> {
            self.current.lock().unwrap().clone()
        }

        async fn refresh_access_token(&self, _stale: Option<&str>) -> AuthResult<String> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(error) = self.fail_with {
                return Err(error());
            }
            let token = format!("AT{}", n + 1);
            *self.current.lock().unwrap() = Some(record(&token, Some(7200)));
            Ok(token)
        }
    }

    fn executor(refresher: &Arc<StubRefresher>) -> AuthenticatedExecutor {
        AuthenticatedExecutor::new(refresher.clone())
    }

    #[tokio::test]
    async fn test_success_performs_zero_refreshes() {
        let refresher = Arc::new(StubRefresher::with_token(Some("AT1")));
        let calls = AtomicUsize::new(0);

        let result = executor(&refresher)
            .execute(|token| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, CallError>(format!("ok with {}", token)) }
            })
            .await;

        assert_eq!(result, Ok("ok with AT1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_always_unauthorized_invokes_logic_twice() {
        let refresher = Arc::new(StubRefresher::with_token(Some("AT1")));
        let seen = Mutex::new(Vec::new());

        let result: Result<(), CallError> = executor(&refresher)
            .execute(|token| {
                seen.lock().unwrap().push(token);
                async { Err(CallError::Unauthorized) }
            })
            .await;

        assert_eq!(result, Err(CallError::Unauthorized));
        assert_eq!(*seen.lock().unwrap(), vec!["AT1".to_string(), "AT2".to_string()]);
        assert_eq!(refresher.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_uses_refreshed_token() {
        let refresher = Arc::new(StubRefresher::with_token(Some("AT1")));

        let result = executor(&refresher)
            .execute(|token| async move {
                if token == "AT1" {
                    Err(CallError::Unauthorized)
                } else {
                    Ok(token)
                }
            })
            .await;

        assert_eq!(result, Ok("AT2".to_string()));
        assert_eq!(refresher.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_and_transport_are_not_retried() {
        let refresher = Arc::new(StubRefresher::with_token(Some("AT1")));
        let calls = AtomicUsize::new(0);

        let rejected: Result<(), CallError> = executor(&refresher)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::rejected(404, "not found")) }
            })
            .await;
        assert_eq!(rejected, Err(CallError::rejected(404, "not found")));

        let transport: Result<(), CallError> = executor(&refresher)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::Transport("connection reset".to_string())) }
            })
            .await;
        assert!(matches!(transport, Err(CallError::Transport(_))));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refresher.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_token_and_failed_refresh_is_token_unavailable() {
        let refresher = Arc::new(StubRefresher::failing(None, || {
            AuthError::refresh_error("nenhum refresh token armazenado")
        }));
        let calls = AtomicUsize::new(0);

        let result: Result<(), CallError> = executor(&refresher)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        match result {
            Err(error @ CallError::TokenUnavailable(_)) => assert!(error.requires_login()),
            other => panic!("esperado TokenUnavailable, obtido {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_after_unauthorized_is_token_unavailable() {
        let refresher = Arc::new(StubRefresher::failing(Some("AT1"), || {
            AuthError::refresh_error("status 400: invalid_grant")
        }));

        let result: Result<(), CallError> = executor(&refresher)
            .execute(|_| async { Err(CallError::Unauthorized) })
            .await;

        assert!(matches!(result, Err(CallError::TokenUnavailable(_))));
        assert_eq!(refresher.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_call() {
        let refresher = Arc::new(StubRefresher::with_token(None));
        *refresher.current.lock().unwrap() = Some(record("AT1", Some(60)));

        let result = executor(&refresher)
            .execute(|token| async move { Ok::<_, CallError>(token) })
            .await;

        assert_eq!(result, Ok("AT2".to_string()));
        assert_eq!(refresher.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_classify_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock::matchers::path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(wiremock::matchers::path("/unauthorized"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(wiremock::matchers::path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let get = |p: &str| reqwest::get(format!("{}{}", server.uri(), p));

        let ok = classify_response(get("/ok").await.unwrap()).await.unwrap();
        assert_eq!(ok.text().await.unwrap(), "fine");

        let unauthorized = classify_response(get("/unauthorized").await.unwrap()).await;
        assert!(matches!(unauthorized, Err(CallError::Unauthorized)));

        let broken = classify_response(get("/broken").await.unwrap()).await;
        assert_eq!(broken.err(), Some(CallError::rejected(500, "boom")));
    }

    #[tokio::test]
    async fn test_unreachable_provider_maps_to_transport() {
        let transport = reqwest::get("http://127.0.0.1:1/").await.unwrap_err();
        let error = CallError::from(transport);
        assert!(matches!(error, CallError::Transport(_)));
    }
}
