use ebay_auth::{
    AuthSettings, AuthorizationFlow, CallbackListener, LoginResult, TokenClient, TokenStore,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings_for(server: &MockServer, dir: &TempDir) -> AuthSettings {
    let mut settings = AuthSettings::new("client", "secret", "Seller-App-PRD-runame");
    settings.token_url = format!("{}/identity/v1/oauth2/token", server.uri());
    settings.identity_url = format!("{}/commerce/identity/v1/user/", server.uri());
    settings.callback_host = "127.0.0.1".to_string();
    settings.callback_port = 0;
    settings.open_browser = false;
    settings.login_timeout_secs = 5;
    settings.token_file = dir.path().join(".env");
    settings
}

fn state_from(url: &str) -> String {
    url.split("state=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .unwrap()
        .to_string()
}

async fn mount_provider(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/identity/v1/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=v%5E1.1%23CODE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "AT1",
            "refresh_token": "RT1",
            "expires_in": 7200,
            "refresh_token_expires_in": 47304000,
            "token_type": "User Access Token"
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/commerce/identity/v1/user/"))
        .and(header("authorization", "Bearer AT1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "userId": "u-42",
            "username": "seller_one"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_exchanges_code_and_persists_credentials() {
    let server = MockServer::start().await;
    mount_provider(&server).await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".env"), "EBAY_CLIENT_ID=client\n").unwrap();

    let settings = settings_for(&server, &dir);
    let store = Arc::new(TokenStore::open(&settings.token_file).unwrap());
    let client = Arc::new(TokenClient::new(settings.clone(), store.clone()).unwrap());
    let flow = AuthorizationFlow::new(client);

    let pending = flow.begin().await.unwrap();
    let state = state_from(pending.authorization_url());
    assert_eq!(state, pending.state().state_nonce);

    // Redirect do provedor chegando ao servidor local
    let callback = format!(
        "http://{}/oauth/callback?code=v%5E1.1%23CODE&state={}",
        pending.callback_addr(),
        state
    );
    let browser = tokio::spawn(async move { reqwest::get(callback).await.unwrap().text().await.unwrap() });

    let result = pending.complete().await;
    assert!(browser.await.unwrap().contains("Autorização Concluída"));

    assert_eq!(
        result,
        LoginResult::Success {
            user_id: Some("u-42".to_string()),
            user_name: Some("seller_one".to_string()),
        }
    );

    let record = store.get().unwrap();
    assert_eq!(record.access_token, "AT1");
    assert_eq!(record.refresh_token.as_deref(), Some("RT1"));

    let content = std::fs::read_to_string(&settings.token_file).unwrap();
    assert!(content.starts_with("EBAY_CLIENT_ID=client\n"));
    assert!(content.contains("EBAY_USER_ACCESS_TOKEN='AT1'"));
    assert!(content.contains("EBAY_USER_NAME='seller_one'"));

    let reopened = TokenStore::open(&settings.token_file).unwrap();
    assert_eq!(reopened.get().unwrap().user_id.as_deref(), Some("u-42"));
}

#[tokio::test]
async fn login_times_out_and_releases_port() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut settings = settings_for(&server, &dir);
    settings.login_timeout_secs = 1;

    let client = Arc::new(TokenClient::new(settings, Arc::new(TokenStore::in_memory())).unwrap());
    let flow = AuthorizationFlow::new(client);

    let pending = flow.begin().await.unwrap();
    let port = pending.callback_addr().port();

    match pending.complete().await {
        LoginResult::Failure { message, .. } => assert!(message.contains("Nenhum callback recebido")),
        other => panic!("esperado Failure, obtido {:?}", other),
    }

    let rebound = CallbackListener::bind_to("127.0.0.1", port, "/oauth/callback").await;
    assert!(rebound.is_ok());
}

#[tokio::test]
async fn login_rejects_forged_state_without_exchanging() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(TokenStore::in_memory());
    let client = Arc::new(TokenClient::new(settings_for(&server, &dir), store.clone()).unwrap());
    let flow = AuthorizationFlow::new(client);

    let pending = flow.begin().await.unwrap();
    let callback = format!("http://{}/oauth/callback?code=ABC&state=forged", pending.callback_addr());
    let browser = tokio::spawn(async move { reqwest::get(callback).await });

    let result = pending.complete().await;
    browser.await.unwrap().unwrap();

    assert!(!result.is_success());
    assert!(store.get().is_none());
}
