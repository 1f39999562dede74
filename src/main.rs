use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ebay_auth::auth::{AuthorizationFlow, LoginResult, TokenClient, TokenRefresher, TokenStore};
use ebay_auth::client::{current_user, AuthenticatedExecutor};
use ebay_auth::config::AuthSettings;
use ebay_auth::error::AuthError;
use ebay_auth::utils::token_preview;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// eBay Auth CLI - login OAuth2 e manutenção do token do usuário
#[derive(Parser)]
#[command(name = "ebay-auth")]
#[command(version)]
#[command(about = "Login OAuth2 do eBay e gerenciamento do token do usuário", long_about = None)]
struct Cli {
    /// Arquivo onde as credenciais são salvas (padrão: EBAY_TOKEN_FILE ou .env)
    #[arg(long, global = true)]
    token_file: Option<PathBuf>,

    /// Não abre o navegador; apenas mostra a URL de autorização
    #[arg(long, global = true)]
    no_browser: bool,

    /// Formato de saída (json, pretty)
    #[arg(short = 'o', long, default_value = "pretty", global = true)]
    output: OutputFormat,

    /// Modo verbose para debug
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Comando a executar
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, PartialEq)]
enum OutputFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "pretty" => Ok(OutputFormat::Pretty),
            _ => Err(format!("Formato desconhecido: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Autentica via OAuth2 (navegador + callback local) e salva os tokens
    Login {
        /// Força reautenticação mesmo se já houver token
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Renova o access token usando o refresh token salvo
    Refresh,

    /// Mostra o usuário autenticado
    Whoami {
        /// Consulta a API mesmo se a identidade já estiver salva
        #[arg(long)]
        fetch: bool,
    },

    /// Mostra o estado das credenciais salvas (sem chamadas de rede)
    Status,

    /// Remove as credenciais salvas localmente
    Logout,
}

#[derive(Debug, Serialize)]
struct CliResponse {
    success: bool,
    data: Option<serde_json::Value>,
    error: Option<String>,
}

impl CliResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(msg: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg),
        }
    }

    fn from_auth_error(error: &AuthError) -> Self {
        let mut msg = error.to_string();
        if let Some(details) = error.details() {
            msg.push_str(&format!(" ({})", details));
        }
        Self::error(msg)
    }
}

/// Dependências compartilhadas pelos comandos
struct Services {
    settings: AuthSettings,
    store: Arc<TokenStore>,
    client: Arc<TokenClient>,
}

impl Services {
    fn build(cli: &Cli) -> Result<Self> {
        let mut settings = AuthSettings::load().context("Configuração do eBay inválida")?;

        if let Some(path) = &cli.token_file {
            settings.token_file = path.clone();
        }
        if cli.no_browser {
            settings.open_browser = false;
        }

        let store = Arc::new(
            TokenStore::open(&settings.token_file)
                .with_context(|| format!("Falha ao ler {}", settings.token_file.display()))?,
        );
        let client = Arc::new(TokenClient::new(settings.clone(), store.clone())?);

        Ok(Self {
            settings,
            store,
            client,
        })
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let output_format = cli.output.clone();

    match execute_command(&cli).await {
        Ok(response) => {
            let exit_code = if response.success { 0 } else { 1 };
            output_response(response, &output_format);
            std::process::exit(exit_code);
        }
        Err(e) => {
            eprintln!("❌ Erro: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn execute_command(cli: &Cli) -> Result<CliResponse> {
    let services = Services::build(cli)?;

    match &cli.command {
        Commands::Login { force } => handle_login(&services, *force).await,
        Commands::Refresh => handle_refresh(&services).await,
        Commands::Whoami { fetch } => handle_whoami(&services, *fetch).await,
        Commands::Status => Ok(handle_status(&services)),
        Commands::Logout => handle_logout(&services),
    }
}

async fn handle_login(services: &Services, force: bool) -> Result<CliResponse> {
    if !force {
        if let Some(record) = services.store.get() {
            return Ok(CliResponse::success(json!({
                "message": "Já autenticado. Use --force para reautenticar",
                "user_name": record.user_name,
            })));
        }
    }

    eprintln!("🔐 Iniciando fluxo de autenticação OAuth2...");

    let flow = AuthorizationFlow::new(services.client.clone());
    let pending = match flow.begin().await {
        Ok(pending) => pending,
        Err(e) => return Ok(CliResponse::from_auth_error(&e)),
    };

    eprintln!("🔗 Se o navegador não abrir, acesse manualmente:\n{}", pending.authorization_url());
    eprintln!("⏳ Aguardando autorização (até {}s)...", services.settings.login_timeout_secs);

    match pending.complete().await {
        LoginResult::Success { user_id, user_name } => Ok(CliResponse::success(json!({
            "message": "Autenticação concluída com sucesso!",
            "user_id": user_id,
            "user_name": user_name,
            "token_file": services.settings.token_file.display().to_string(),
        }))),
        LoginResult::Failure { message, details } => Ok(CliResponse::error(match details {
            Some(details) => format!("{} ({})", message, details),
            None => message,
        })),
    }
}

async fn handle_refresh(services: &Services) -> Result<CliResponse> {
    match services.client.refresh().await {
        Ok(token) => {
            let record = services.client.current_token();
            Ok(CliResponse::success(json!({
                "message": "Access token renovado com sucesso!",
                "token_preview": token_preview(&token),
                "expires_at": record.and_then(|r| r.expires_at),
            })))
        }
        Err(e) if e.requires_reauthentication() => Ok(CliResponse::error(format!(
            "{} - execute `ebay-auth login`",
            e
        ))),
        Err(e) => Ok(CliResponse::from_auth_error(&e)),
    }
}

async fn handle_whoami(services: &Services, fetch: bool) -> Result<CliResponse> {
    if !fetch {
        if let Some(identity) = services.store.identity() {
            return Ok(CliResponse::success(json!({
                "user_id": identity.user_id,
                "user_name": identity.user_name,
                "source": "store",
            })));
        }
    }

    let executor = AuthenticatedExecutor::new(services.client.clone());
    let identity = match current_user(
        &executor,
        services.client.http_client(),
        &services.settings.identity_url,
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => return Ok(CliResponse::error(e.to_string())),
    };

    if let Err(e) = services.client.save_identity(&identity) {
        tracing::warn!("⚠️ Identidade não foi salva: {}", e);
    }

    Ok(CliResponse::success(json!({
        "user_id": identity.user_id,
        "user_name": identity.user_name,
        "source": "api",
    })))
}

fn handle_status(services: &Services) -> CliResponse {
    let config = services.settings.summary();

    let credentials = match services.store.get() {
        Some(record) => json!({
            "authenticated": true,
            "access_token": token_preview(&record.access_token),
            "refresh_token": record.refresh_token.as_deref().map(token_preview),
            "obtained_at": record.obtained_at,
            "expires_at": record.expires_at,
            "expired": record.is_expired(),
            "user_id": record.user_id,
            "user_name": record.user_name,
        }),
        None => json!({
            "authenticated": false,
            "refresh_token": services.store.refresh_token().as_deref().map(token_preview),
        }),
    };

    CliResponse::success(json!({
        "credentials": credentials,
        "config": config,
    }))
}

fn handle_logout(services: &Services) -> Result<CliResponse> {
    services.store.clear().context("Falha ao remover credenciais")?;

    Ok(CliResponse::success(json!({
        "message": "Credenciais removidas. Execute `ebay-auth login` para autenticar novamente",
    })))
}

fn output_response(response: CliResponse, format: &OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(&response) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("❌ Erro ao serializar resposta: {}", e),
        },
        OutputFormat::Pretty => {
            if response.success {
                if let Some(data) = response.data {
                    println!("✅ Sucesso!");
                    match serde_json::to_string_pretty(&data) {
                        Ok(pretty) => println!("{}", pretty),
                        Err(_) => println!("{}", data),
                    }
                }
            } else if let Some(error) = response.error {
                eprintln!("❌ Erro: {}", error);
            }
        }
    }
}
