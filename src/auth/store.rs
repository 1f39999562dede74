//! Token Store
//!
//! Persistência das credenciais do usuário no mesmo arquivo `.env` usado
//! para configuração. Apenas as chaves `EBAY_USER_*` / `EBAY_TOKEN_*` são
//! reescritas; as demais linhas são preservadas como estão.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};
use crate::error::{AuthError, AuthResult};

pub const ACCESS_TOKEN_KEY: &str = "EBAY_USER_ACCESS_TOKEN";
pub const REFRESH_TOKEN_KEY: &str = "EBAY_USER_REFRESH_TOKEN";
pub const USER_ID_KEY: &str = "EBAY_USER_ID";
pub const USER_NAME_KEY: &str = "EBAY_USER_NAME";
pub const OBTAINED_AT_KEY: &str = "EBAY_TOKEN_OBTAINED_AT";
pub const EXPIRES_AT_KEY: &str = "EBAY_TOKEN_EXPIRES_AT";

const MANAGED_KEYS: [&str; 6] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    USER_ID_KEY,
    USER_NAME_KEY,
    OBTAINED_AT_KEY,
    EXPIRES_AT_KEY,
];

/// Margem de segurança antes da expiração (5 minutos)
pub const EXPIRY_MARGIN_SECS: i64 = 300;

/// Credencial atual do usuário
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub obtained_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl TokenRecord {
    /// Verifica se o token expirou (ou expira dentro da margem de segurança)
    ///
    /// Sem `expires_at` conhecido o token é considerado válido até o
    /// provedor recusá-lo.
    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::seconds(EXPIRY_MARGIN_SECS))
    }

    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + margin >= expires_at,
            None => false,
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.user_id.as_ref().map(|user_id| Identity {
            user_id: user_id.clone(),
            user_name: self.user_name.clone().unwrap_or_default(),
        })
    }
}

/// Identidade do usuário autenticado (endpoint `commerce/identity`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "username", default)]
    pub user_name: String,
}

/// Atualização parcial: campos `None` são preservados
#[derive(Debug, Clone, Default)]
pub struct TokenUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub obtained_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl TokenUpdate {
    pub fn with_identity(mut self, identity: &Identity) -> Self {
        self.user_id = Some(identity.user_id.clone());
        self.user_name = Some(identity.user_name.clone());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StoredCredentials {
    access_token: Option<String>,
    refresh_token: Option<String>,
    obtained_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    user_id: Option<String>,
    user_name: Option<String>,
}

impl StoredCredentials {
    fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut creds = Self::default();

        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }

            match key.as_str() {
                ACCESS_TOKEN_KEY => creds.access_token = Some(value),
                REFRESH_TOKEN_KEY => creds.refresh_token = Some(value),
                USER_ID_KEY => creds.user_id = Some(value),
                USER_NAME_KEY => creds.user_name = Some(value),
                OBTAINED_AT_KEY => creds.obtained_at = parse_timestamp(&key, &value),
                EXPIRES_AT_KEY => creds.expires_at = parse_timestamp(&key, &value),
                _ => {}
            }
        }

        // Token colado manualmente, sem data de obtenção
        if creds.access_token.is_some() && creds.obtained_at.is_none() {
            creds.obtained_at = Some(Utc::now());
        }

        creds
    }

    fn merge(&mut self, update: TokenUpdate) {
        if let Some(access_token) = update.access_token {
            self.access_token = Some(access_token);
            self.obtained_at = Some(update.obtained_at.unwrap_or_else(Utc::now));
            self.expires_at = update.expires_at;
        } else {
            if update.obtained_at.is_some() {
                self.obtained_at = update.obtained_at;
            }
            if update.expires_at.is_some() {
                self.expires_at = update.expires_at;
            }
        }

        if update.refresh_token.is_some() {
            self.refresh_token = update.refresh_token;
        }
        if update.user_id.is_some() {
            self.user_id = update.user_id;
        }
        if update.user_name.is_some() {
            self.user_name = update.user_name;
        }
    }

    fn record(&self) -> Option<TokenRecord> {
        let access_token = self.access_token.clone()?;

        Some(TokenRecord {
            access_token,
            refresh_token: self.refresh_token.clone(),
            obtained_at: self.obtained_at.unwrap_or_else(Utc::now),
            expires_at: self.expires_at,
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
        })
    }

    fn value_for(&self, key: &str) -> Option<String> {
        match key {
            ACCESS_TOKEN_KEY => self.access_token.clone(),
            REFRESH_TOKEN_KEY => self.refresh_token.clone(),
            USER_ID_KEY => self.user_id.clone(),
            USER_NAME_KEY => self.user_name.clone(),
            OBTAINED_AT_KEY => self.obtained_at.map(|t| t.to_rfc3339()),
            EXPIRES_AT_KEY => self.expires_at.map(|t| t.to_rfc3339()),
            _ => None,
        }
    }
}

fn parse_timestamp(key: &str, value: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            warn!("⚠️ [TokenStore] Valor inválido para {} ignorado: {}", key, e);
            None
        }
    }
}

/// Armazenamento das credenciais de um único usuário
///
/// Leituras usam o `RwLock`; escritas são serializadas por `write_lock`,
/// gravam um arquivo temporário irmão e fazem `rename` sobre o alvo. O estado
/// em memória só é trocado depois que o `rename` deu certo.
#[derive(Debug)]
pub struct TokenStore {
    path: Option<PathBuf>,
    state: RwLock<StoredCredentials>,
    write_lock: Mutex<()>,
}

impl TokenStore {
    /// Abre o store a partir do arquivo (inexistente = store vazio)
    pub fn open(path: impl Into<PathBuf>) -> AuthResult<Self> {
        let path = path.into();

        let creds = if path.exists() {
            let pairs = dotenvy::from_path_iter(&path)
                .map_err(env_file_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(env_file_error)?;
            StoredCredentials::from_pairs(pairs)
        } else {
            debug!("[TokenStore] {} não existe - iniciando sem credenciais", path.display());
            StoredCredentials::default()
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(creds),
            write_lock: Mutex::new(()),
        })
    }

    /// Store apenas em memória (nada é gravado em disco)
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(StoredCredentials::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Credencial atual, se houver access token
    pub fn get(&self) -> Option<TokenRecord> {
        self.read_state().record()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read_state().refresh_token.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        let state = self.read_state();
        state.user_id.as_ref().map(|user_id| Identity {
            user_id: user_id.clone(),
            user_name: state.user_name.clone().unwrap_or_default(),
        })
    }

    /// Mescla os campos informados e persiste
    ///
    /// Um novo access token redefine `obtained_at` (padrão: agora) e
    /// `expires_at` (o valor informado), pois descrevem o próprio token.
    pub fn put(&self, update: TokenUpdate) -> AuthResult<Option<TokenRecord>> {
        let creds = self.commit(|creds| creds.merge(update))?;
        Ok(creds.record())
    }

    /// Substitui todas as credenciais (login novo): nada do usuário anterior sobrevive
    pub fn replace(&self, update: TokenUpdate) -> AuthResult<Option<TokenRecord>> {
        let creds = self.commit(|creds| {
            *creds = StoredCredentials::default();
            creds.merge(update);
        })?;
        Ok(creds.record())
    }

    /// Descarta o access token mantendo refresh token e identidade
    pub fn invalidate_access_token(&self) -> AuthResult<()> {
        self.commit(|creds| {
            creds.access_token = None;
            creds.expires_at = None;
        })?;
        info!("[TokenStore] Access token invalidado");
        Ok(())
    }

    /// Remove todas as credenciais (logout local)
    pub fn clear(&self) -> AuthResult<()> {
        self.commit(|creds| *creds = StoredCredentials::default())?;
        info!("🗑️ [TokenStore] Credenciais removidas");
        Ok(())
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoredCredentials> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit<F>(&self, mutate: F) -> AuthResult<StoredCredentials>
    where
        F: FnOnce(&mut StoredCredentials),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = self.read_state().clone();
        mutate(&mut next);

        if let Some(path) = &self.path {
            write_env_file(path, &next)?;
        }

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        Ok(next)
    }
}

fn env_file_error(err: dotenvy::Error) -> AuthError {
    match err {
        dotenvy::Error::Io(io_err) => AuthError::Storage(io_err),
        other => AuthError::Storage(io::Error::new(io::ErrorKind::InvalidData, other.to_string())),
    }
}

/// Reescreve o arquivo trocando apenas as chaves gerenciadas
fn write_env_file(path: &Path, creds: &StoredCredentials) -> AuthResult<()> {
    let existing = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut lines = Vec::new();
    let mut written: Vec<&str> = Vec::new();

    for line in existing.lines() {
        match managed_key(line) {
            Some(key) => {
                if written.contains(&key) {
                    continue;
                }
                written.push(key);
                if let Some(value) = creds.value_for(key) {
                    lines.push(format!("{}={}", key, quote_value(&value)));
                }
            }
            None => lines.push(line.to_string()),
        }
    }

    for key in MANAGED_KEYS {
        if written.contains(&key) {
            continue;
        }
        if let Some(value) = creds.value_for(key) {
            lines.push(format!("{}={}", key, quote_value(&value)));
        }
    }

    let mut content = lines.join("\n");
    content.push('\n');

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".env".to_string());
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    if let Err(e) = fs::write(&tmp_path, content).and_then(|_| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        warn!("❌ [TokenStore] Falha ao gravar {}: {}", path.display(), e);
        return Err(e.into());
    }

    debug!("[TokenStore] Credenciais gravadas em {}", path.display());
    Ok(())
}

fn managed_key(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, _) = trimmed.split_once('=')?;
    let key = key.trim();

    MANAGED_KEYS.iter().copied().find(|managed| *managed == key)
}

/// Aspas simples: o dotenvy lê o valor literalmente (sem `$` nem `#`)
fn quote_value(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{}'", value);
    }

    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$");
    format!("\"{}\"", escaped)
}
