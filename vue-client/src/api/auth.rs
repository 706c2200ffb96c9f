use std::{collections::BTreeMap, fmt, io::ErrorKind, path::Path};

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use super::VueConfig;
use crate::error::VueError;

pub const USERNAME_ENV: &str = "EMPORIA_USERNAME";
pub const PASSWORD_ENV: &str = "EMPORIA_PASSWORD";

const INITIATE_AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            username: non_empty(USERNAME_ENV),
            password: non_empty(PASSWORD_ENV),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Tokens persisted between runs in the token cache file.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("username", &self.username)
            .field("id_token", &self.id_token.is_some())
            .field("refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Returns `Ok(None)` when no cache file exists yet.
pub async fn load_token_cache(path: &Path) -> Result<Option<TokenSet>, VueError> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(VueError::TokenCache(format!("{}: {e}", path.display()))),
    };
    let tokens = serde_json::from_str(&contents)
        .map_err(|e| VueError::TokenCache(format!("{}: {e}", path.display())))?;
    Ok(Some(tokens))
}

pub async fn store_token_cache(path: &Path, tokens: &TokenSet) -> Result<(), VueError> {
    let body = serde_json::to_vec_pretty(tokens).map_err(|e| VueError::TokenCache(e.to_string()))?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| VueError::TokenCache(format!("{}: {e}", path.display())))
}

#[derive(Debug, PartialEq)]
pub(crate) enum AuthFlow<'a> {
    Password { username: &'a str, password: &'a str },
    Refresh { username: Option<&'a str>, refresh_token: &'a str },
}

/// Pick the single login attempt to make: a supplied password wins, otherwise a
/// cached refresh token is used.
pub(crate) fn choose_flow<'a>(
    credentials: &'a Credentials,
    cached: Option<&'a TokenSet>,
) -> Result<AuthFlow<'a>, VueError> {
    let username = credentials
        .username
        .as_deref()
        .or_else(|| cached.and_then(|t| t.username.as_deref()));

    if let Some(password) = credentials.password.as_deref() {
        let username = username
            .ok_or_else(|| VueError::Auth("password supplied without a username".to_string()))?;
        return Ok(AuthFlow::Password { username, password });
    }

    match cached.and_then(|t| t.refresh_token.as_deref()) {
        Some(refresh_token) => Ok(AuthFlow::Refresh {
            username,
            refresh_token,
        }),
        None => Err(VueError::Auth(
            "no password supplied and no cached refresh token".to_string(),
        )),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthRequest<'a> {
    auth_flow: &'a str,
    client_id: &'a str,
    auth_parameters: BTreeMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    authentication_result: Option<AuthenticationResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    id_token: String,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct IdentityProviderError {
    #[serde(default, rename = "__type")]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub(crate) async fn authenticate(
    http: &reqwest::Client,
    cfg: &VueConfig,
    flow: AuthFlow<'_>,
) -> Result<TokenSet, VueError> {
    let (auth_flow, username, params, previous_refresh) = match flow {
        AuthFlow::Password { username, password } => (
            "USER_PASSWORD_AUTH",
            Some(username),
            BTreeMap::from([("USERNAME", username), ("PASSWORD", password)]),
            None,
        ),
        AuthFlow::Refresh {
            username,
            refresh_token,
        } => (
            "REFRESH_TOKEN_AUTH",
            username,
            BTreeMap::from([("REFRESH_TOKEN", refresh_token)]),
            Some(refresh_token),
        ),
    };

    let request = InitiateAuthRequest {
        auth_flow,
        client_id: &cfg.client_id,
        auth_parameters: params,
    };
    let body = serde_json::to_vec(&request).map_err(|e| VueError::Decode(e.to_string()))?;

    let resp = http
        .post(&cfg.auth_url)
        .header("X-Amz-Target", INITIATE_AUTH_TARGET)
        .header(CONTENT_TYPE, AMZ_JSON)
        .body(body)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        let reason = serde_json::from_str::<IdentityProviderError>(&text)
            .ok()
            .and_then(|e| e.message.or(e.kind))
            .unwrap_or_else(|| format!("identity provider returned {status}"));
        return Err(VueError::Auth(reason));
    }

    let parsed: InitiateAuthResponse =
        serde_json::from_str(&text).map_err(|e| VueError::Decode(format!("auth response: {e}")))?;
    let result = parsed.authentication_result.ok_or_else(|| {
        VueError::Auth(format!("{auth_flow} requires an additional challenge"))
    })?;

    Ok(TokenSet {
        username: username.map(str::to_string),
        id_token: Some(result.id_token),
        access_token: Some(result.access_token),
        // Refresh responses do not rotate the refresh token.
        refresh_token: result
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string)),
    })
}
