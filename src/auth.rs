//! OAuth credentials for the upload API.
//!
//! Tokens are cached in a JSON file next to the client secrets. A cached token
//! is used while it has more than a minute left, refreshed when it carries a
//! refresh token, and otherwise replaced by running the installed-app consent
//! flow against a loopback redirect.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, UploadError};

pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Anything able to produce a bearer token for the next request.
pub trait AccessTokenSource {
    fn access_token(&mut self) -> Result<String, UploadError>;
}

/// A fixed token, e.g. one exported from the OAuth playground.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl AccessTokenSource for StaticToken {
    fn access_token(&mut self) -> Result<String, UploadError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Reads a client secrets download (`installed` or `web` flavour).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                ConfigError::MissingFile {
                    what: "client secrets",
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::InvalidSecrets {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                }
            }
        })?;
        let invalid = |reason: String| ConfigError::InvalidSecrets {
            path: path.to_path_buf(),
            reason,
        };
        let file: SecretsFile =
            serde_json::from_str(&content).map_err(|err| invalid(err.to_string()))?;
        file.installed
            .or(file.web)
            .ok_or_else(|| invalid("expected an \"installed\" or \"web\" section".to_string()))
    }
}

/// Token cache entry. Also reads the field names used by Google's Python
/// client (`token`, `expiry`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredToken {
    #[serde(alias = "token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "expiry", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - now > TimeDelta::seconds(EXPIRY_MARGIN_SECS),
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn into_stored(self, previous_refresh: Option<String>, now: DateTime<Utc>) -> StoredToken {
        StoredToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self.expires_in.map(|secs| now + TimeDelta::seconds(secs)),
        }
    }
}

/// Token source backed by client secrets and a token cache file.
pub struct Authenticator {
    secrets: ClientSecrets,
    token_path: PathBuf,
    token: Option<StoredToken>,
    agent: ureq::Agent,
}

impl Authenticator {
    pub fn new(secrets: ClientSecrets, token_path: impl Into<PathBuf>) -> Self {
        let token_path = token_path.into();
        let token = read_token(&token_path);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .build();
        Self {
            secrets,
            token_path,
            token,
            agent,
        }
    }

    fn refresh(&self, refresh_token: &str) -> Result<StoredToken, UploadError> {
        let response: TokenResponse = self
            .agent
            .post(&self.secrets.token_uri)
            .send_form(&[
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .map_err(token_endpoint_error)?
            .into_json()
            .map_err(|err| UploadError::Auth(format!("unreadable token response: {err}")))?;
        Ok(response.into_stored(Some(refresh_token.to_string()), Utc::now()))
    }

    fn authorize_interactively(&self) -> Result<StoredToken, UploadError> {
        let auth_err = |err: io::Error| UploadError::Auth(format!("loopback listener: {err}"));
        let listener = TcpListener::bind("127.0.0.1:0").map_err(auth_err)?;
        let port = listener.local_addr().map_err(auth_err)?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let consent_url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&access_type=offline&prompt=consent",
            self.secrets.auth_uri,
            urlencoding::encode(&self.secrets.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(UPLOAD_SCOPE),
        );

        println!("Authorize uploads by visiting this URL:");
        println!("  {consent_url}");
        if let Err(err) = webbrowser::open(&consent_url) {
            debug!("could not open a browser: {err}");
        }

        let (mut stream, _) = listener.accept().map_err(auth_err)?;
        let mut request_line = String::new();
        BufReader::new(&mut stream)
            .read_line(&mut request_line)
            .map_err(auth_err)?;
        let outcome = parse_redirect(&request_line);
        answer_redirect(&mut stream, outcome.is_ok());
        let code = outcome.map_err(UploadError::Auth)?;

        let response: TokenResponse = self
            .agent
            .post(&self.secrets.token_uri)
            .send_form(&[
                ("code", code.as_str()),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .map_err(token_endpoint_error)?
            .into_json()
            .map_err(|err| UploadError::Auth(format!("unreadable token response: {err}")))?;
        Ok(response.into_stored(None, Utc::now()))
    }

    fn save(&self, token: &StoredToken) {
        let result = serde_json::to_string_pretty(token)
            .map_err(io::Error::other)
            .and_then(|json| fs::write(&self.token_path, json));
        if let Err(err) = result {
            warn!(
                "could not save token to {}: {err}",
                self.token_path.display()
            );
        }
    }
}

impl AccessTokenSource for Authenticator {
    fn access_token(&mut self) -> Result<String, UploadError> {
        if let Some(token) = &self.token
            && token.is_fresh(Utc::now())
        {
            return Ok(token.access_token.clone());
        }

        let refresh_token = self.token.as_ref().and_then(|t| t.refresh_token.clone());
        let refreshed = match refresh_token {
            Some(refresh_token) => match self.refresh(&refresh_token) {
                Ok(token) => {
                    info!("refreshed upload token");
                    Some(token)
                }
                Err(err) => {
                    warn!("failed to refresh token: {err}");
                    None
                }
            },
            None => None,
        };

        let token = match refreshed {
            Some(token) => token,
            None => self.authorize_interactively()?,
        };
        self.save(&token);
        let access_token = token.access_token.clone();
        self.token = Some(token);
        Ok(access_token)
    }
}

fn read_token(path: &Path) -> Option<StoredToken> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(token) => Some(token),
        Err(err) => {
            warn!("ignoring unreadable token file {}: {err}", path.display());
            None
        }
    }
}

fn token_endpoint_error(err: ureq::Error) -> UploadError {
    match err {
        ureq::Error::Status(status, response) => UploadError::Auth(format!(
            "token endpoint returned HTTP {status}: {}",
            response.into_string().unwrap_or_default()
        )),
        ureq::Error::Transport(transport) => UploadError::Auth(transport.to_string()),
    }
}

/// Pulls the authorization code out of the redirect's request line.
/// Sends the confirmation page back to the browser. Failing to do so only
/// costs the user that page.
fn answer_redirect(stream: &mut impl Write, authorized: bool) {
    let page = if authorized {
        "Authorization complete. You can close this window."
    } else {
        "Authorization failed. Check the terminal for details."
    };
    if let Err(err) = write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{page}",
        page.len()
    ) {
        debug!("could not answer the consent redirect: {err}");
    }
}

fn parse_redirect(request_line: &str) -> Result<String, String> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| "malformed redirect request".to_string())?;
    let query = target.split_once('?').map(|(_, q)| q).unwrap_or_default();

    let mut code = None;
    for pair in query.split('&') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match name {
            "code" => code = Some(value),
            "error" => return Err(format!("consent was not granted: {value}")),
            _ => {}
        }
    }
    code.ok_or_else(|| "redirect did not carry an authorization code".to_string())
}
