//! OAuth authorization code flow with PKCE
use std::{fs, path::PathBuf, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use log::{debug, info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::OnceCell,
    time::timeout,
};
use url::Url;

use super::{AuthMode, Credential, CredentialFuture, CredentialProvider};
use crate::{
    errors::{ErrorKind, OrgBackupError},
    utils::Direction,
};

/// Where GitHub authorizes OAuth apps
const GITHUB_OAUTH_URL: &str = "https://github.com/login/oauth";

/// Scopes needed to list and push organization repositories
const SCOPES: &str = "repo read:org";

/// Loopback address the callback listener binds and the redirect URI names
const CALLBACK_HOST: &str = "127.0.0.1";

/// Default port of the local callback listener
const DEFAULT_REDIRECT_PORT: u16 = 8080;

/// How long to wait for the browser callback
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Page shown in the browser once the code is received
const SUCCESS_PAGE: &str = "<html><head><title>GitHub OAuth Success</title></head>\
<body><h2>Authentication successful</h2>\
<p>You can close this window and return to the terminal.</p></body></html>";

/// OAuth configuration, the `[oauth]` section of the config file
#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub struct OAuthConfig {
    /// OAuth app client id
    pub client_id: Option<String>,

    /// OAuth app client secret
    pub client_secret: Option<String>,

    /// Port of the `http://127.0.0.1:<port>/callback` redirect
    pub redirect_port: Option<u16>,
}

/// Token cached between runs
#[derive(Deserialize, Serialize, Debug)]
struct CachedToken {
    /// Access token
    access_token: String,
}

/// Answer of the token endpoint
#[derive(Deserialize, Debug)]
struct TokenResponse {
    /// Access token on success
    access_token: Option<String>,

    /// Error code on failure
    error: Option<String>,

    /// Error explanation on failure
    error_description: Option<String>,
}

/// PKCE verifier and its S256 challenge
#[derive(Debug, Clone)]
pub(crate) struct Pkce {
    /// Secret kept locally until the code exchange
    pub(crate) verifier: String,

    /// Hash sent with the authorization request
    pub(crate) challenge: String,
}

impl Pkce {
    /// Generate a fresh verifier
    pub(crate) fn generate() -> Self {
        Self::from_verifier(random_urlsafe(32))
    }

    /// Derive the challenge of `verifier`
    pub(crate) fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

/// Outcome of one request to the callback listener
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    /// Authorization code with a matching state
    Code(String),
    /// The user or GitHub refused the authorization
    Denied(String),
    /// Unrelated or malformed request, keep waiting
    Ignored(u16, &'static str),
}

/// Browser based OAuth login.
///
/// The token serves both organizations and is cached on disk.
#[derive(Debug)]
pub struct OAuthProvider {
    /// OAuth app client id
    client_id: String,

    /// OAuth app client secret
    client_secret: String,

    /// Local callback port
    redirect_port: u16,

    /// File holding the cached token
    token_cache: PathBuf,

    /// Base URL of the authorize and token endpoints
    oauth_url: String,

    /// Reqwest client
    client: reqwest::Client,

    /// Token acquired during this run
    credential: OnceCell<Credential>,
}

impl OAuthProvider {
    /// Create a provider
    /// # Errors
    /// `Config` if the client id or secret is missing
    pub fn new(config: &OAuthConfig, token_cache: PathBuf) -> Result<Self, OrgBackupError> {
        let missing = |what: &str| {
            OrgBackupError::new(ErrorKind::Config).with_text(&format!(
                "OAuth {what} missing: register an app at \
                 https://github.com/settings/applications/new with callback \
                 http://{CALLBACK_HOST}:<port>/callback and set [oauth] {what} in the config file"
            ))
        };
        let Some(client_id) = config.client_id.clone() else {
            return Err(missing("client_id"));
        };
        let Some(client_secret) = config.client_secret.clone() else {
            return Err(missing("client_secret"));
        };
        Ok(Self {
            client_id,
            client_secret,
            redirect_port: config.redirect_port.unwrap_or(DEFAULT_REDIRECT_PORT),
            token_cache,
            oauth_url: GITHUB_OAUTH_URL.to_string(),
            client: reqwest::Client::new(),
            credential: OnceCell::new(),
        })
    }

    /// Point the flow at another OAuth server
    pub fn with_oauth_url(mut self, oauth_url: &str) -> Self {
        self.oauth_url = oauth_url.trim_end_matches('/').to_string();
        self
    }

    /// Redirect URI registered with the app
    fn redirect_uri(&self) -> String {
        format!("http://{CALLBACK_HOST}:{}/callback", self.redirect_port)
    }

    /// URL the user opens to grant access
    pub(crate) fn authorization_url(
        &self,
        pkce: &Pkce,
        state: &str,
    ) -> Result<Url, OrgBackupError> {
        let mut url = Url::parse(&format!("{}/authorize", self.oauth_url)).map_err(|e| {
            OrgBackupError::new_with_source(ErrorKind::Config, "Invalid OAuth URL", e)
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri())
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("response_type", "code")
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url)
    }

    /// Token from a previous run
    fn load_cached(&self) -> Option<Credential> {
        let contents = fs::read_to_string(&self.token_cache).ok()?;
        match serde_json::from_str::<CachedToken>(&contents) {
            Ok(cached) if !cached.access_token.is_empty() => {
                Some(Credential::new(cached.access_token))
            }
            Ok(_) => None,
            Err(e) => {
                warn!(
                    "Ignoring unreadable token cache {}: {e}",
                    self.token_cache.display()
                );
                None
            }
        }
    }

    /// Persist the token for the next run
    fn save_cached(&self, credential: &Credential) -> Result<(), OrgBackupError> {
        let cached = CachedToken {
            access_token: credential.secret().to_string(),
        };
        let json = serde_json::to_string_pretty(&cached)?;
        fs::write(&self.token_cache, json).map_err(|e| {
            OrgBackupError::new_with_source(ErrorKind::Io, "Unable to save the OAuth token", e)
        })?;
        info!("OAuth token saved to {}", self.token_cache.display());
        Ok(())
    }

    /// Listen where the redirect URI points
    async fn bind_callback(&self) -> Result<TcpListener, OrgBackupError> {
        TcpListener::bind((CALLBACK_HOST, self.redirect_port))
            .await
            .map_err(|e| {
                OrgBackupError::new_with_source(
                    ErrorKind::Io,
                    &format!("Unable to listen on port {}", self.redirect_port),
                    e,
                )
            })
    }

    /// Run the whole browser flow
    async fn login(&self) -> Result<Credential, OrgBackupError> {
        let pkce = Pkce::generate();
        let state = random_urlsafe(32);
        let url = self.authorization_url(&pkce, &state)?;
        let listener = self.bind_callback().await?;
        println!("Open this URL in your browser to authorize access:\n{url}");
        info!(
            "Waiting for the authorization callback on {}",
            self.redirect_uri()
        );
        let code = timeout(CALLBACK_TIMEOUT, wait_for_code(&listener, &state))
            .await
            .map_err(|_| {
                OrgBackupError::new(ErrorKind::Auth)
                    .with_text("OAuth authentication timed out or was cancelled")
            })??;
        debug!("Exchanging authorization code for an access token");
        self.exchange(&code, &pkce).await
    }

    /// Trade the authorization code for an access token
    pub(crate) async fn exchange(
        &self,
        code: &str,
        pkce: &Pkce,
    ) -> Result<Credential, OrgBackupError> {
        let redirect_uri = self.redirect_uri();
        let response = self
            .client
            .post(format!("{}/access_token", self.oauth_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OrgBackupError::new(ErrorKind::Auth)
                .with_text(&format!("Token exchange failed ({status}): {text}")));
        }
        let text = response.text().await?;
        let token: TokenResponse = serde_json::from_str(&text)?;
        match token.access_token {
            Some(access_token) if !access_token.is_empty() => Ok(Credential::new(access_token)),
            _ => Err(OrgBackupError::new(ErrorKind::Auth).with_text(&format!(
                "Token exchange failed: {} {}",
                token.error.unwrap_or_default(),
                token.error_description.unwrap_or_default()
            ))),
        }
    }
}

impl CredentialProvider for OAuthProvider {
    fn acquire(&self, direction: Direction) -> CredentialFuture<'_> {
        Box::pin(async move {
            let credential = self
                .credential
                .get_or_try_init(|| async {
                    if let Some(cached) = self.load_cached() {
                        info!("Using existing OAuth token");
                        return Ok(cached);
                    }
                    let credential = self.login().await?;
                    self.save_cached(&credential)?;
                    Ok::<_, OrgBackupError>(credential)
                })
                .await?;
            debug!("OAuth credential ready for {direction}");
            Ok(credential.clone())
        })
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Oauth
    }
}

/// Accept connections until the callback carries a code
async fn wait_for_code(listener: &TcpListener, state: &str) -> Result<String, OrgBackupError> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let target = match read_request_target(&mut stream).await {
            Ok(target) => target,
            Err(e) => {
                debug!("Ignoring unreadable callback request: {e}");
                continue;
            }
        };
        match parse_callback(&target, state) {
            Callback::Code(code) => {
                respond(&mut stream, 200, "OK", SUCCESS_PAGE).await;
                return Ok(code);
            }
            Callback::Denied(reason) => {
                respond(&mut stream, 400, "Bad Request", &reason).await;
                return Err(OrgBackupError::new(ErrorKind::Auth)
                    .with_text(&format!("OAuth authorization refused: {reason}")));
            }
            Callback::Ignored(status, reason) => {
                respond(&mut stream, status, reason, reason).await;
            }
        }
    }
}

/// Read the request line of an HTTP request and return its target
async fn read_request_target(stream: &mut TcpStream) -> Result<String, OrgBackupError> {
    let mut buffer = vec![0u8; 8192];
    let mut read = 0;
    while read < buffer.len() {
        let n = stream.read(&mut buffer[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
        if buffer[..read].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let request = String::from_utf8_lossy(&buffer[..read]);
    let line = request.lines().next().unwrap_or_default();
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(target.to_string()),
        _ => Err(format!("unexpected request line '{line}'").into()),
    }
}

/// Interpret the target of a callback request
fn parse_callback(target: &str, expected_state: &str) -> Callback {
    let url = match Url::parse(&format!("http://localhost{target}")) {
        Ok(url) => url,
        Err(_) => return Callback::Ignored(400, "Malformed request"),
    };
    if url.path() != "/callback" {
        return Callback::Ignored(404, "Not found");
    }
    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Callback::Denied(value.into_owned()),
            _ => {}
        }
    }
    match (code, state) {
        (Some(code), Some(state)) if state == expected_state => Callback::Code(code),
        (Some(_), Some(_)) => Callback::Denied("invalid state parameter".to_string()),
        _ => Callback::Ignored(400, "Missing required parameters"),
    }
}

/// Write a minimal HTML response, errors are only logged
async fn respond(stream: &mut TcpStream, status: u16, reason: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!("Unable to answer the callback request: {e}");
    }
}

/// Random URL safe string built from `bytes` random bytes
fn random_urlsafe(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buffer);
    URL_SAFE_NO_PAD.encode(buffer)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(cache: PathBuf) -> OAuthProvider {
        let config = OAuthConfig {
            client_id: Some("client-123".to_string()),
            client_secret: Some("shh".to_string()),
            redirect_port: Some(9123),
        };
        OAuthProvider::new(&config, cache).unwrap()
    }

    #[test]
    fn pkce_matches_rfc_7636_example() {
        let pkce = Pkce::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(
            pkce.challenge,
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn generated_verifiers_differ() {
        let a = Pkce::generate();
        let b = Pkce::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_eq!(a.verifier.len(), 43);
    }

    #[test]
    fn authorization_url_carries_challenge() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path().join("token.json"));
        let pkce = Pkce::from_verifier("verifier".to_string());
        let url = provider.authorization_url(&pkce, "state-1").unwrap();
        assert_eq!(url.path(), "/login/oauth/authorize");
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["state"], "state-1");
        assert_eq!(pairs["code_challenge"], pkce.challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:9123/callback");
    }

    #[tokio::test]
    async fn callback_listener_is_reachable_at_the_redirect_uri() {
        let port = std::net::TcpListener::bind((CALLBACK_HOST, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let dir = tempfile::tempdir().unwrap();
        let config = OAuthConfig {
            client_id: Some("client-123".to_string()),
            client_secret: Some("shh".to_string()),
            redirect_port: Some(port),
        };
        let provider = OAuthProvider::new(&config, dir.path().join("token.json")).unwrap();
        let _listener = provider.bind_callback().await.unwrap();

        let redirect = Url::parse(&provider.redirect_uri()).unwrap();
        let host = redirect.host_str().unwrap();
        TcpStream::connect((host, redirect.port().unwrap()))
            .await
            .unwrap();
    }

    #[test]
    fn callback_parsing() {
        assert_eq!(
            parse_callback("/callback?code=abc&state=s1", "s1"),
            Callback::Code("abc".to_string())
        );
        assert!(matches!(
            parse_callback("/callback?code=abc&state=other", "s1"),
            Callback::Denied(_)
        ));
        assert_eq!(
            parse_callback("/callback?error=access_denied&state=s1", "s1"),
            Callback::Denied("access_denied".to_string())
        );
        assert_eq!(
            parse_callback("/favicon.ico", "s1"),
            Callback::Ignored(404, "Not found")
        );
        assert_eq!(
            parse_callback("/callback?state=s1", "s1"),
            Callback::Ignored(400, "Missing required parameters")
        );
    }

    #[test]
    fn missing_client_secret_is_config_error() {
        let config = OAuthConfig {
            client_id: Some("id".to_string()),
            ..Default::default()
        };
        let err = OAuthProvider::new(&config, PathBuf::from("token.json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn cached_token_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("token.json");
        fs::write(&cache, r#"{"access_token": "gho_cached"}"#).unwrap();
        let provider = provider(cache);
        let source = provider.acquire(Direction::Source).await.unwrap();
        let destination = provider.acquire(Direction::Destination).await.unwrap();
        assert_eq!(source.secret(), "gho_cached");
        assert_eq!(source, destination);
    }

    #[tokio::test]
    async fn exchange_returns_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/access_token"))
            .and(body_string_contains("code_verifier=verifier"))
            .and(body_string_contains("code=the-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "gho_new",
                "token_type": "bearer",
                "scope": "repo,read:org"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path().join("token.json")).with_oauth_url(&server.uri());
        let pkce = Pkce::from_verifier("verifier".to_string());
        let credential = provider.exchange("the-code", &pkce).await.unwrap();
        assert_eq!(credential.secret(), "gho_new");
    }

    #[tokio::test]
    async fn exchange_error_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "bad_verification_code",
                "error_description": "The code passed is incorrect or expired."
            })))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path().join("token.json")).with_oauth_url(&server.uri());
        let pkce = Pkce::from_verifier("verifier".to_string());
        let err = provider.exchange("stale", &pkce).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.to_string().contains("bad_verification_code"));
    }
}
