//! Authenticated session shared by every transfer of a run.
//!
//! The archive authenticates through a redirect chain: the data host bounces
//! the client to a login host, which checks HTTP Basic credentials and sends
//! it back with session cookies. [`AuthenticatedSession`] walks such chains
//! one hop at a time so it can decide per hop which credentials may travel:
//!
//! - Basic credentials only go to the login origin.
//! - The bearer token (if the login answered with one) only goes to the
//!   origin of the request that started the chain.
//! - Cookies follow the jar's own domain scoping.
//!
//! Re-authentication is single-flight: concurrent callers that observed the
//! same session generation share one login.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_LENGTH, LOCATION, RANGE};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use url::{Origin, Url};

use super::{AuthError, Credentials};
use crate::download::DownloadError;
use crate::download::constants::{CONNECT_TIMEOUT_SECS, MAX_REDIRECT_HOPS, READ_TIMEOUT_SECS};
use crate::user_agent;

/// How a session is established and how its client behaves.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Endpoint whose redirect chain ends in an authenticated state.
    pub login_url: Url,
    /// Host that receives Basic credentials. Defaults to `login_url`'s origin.
    pub auth_url: Option<Url>,
    /// Redirect hops followed per request before giving up.
    pub max_redirects: usize,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Maximum idle time between two reads of a response body.
    pub read_timeout: Duration,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    pub use_env_proxy: bool,
}

impl SessionConfig {
    /// Config with default timeouts and hop cap for `login_url`.
    #[must_use]
    pub fn new(login_url: Url) -> Self {
        Self {
            login_url,
            auth_url: None,
            max_redirects: MAX_REDIRECT_HOPS,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            use_env_proxy: true,
        }
    }

    /// Sets a login host distinct from the `login_url` host.
    #[must_use]
    pub fn with_auth_url(mut self, auth_url: Url) -> Self {
        self.auth_url = Some(auth_url);
        self
    }

    fn auth_origin(&self) -> Origin {
        self.auth_url
            .as_ref()
            .unwrap_or(&self.login_url)
            .origin()
    }
}

/// Mutable token state of a session. Cookies live in the client's jar.
struct SessionContext {
    bearer_token: Option<String>,
    refreshed_at: SystemTime,
}

// Custom Debug impl that redacts the bearer token.
impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: Option<String>,
}

/// A logged-in HTTP session.
///
/// Created once per run by [`AuthenticatedSession::establish`] and shared
/// between workers behind an `Arc`.
#[derive(Debug)]
pub struct AuthenticatedSession {
    client: Client,
    credentials: Credentials,
    config: SessionConfig,
    auth_origin: Origin,
    context: RwLock<SessionContext>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
}

impl AuthenticatedSession {
    /// Logs in by walking `config.login_url`'s redirect chain.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] when any hop answers 401/403,
    /// [`AuthError::UnexpectedRedirect`] when the chain exceeds the hop cap,
    /// and [`AuthError::Network`] when a hop cannot be reached.
    #[instrument(skip(credentials, config), fields(login_url = %config.login_url, username = credentials.username()))]
    pub async fn establish(
        credentials: &Credentials,
        config: SessionConfig,
    ) -> Result<Self, AuthError> {
        let client = build_client(&config, Arc::new(Jar::default()))?;
        let auth_origin = config.auth_origin();

        let bearer_token = login(&client, credentials, &config, &auth_origin).await?;
        info!(bearer = bearer_token.is_some(), "session established");

        Ok(Self {
            client,
            credentials: credentials.clone(),
            config,
            auth_origin,
            context: RwLock::new(SessionContext {
                bearer_token,
                refreshed_at: SystemTime::now(),
            }),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(1),
        })
    }

    /// Current session generation; bumped by every refresh.
    ///
    /// Read it before sending a request and hand it to
    /// [`reauthenticate`](Self::reauthenticate) if that request is rejected.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// When the token context was last refreshed.
    pub async fn refreshed_at(&self) -> SystemTime {
        self.context.read().await.refreshed_at
    }

    /// Attaches the credentials allowed for one hop of a request.
    ///
    /// `origin` is the URL the request chain started at, `target` the hop
    /// about to be sent. Basic credentials are attached only when `target`
    /// is the login origin; otherwise the bearer token is attached only when
    /// `target` shares `origin`'s origin.
    pub async fn authorize(
        &self,
        request: RequestBuilder,
        origin: &Url,
        target: &Url,
    ) -> RequestBuilder {
        let target_origin = target.origin();
        if target_origin == self.auth_origin {
            return request.basic_auth(
                self.credentials.username(),
                Some(self.credentials.password()),
            );
        }

        let context = self.context.read().await;
        match &context.bearer_token {
            Some(token) if target_origin == origin.origin() => request.bearer_auth(token),
            _ => request,
        }
    }

    /// Logs in again unless someone already did since `observed_generation`.
    ///
    /// Refreshes are serialized. The generation is bumped whether or not the
    /// login succeeds, so callers queued behind a failed refresh do not
    /// repeat it.
    ///
    /// # Errors
    ///
    /// Returns the login's [`AuthError`] when this call performed the refresh
    /// and it failed.
    #[instrument(skip(self))]
    pub async fn reauthenticate(&self, observed_generation: u64) -> Result<(), AuthError> {
        let _refresh = self.refresh_lock.lock().await;

        let current = self.generation();
        if current != observed_generation {
            debug!(current, "session already refreshed by another worker");
            return Ok(());
        }

        info!("session rejected, logging in again");
        let outcome = login(
            &self.client,
            &self.credentials,
            &self.config,
            &self.auth_origin,
        )
        .await;

        if let Ok(bearer_token) = &outcome {
            let mut context = self.context.write().await;
            context.bearer_token.clone_from(bearer_token);
            context.refreshed_at = SystemTime::now();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(_) => Ok(()),
            Err(error) => {
                warn!(error = %error, "re-authentication failed");
                Err(error)
            }
        }
    }

    /// Sends an authorized GET, following redirects manually.
    ///
    /// A non-zero `range_start` adds `Range: bytes=<range_start>-` to every
    /// hop. The final response is returned whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`], [`DownloadError::Network`] /
    /// [`DownloadError::Timeout`], or [`DownloadError::TooManyRedirects`].
    pub async fn send_get(&self, url: &str, range_start: u64) -> Result<Response, DownloadError> {
        self.send_following(Method::GET, url, range_start).await
    }

    /// Asks for the size of `url` with a HEAD request.
    ///
    /// Best effort: any failure, non-success status, or missing header
    /// yields `None`.
    pub async fn probe_length(&self, url: &str) -> Option<u64> {
        let response = match self.send_following(Method::HEAD, url, 0).await {
            Ok(response) => response,
            Err(error) => {
                debug!(url, error = %error, "size probe failed");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(url, status = response.status().as_u16(), "size probe rejected");
            return None;
        }
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
    }

    async fn send_following(
        &self,
        method: Method,
        url: &str,
        range_start: u64,
    ) -> Result<Response, DownloadError> {
        let origin = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let mut target = origin.clone();
        let mut hops = 0;

        loop {
            let mut request = self.client.request(method.clone(), target.clone());
            if range_start > 0 {
                request = request.header(RANGE, format!("bytes={range_start}-"));
            }
            let request = self.authorize(request, &origin, &target).await;

            let response = request
                .send()
                .await
                .map_err(|e| DownloadError::network(url, e))?;

            if !response.status().is_redirection() {
                return Ok(response);
            }
            let Some(next) = redirect_target(&target, &response) else {
                return Ok(response);
            };
            if hops >= self.config.max_redirects {
                return Err(DownloadError::too_many_redirects(url, hops));
            }
            hops += 1;
            debug!(
                url,
                hop = hops,
                status = response.status().as_u16(),
                next = %next,
                "following redirect"
            );
            target = next;
        }
    }
}

fn build_client(config: &SessionConfig, cookies: Arc<Jar>) -> Result<Client, AuthError> {
    let mut builder = Client::builder()
        .cookie_provider(cookies)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .user_agent(user_agent::default_user_agent());
    if !config.use_env_proxy {
        builder = builder.no_proxy();
    }
    builder.build().map_err(AuthError::Client)
}

/// Walks the login chain; returns the bearer token if the final body had one.
async fn login(
    client: &Client,
    credentials: &Credentials,
    config: &SessionConfig,
    auth_origin: &Origin,
) -> Result<Option<String>, AuthError> {
    let mut url = config.login_url.clone();
    let mut hops = 0;

    loop {
        let mut request = client.get(url.clone());
        let submits_credentials = url.origin() == *auth_origin;
        if submits_credentials {
            request = request.basic_auth(credentials.username(), Some(credentials.password()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::network(url.as_str(), e))?;
        let status = response.status();
        debug!(
            url = %url,
            hop = hops,
            status = status.as_u16(),
            submits_credentials,
            "login hop"
        );

        if status.is_redirection() {
            let Some(next) = redirect_target(&url, &response) else {
                return Err(AuthError::unexpected_redirect(url.as_str(), hops));
            };
            if hops >= config.max_redirects {
                return Err(AuthError::unexpected_redirect(next.as_str(), hops));
            }
            hops += 1;
            url = next;
            continue;
        }

        if matches!(status.as_u16(), 401 | 403) {
            return Err(AuthError::invalid_credentials(url.as_str(), status.as_u16()));
        }
        if !status.is_success() {
            return Err(AuthError::unexpected_status(url.as_str(), status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::network(url.as_str(), e))?;
        return Ok(serde_json::from_slice::<TokenBody>(&body)
            .ok()
            .and_then(|token| token.access_token));
    }
}

/// Resolves the `Location` of a redirect against the URL that produced it.
fn redirect_target(current: &Url, response: &Response) -> Option<Url> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}
