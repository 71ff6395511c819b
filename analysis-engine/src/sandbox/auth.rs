use std::fmt;

use serde::Deserialize;
use shared::{OrchestratorError, OrchestratorResult};

/// How the controller authenticates. Chosen once at construction.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Stateless token sent on every request
    ApiToken { token_id: String, secret: String },
    /// Username/password exchanged for a ticket and CSRF token
    Session { username: String, password: String },
}

impl Credentials {
    pub fn api_token(token_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials::ApiToken {
            token_id: token_id.into(),
            secret: secret.into(),
        }
    }

    pub fn session(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Session {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Pick a scheme from optional settings. A complete token pair wins over a
    /// complete username/password pair; empty strings count as unset.
    pub fn resolve(
        token_id: Option<&str>,
        token_secret: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> OrchestratorResult<Self> {
        let present = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

        if let (Some(id), Some(secret)) = (present(token_id), present(token_secret)) {
            return Ok(Credentials::api_token(id, secret));
        }
        if let (Some(user), Some(pass)) = (present(username), present(password)) {
            return Ok(Credentials::session(user, pass));
        }

        Err(OrchestratorError::Configuration(
            "environment controller needs either an API token (id and secret) or a username and password"
                .to_string(),
        ))
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Credentials::ApiToken { .. } => "api_token",
            Credentials::Session { .. } => "session",
        }
    }

    /// `Authorization` header value. Empty for session auth, which uses a
    /// cookie instead.
    pub fn token_header(&self) -> String {
        match self {
            Credentials::ApiToken { token_id, secret } => format!("PVEAPIToken={}={}", token_id, secret),
            Credentials::Session { .. } => String::new(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::ApiToken { token_id, .. } => f
                .debug_struct("ApiToken")
                .field("token_id", token_id)
                .field("secret", &"<redacted>")
                .finish(),
            Credentials::Session { username, .. } => f
                .debug_struct("Session")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Result of a successful `/access/ticket` exchange
#[derive(Clone, Deserialize)]
pub struct SessionTicket {
    pub ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_token: String,
}

impl SessionTicket {
    pub fn cookie(&self) -> String {
        format!("PVEAuthCookie={}", self.ticket)
    }
}

impl fmt::Debug for SessionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTicket").finish_non_exhaustive()
    }
}
