use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ApiRole {
    /// Full control: join/leave/move groups, query topology.
    Admin,
    /// Topology mutation without full admin (join/leave/move) but no key
    /// management.
    Ops,
    /// Read-only: query topology.
    Reader,
}

impl ApiRole {
    pub fn allows(&self, required: &ApiPermission) -> bool {
        match (self, required) {
            (ApiRole::Admin, _) => true,
            (ApiRole::Ops, ApiPermission::Mutate) | (ApiRole::Ops, ApiPermission::Read) => true,
            (ApiRole::Reader, ApiPermission::Read) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiPermission {
    Admin,
    Mutate,
    Read,
}

#[derive(Debug, Clone)]
struct ApiKey {
    role: ApiRole,
}

/// Authenticates requests to the `barq-admin` HTTP surface: a bearer JWT,
/// an `x-api-key`, or, when no keys/verifier have been configured,
/// anonymous Admin access (so a freshly-started cluster is reachable before
/// an operator provisions credentials). Mirrors the reference admin
/// surface's layered auth, generalized off of per-tenant identity (this
/// cluster has no tenant concept) down to a flat role.
#[derive(Clone, Default)]
pub struct ApiAuth {
    keys: Arc<RwLock<HashMap<String, ApiKey>>>,
    require_keys: bool,
    jwt_verifier: Option<Arc<dyn JwtVerifier>>,
}

impl std::fmt::Debug for ApiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiAuth")
            .field("keys", &"<redacted>")
            .field("require_keys", &self.require_keys)
            .field("jwt_verifier", &self.jwt_verifier.is_some())
            .finish()
    }
}

impl ApiAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_keys(mut self) -> Self {
        self.require_keys = true;
        self
    }

    pub fn insert(&self, key: impl Into<String>, role: ApiRole) {
        let mut guard = self.keys.write().expect("auth lock poisoned");
        guard.insert(key.into(), ApiKey { role });
    }

    pub fn with_jwt_verifier(mut self, verifier: Arc<dyn JwtVerifier>) -> Self {
        self.jwt_verifier = Some(verifier);
        self
    }

    pub fn authenticate(&self, headers: &HeaderMap, required: ApiPermission) -> Result<ApiIdentity, ApiError> {
        let guard = self.keys.read().expect("auth lock poisoned");
        let fallback_allowed = !self.require_keys && guard.is_empty() && self.jwt_verifier.is_none();
        if fallback_allowed {
            return Ok(ApiIdentity {
                role: ApiRole::Admin,
                actor: Some("anonymous".to_string()),
                method: AuthMethod::Anonymous,
            });
        }

        if let Some(token) = bearer_token(headers) {
            let verifier = self
                .jwt_verifier
                .as_ref()
                .ok_or_else(|| ApiError::Unauthorized("jwt auth not configured".into()))?;
            let claims = verifier.verify(token)?;
            if !claims.role.allows(&required) {
                return Err(ApiError::Forbidden("insufficient role".into()));
            }
            return Ok(ApiIdentity {
                role: claims.role,
                actor: claims.subject,
                method: AuthMethod::Jwt,
            });
        }

        let api_key = headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized("missing api key".into()))?;

        let record = guard.get(api_key).ok_or_else(|| ApiError::Unauthorized("invalid api key".into()))?;
        if !record.role.allows(&required) {
            return Err(ApiError::Forbidden("insufficient role".into()));
        }

        Ok(ApiIdentity {
            role: record.role.clone(),
            actor: Some(redact_key(api_key)),
            method: AuthMethod::ApiKey,
        })
    }
}

#[derive(Debug, Clone)]
pub struct JwtClaims {
    pub role: ApiRole,
    pub subject: Option<String>,
}

pub trait JwtVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<JwtClaims, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ApiIdentity {
    pub role: ApiRole,
    pub actor: Option<String>,
    pub method: AuthMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Anonymous,
    ApiKey,
    Jwt,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Anonymous => "anonymous",
            AuthMethod::ApiKey => "api-key",
            AuthMethod::Jwt => "jwt",
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn redact_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= 4 {
        return "****".to_string();
    }
    let prefix: String = key.chars().take(4).collect();
    format!("{}***", prefix)
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub client_ca_path: Option<PathBuf>,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            client_ca_path: None,
        }
    }

    pub fn with_client_ca(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.client_ca_path = Some(ca_path.into());
        self
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if !self.cert_path.exists() {
            return Err(ApiError::Tls("certificate path does not exist".into()));
        }
        if !self.key_path.exists() {
            return Err(ApiError::Tls("private key path does not exist".into()));
        }
        if let Some(ca) = &self.client_ca_path {
            if !ca.exists() {
                return Err(ApiError::Tls("client CA path does not exist".into()));
            }
        }
        Ok(())
    }

    fn load_certificates(&self) -> Result<Vec<CertificateDer<'static>>, ApiError> {
        let cert_file = File::open(&self.cert_path).map_err(|err| ApiError::Tls(format!("failed to open cert: {err}")))?;
        let mut reader = BufReader::new(cert_file);
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ApiError::Tls(format!("failed to parse cert: {err}")))?;
        if certs.is_empty() {
            return Err(ApiError::Tls("no certificates found".into()));
        }
        Ok(certs)
    }

    fn load_private_key(&self) -> Result<PrivateKeyDer<'static>, ApiError> {
        let key_file = File::open(&self.key_path).map_err(|err| ApiError::Tls(format!("failed to open key: {err}")))?;
        let mut reader = BufReader::new(key_file);
        rustls_pemfile::private_key(&mut reader)
            .map_err(|err| ApiError::Tls(format!("failed to parse key: {err}")))?
            .ok_or_else(|| ApiError::Tls("no private key found".into()))
    }

    fn load_client_ca(&self) -> Result<RootCertStore, ApiError> {
        let mut store = RootCertStore::empty();
        if let Some(path) = &self.client_ca_path {
            let ca_file = File::open(path).map_err(|err| ApiError::Tls(format!("failed to open client CA: {err}")))?;
            let mut reader = BufReader::new(ca_file);
            let certs = rustls_pemfile::certs(&mut reader)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| ApiError::Tls(format!("failed to parse client CA: {err}")))?;
            for cert in certs {
                store.add(cert).map_err(|err| ApiError::Tls(format!("invalid client CA: {err}")))?;
            }
        }
        Ok(store)
    }

    pub fn build_server_config(&self) -> Result<rustls::ServerConfig, ApiError> {
        self.validate()?;
        let certs = self.load_certificates()?;
        let key = self.load_private_key()?;

        let builder = rustls::ServerConfig::builder();
        let server_config = if self.client_ca_path.is_some() {
            let client_ca = self.load_client_ca()?;
            let verifier = WebPkiClientVerifier::builder(client_ca.into())
                .build()
                .map_err(|err| ApiError::Tls(format!("invalid client verifier: {err}")))?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(|err| ApiError::Tls(format!("invalid tls config: {err}")))?
        } else {
            builder
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(|err| ApiError::Tls(format!("invalid tls config: {err}")))?
        };

        Ok(server_config)
    }

    pub async fn into_rustls_config(&self) -> Result<RustlsConfig, ApiError> {
        let server_config = self.build_server_config()?;
        Ok(RustlsConfig::from_config(Arc::new(server_config)))
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("tls configuration error: {0}")]
    Tls(String),

    #[error("every shardmaster endpoint was unreachable")]
    Unreachable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Tls(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unreachable => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
