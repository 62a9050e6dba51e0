//! Tests for the `barq-admin` auth layer and TLS configuration.
//!
//! Covers:
//! - API authentication and authorization (roles, permissions)
//! - TLS configuration validation
//! - Error display

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue};
use barq_admin::auth::{ApiAuth, ApiError, ApiPermission, ApiRole, AuthMethod, TlsConfig};

// ============================================================================
// Authentication Tests
// ============================================================================

#[test]
fn test_api_auth_anonymous_fallback_when_no_keys() {
    let auth = ApiAuth::new();
    let headers = HeaderMap::new();

    let result = auth.authenticate(&headers, ApiPermission::Read);
    assert!(result.is_ok());

    let identity = result.unwrap();
    assert_eq!(identity.role, ApiRole::Admin);
    assert_eq!(identity.method, AuthMethod::Anonymous);
    assert_eq!(identity.actor, Some("anonymous".to_string()));
}

#[test]
fn test_api_auth_rejects_when_keys_required() {
    let auth = ApiAuth::new().require_keys();
    let headers = HeaderMap::new();

    let result = auth.authenticate(&headers, ApiPermission::Read);
    assert!(result.is_err());

    match result.unwrap_err() {
        ApiError::Unauthorized(msg) => assert!(msg.contains("missing api key")),
        _ => panic!("Expected Unauthorized error"),
    }
}

#[test]
fn test_api_auth_with_valid_api_key() {
    let auth = ApiAuth::new().require_keys();
    auth.insert("test-key-12345", ApiRole::Ops);

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("test-key-12345"));

    let result = auth.authenticate(&headers, ApiPermission::Mutate);
    assert!(result.is_ok());

    let identity = result.unwrap();
    assert_eq!(identity.role, ApiRole::Ops);
    assert_eq!(identity.method, AuthMethod::ApiKey);
}

#[test]
fn test_api_auth_with_invalid_api_key() {
    let auth = ApiAuth::new().require_keys();
    auth.insert("valid-key", ApiRole::Ops);

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("invalid-key"));

    let result = auth.authenticate(&headers, ApiPermission::Mutate);
    assert!(result.is_err());

    match result.unwrap_err() {
        ApiError::Unauthorized(msg) => assert!(msg.contains("invalid api key")),
        _ => panic!("Expected Unauthorized error"),
    }
}

// ============================================================================
// Role Permission Tests
// ============================================================================

#[test]
fn test_admin_role_allows_all_permissions() {
    let role = ApiRole::Admin;

    assert!(role.allows(&ApiPermission::Admin));
    assert!(role.allows(&ApiPermission::Mutate));
    assert!(role.allows(&ApiPermission::Read));
}

#[test]
fn test_ops_role_permissions() {
    let role = ApiRole::Ops;

    assert!(!role.allows(&ApiPermission::Admin));
    assert!(role.allows(&ApiPermission::Mutate));
    assert!(role.allows(&ApiPermission::Read));
}

#[test]
fn test_reader_role_permissions() {
    let role = ApiRole::Reader;

    assert!(!role.allows(&ApiPermission::Admin));
    assert!(!role.allows(&ApiPermission::Mutate));
    assert!(role.allows(&ApiPermission::Read));
}

#[test]
fn test_insufficient_permissions_rejected() {
    let auth = ApiAuth::new().require_keys();
    auth.insert("reader-key", ApiRole::Reader);

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("reader-key"));

    let result = auth.authenticate(&headers, ApiPermission::Mutate);
    assert!(result.is_err());

    match result.unwrap_err() {
        ApiError::Forbidden(msg) => assert!(msg.contains("insufficient role")),
        _ => panic!("Expected Forbidden error"),
    }
}

#[test]
fn test_insufficient_permissions_for_admin_only_move() {
    let auth = ApiAuth::new().require_keys();
    auth.insert("ops-key", ApiRole::Ops);

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("ops-key"));

    let result = auth.authenticate(&headers, ApiPermission::Admin);
    assert!(matches!(result, Err(ApiError::Forbidden(_))));
}

// ============================================================================
// TLS Configuration Tests
// ============================================================================

#[test]
fn test_tls_config_validation_missing_cert() {
    let config = TlsConfig::new("/nonexistent/cert.pem", "/nonexistent/key.pem");

    let result = config.validate();
    assert!(result.is_err());

    match result.unwrap_err() {
        ApiError::Tls(msg) => assert!(msg.contains("certificate path does not exist")),
        _ => panic!("Expected Tls error"),
    }
}

#[test]
fn test_tls_config_with_client_ca_validation() {
    let config = TlsConfig::new("/nonexistent/cert.pem", "/nonexistent/key.pem").with_client_ca("/nonexistent/ca.pem");

    let result = config.validate();
    assert!(result.is_err());
}

// ============================================================================
// AuthMethod Tests
// ============================================================================

#[test]
fn test_auth_method_as_str() {
    assert_eq!(AuthMethod::Anonymous.as_str(), "anonymous");
    assert_eq!(AuthMethod::ApiKey.as_str(), "api-key");
    assert_eq!(AuthMethod::Jwt.as_str(), "jwt");
}

// ============================================================================
// API Error Tests
// ============================================================================

#[test]
fn test_api_error_display() {
    let err = ApiError::BadRequest("invalid parameter".to_string());
    assert_eq!(err.to_string(), "bad request: invalid parameter");

    let err = ApiError::Unauthorized("no token".to_string());
    assert_eq!(err.to_string(), "unauthorized: no token");

    let err = ApiError::Forbidden("no access".to_string());
    assert_eq!(err.to_string(), "forbidden: no access");

    let err = ApiError::Tls("invalid cert".to_string());
    assert_eq!(err.to_string(), "tls configuration error: invalid cert");

    let err = ApiError::Unreachable;
    assert_eq!(err.to_string(), "every shardmaster endpoint was unreachable");
}

// ============================================================================
// Multiple Key Management Tests
// ============================================================================

#[test]
fn test_multiple_api_keys_different_roles() {
    let auth = ApiAuth::new().require_keys();

    auth.insert("key-a", ApiRole::Ops);
    auth.insert("key-b", ApiRole::Reader);

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("key-a"));
    let identity = auth.authenticate(&headers, ApiPermission::Mutate).unwrap();
    assert_eq!(identity.role, ApiRole::Ops);

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("key-b"));
    let identity = auth.authenticate(&headers, ApiPermission::Read).unwrap();
    assert_eq!(identity.role, ApiRole::Reader);
}

#[test]
fn test_api_key_overwrite() {
    let auth = ApiAuth::new().require_keys();

    auth.insert("same-key", ApiRole::Reader);
    auth.insert("same-key", ApiRole::Admin);

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_static("same-key"));

    let identity = auth.authenticate(&headers, ApiPermission::Admin).unwrap();
    assert_eq!(identity.role, ApiRole::Admin);
}

// ============================================================================
// Edge Case Tests
// ============================================================================

#[test]
fn test_bearer_token_without_jwt_verifier_fails() {
    let auth = ApiAuth::new().require_keys();

    let mut headers = HeaderMap::new();
    headers.insert("Authorization", HeaderValue::from_static("Bearer some-token"));

    let result = auth.authenticate(&headers, ApiPermission::Read);
    assert!(result.is_err());

    match result.unwrap_err() {
        ApiError::Unauthorized(msg) => assert!(msg.contains("jwt auth not configured")),
        _ => panic!("Expected Unauthorized error"),
    }
}

#[test]
fn test_empty_bearer_token_falls_through_to_api_key() {
    let auth = ApiAuth::new().require_keys();
    auth.insert("fallback-key", ApiRole::Ops);

    let mut headers = HeaderMap::new();
    headers.insert("Authorization", HeaderValue::from_static("Bearer "));
    headers.insert("x-api-key", HeaderValue::from_static("fallback-key"));

    let result = auth.authenticate(&headers, ApiPermission::Mutate);
    assert!(result.is_ok());
    assert_eq!(result.unwrap().method, AuthMethod::ApiKey);
}

// ============================================================================
// Concurrent Access Tests
// ============================================================================

#[test]
fn test_concurrent_key_insertion() {
    use std::thread;

    let auth = Arc::new(ApiAuth::new().require_keys());
    let mut handles = vec![];

    for i in 0..10 {
        let auth = Arc::clone(&auth);
        handles.push(thread::spawn(move || {
            let key = format!("key-{i}");
            auth.insert(&key, ApiRole::Ops);
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..10 {
        let mut headers = HeaderMap::new();
        let key = format!("key-{i}");
        headers.insert("x-api-key", HeaderValue::from_str(&key).unwrap());

        let result = auth.authenticate(&headers, ApiPermission::Mutate);
        assert!(result.is_ok(), "Key {i} should authenticate");
    }
}
