//! Inbound service authentication.
//!
//! Validates the bearer token and `X-Service-ID` of an inbound call and
//! stores the verified [`ServiceIdentity`] in the request extensions.
//! Requests without a valid token are rejected with 401.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::auth::{InterServiceAuth, ServiceIdentity, TokenValidation};
use crate::error::FabricError;

/// Shared state for [`require_service_auth`].
#[derive(Debug, Clone)]
pub struct ServiceAuthState {
    auth: Arc<InterServiceAuth>,
    expected_target: Option<String>,
}

impl ServiceAuthState {
    /// Accept tokens scoped to `expected_target`, plus unscoped tokens.
    #[must_use]
    pub fn new(auth: Arc<InterServiceAuth>, expected_target: Option<String>) -> Self {
        Self {
            auth,
            expected_target,
        }
    }
}

/// Reject calls that do not carry a valid service token.
pub async fn require_service_auth(
    State(state): State<ServiceAuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let validation = state
        .auth
        .extract_token_from_headers(request.headers(), state.expected_target.as_deref());

    match validation {
        TokenValidation::Valid(identity) => {
            debug!(caller = %identity.service_id, path = %request.uri().path(), "Service call authenticated");
            request.extensions_mut().insert::<ServiceIdentity>(identity);
            next.run(request).await
        }
        TokenValidation::Invalid(rejection) => FabricError::from(rejection).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, SERVICE_ID_HEADER, ServiceCredential};
    use axum::Extension;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::http::header::AUTHORIZATION;
    use axum::routing::get;
    use secrecy::SecretString;
    use tower::ServiceExt;

    async fn whoami(Extension(identity): Extension<ServiceIdentity>) -> String {
        identity.service_id
    }

    fn setup() -> (Router, Arc<InterServiceAuth>) {
        let auth = Arc::new(InterServiceAuth::new(AuthConfig::new(SecretString::from(
            "0123456789abcdef0123456789abcdef",
        ))));
        auth.register_service_credentials(ServiceCredential::new("user-service-1", "user-service", "k"));

        let state = ServiceAuthState::new(Arc::clone(&auth), Some("job-service".to_string()));
        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(axum::middleware::from_fn_with_state(state, require_service_auth));
        (app, auth)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_returns_401() {
        let (app, _) = setup();
        let request = Request::builder().uri("/whoami").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(response).await.contains("TOKEN_INVALID"));
    }

    #[tokio::test]
    async fn test_valid_token_passes_identity() {
        let (app, auth) = setup();
        let headers = auth.get_auth_headers("user-service-1", Some("job-service")).unwrap();
        let mut request = Request::builder().uri("/whoami").body(Body::empty()).unwrap();
        *request.headers_mut() = headers;

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "user-service-1");
    }

    #[tokio::test]
    async fn test_token_for_other_target_rejected() {
        let (app, auth) = setup();
        let token = auth.generate_token("user-service-1", Some("course-service")).unwrap();
        let request = Request::builder()
            .uri("/whoami")
            .header(AUTHORIZATION, token.bearer())
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_caller_header_mismatch_rejected() {
        let (app, auth) = setup();
        let token = auth.generate_token("user-service-1", None).unwrap();
        let request = Request::builder()
            .uri("/whoami")
            .header(AUTHORIZATION, token.bearer())
            .header(SERVICE_ID_HEADER, "admin-1")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
