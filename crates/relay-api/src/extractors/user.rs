//! `ForwardedUser` extractor: the caller identity set by the fronting proxy.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity forwarded in the `X-User-Id` header.
///
/// Holds `None` when the header is missing, blank or not valid UTF-8; the
/// WebSocket handler turns that into a policy-violation close rather than
/// an HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedUser(pub Option<String>);

impl ForwardedUser {
    /// The trimmed user id, if present.
    pub fn user_id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl<S> FromRequestParts<S> for ForwardedUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from);

        Ok(Self(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(value: Option<&str>) -> ForwardedUser {
        let mut builder = Request::builder().uri("/ws");
        if let Some(value) = value {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        ForwardedUser::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_header_is_trimmed() {
        assert_eq!(extract(Some("  alice ")).await.user_id(), Some("alice"));
    }

    #[tokio::test]
    async fn test_missing_or_blank_header() {
        assert_eq!(extract(None).await.user_id(), None);
        assert_eq!(extract(Some("   ")).await.user_id(), None);
    }
}
