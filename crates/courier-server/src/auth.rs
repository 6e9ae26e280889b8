use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use courier::errors::{BrokerError, BrokerResult};
use std::collections::HashSet;

/// Who made a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub key_hint: String,
}

/// Decides whether a request is authenticated
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> BrokerResult<Caller>;
}

/// Accepts `Authorization: Bearer <key>` for any configured key.
/// With no keys configured nobody is authenticated.
pub struct ApiKeyAuthenticator {
    keys: HashSet<String>,
}

impl ApiKeyAuthenticator {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(Into::into)
                .filter(|k: &String| !k.is_empty())
                .collect(),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim()).filter(|t| !t.is_empty())
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> BrokerResult<Caller> {
        let token = bearer_token(headers)
            .ok_or_else(|| BrokerError::unauthorized("Authentication required"))?;
        if !self.keys.contains(token) {
            return Err(BrokerError::unauthorized("Invalid API key"));
        }
        let hint: String = token.chars().take(4).collect();
        Ok(Caller {
            key_hint: format!("{}…", hint),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_valid_key() {
        let auth = ApiKeyAuthenticator::new(["secret-key"]);
        let caller = auth.authenticate(&headers("Bearer secret-key")).await.unwrap();
        assert_eq!(caller.key_hint, "secr…");

        assert!(auth.authenticate(&headers("bearer secret-key")).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejections_are_unauthorized() {
        let auth = ApiKeyAuthenticator::new(["secret-key"]);
        for value in ["Bearer wrong", "Basic secret-key", "Bearer ", "secret-key"] {
            let err = auth.authenticate(&headers(value)).await.unwrap_err();
            assert_eq!(err.status_code(), 401, "{}", value);
        }
        let err = auth.authenticate(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_no_keys_configured() {
        let auth = ApiKeyAuthenticator::new(Vec::<String>::new());
        let err = auth.authenticate(&headers("Bearer anything")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Unauthorized(_)));
    }
}
