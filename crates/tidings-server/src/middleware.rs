use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};

/// Header carrying the acting user when no bearer token is sent.
pub const USER_HEADER: &str = "X-Tidings-User";

/// The principal a request acts as, stored in request extensions.
///
/// `None` is an anonymous request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Actor(pub Option<String>);

impl Actor {
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Reads the actor from `X-Tidings-User` or `Authorization: Bearer`.
///
/// Neither header means anonymous. The bearer token is taken as the user id
/// as-is; there is no verification behind it.
///
/// # Errors
///
/// `StatusCode::UNAUTHORIZED` if a header is present but unusable (not
/// UTF-8, empty, or a non-bearer scheme).
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, StatusCode> {
    let raw = if let Some(val) = headers.get(USER_HEADER) {
        val.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?
    } else if let Some(val) = headers.get("Authorization") {
        let val_str = val.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
        val_str
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?
    } else {
        return Ok(Actor(None));
    };

    let id = raw.trim();
    if id.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Actor(Some(id.to_string())))
}

/// Middleware that resolves the [`Actor`] and inserts it into extensions.
pub async fn actor_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let actor = actor_from_headers(req.headers())?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn no_headers_is_anonymous() {
        assert_eq!(actor_from_headers(&HeaderMap::new()), Ok(Actor(None)));
    }

    #[test]
    fn user_header_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        headers.insert("Authorization", HeaderValue::from_static("Bearer bob"));
        assert_eq!(
            actor_from_headers(&headers).unwrap().id(),
            Some("alice")
        );
    }

    #[test]
    fn bearer_token_is_the_actor() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer bob"));
        assert_eq!(actor_from_headers(&headers).unwrap().id(), Some("bob"));
    }

    #[test]
    fn other_schemes_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic Ym9iOnB3"));
        assert_eq!(
            actor_from_headers(&headers),
            Err(StatusCode::UNAUTHORIZED)
        );

        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(
            actor_from_headers(&headers),
            Err(StatusCode::UNAUTHORIZED)
        );
    }
}
