//! Bearer-token authentication middleware.
//!
//! # Flow
//!
//! ```text
//! extract ──▶ parse ──▶ validate ──▶ on_success ──▶ next
//!    │          │           │
//!    └──────────┴───────────┴──▶ error handler (default: 401, no body)
//! ```
//!
//! 1. **Extract** the raw token from the form value named by the key
//!    (default `_jwt`: query string first, then a urlencoded or multipart
//!    body), else from the `Authorization` header: everything after the
//!    first seven bytes, the length of `"Bearer "`.
//! 2. **Parse** it with the [`TokenVerifier`].
//! 3. **Validate** the parsed [`Token`].
//! 4. Run the success callback, then the next handler.
//!
//! Any failure runs the error handler instead and the chain stops there.
//! Signature, expiry and claims checks all live behind the two traits; this
//! module only decides whether the chain continues.
//!
//! The header branch does not look at the scheme text by default: any value
//! longer than six bytes is cut at offset seven, and the rest is decoded as
//! UTF-8 with invalid bytes replaced by `U+FFFD`, so the verifier still sees
//! tokens carrying non-ASCII bytes. Turn on
//! [`BearerAuth::require_bearer_scheme`] to insist on a case-insensitive
//! `Bearer ` prefix.
//!
//! ```rust,no_run
//! use portico::middleware::bearer::{BearerAuth, Token, TokenVerifier};
//! use portico::Router;
//!
//! struct Claims { subject: String }
//!
//! impl Token for Claims {
//!     type Error = &'static str;
//!     fn validate(&self) -> Result<(), Self::Error> { Ok(()) }
//! }
//!
//! struct Verifier;
//!
//! impl TokenVerifier for Verifier {
//!     type Token = Claims;
//!     type Error = &'static str;
//!     fn parse_raw(&self, raw: &str) -> Result<Claims, Self::Error> {
//!         Ok(Claims { subject: raw.to_owned() })
//!     }
//! }
//!
//! #[derive(Clone)]
//! struct Subject(String);
//!
//! let auth = BearerAuth::new(Verifier)
//!     .on_success(|req, claims: &Claims| {
//!         req.extensions_mut().insert(Subject(claims.subject.clone()));
//!     });
//!
//! let router = Router::new().with(auth);
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use http::header::AUTHORIZATION;
use tracing::debug;

use crate::handler::{BoxedHandler, Handler, boxed};
use crate::middleware::Middleware;
use crate::request::Request;

/// Form key consulted before the `Authorization` header.
pub const DEFAULT_KEY: &str = "_jwt";

/// Length of the `"Bearer "` scheme prefix stripped from the header value.
const SCHEME_LEN: usize = 7;

/// A parsed token that can check itself.
pub trait Token: Send + Sync + 'static {
    type Error: fmt::Display;

    /// Signature, expiry and claims checks. `Err` means the token is invalid.
    fn validate(&self) -> Result<(), Self::Error>;
}

/// Turns a raw bearer string into a [`Token`].
///
/// Called on the request path, possibly from many tasks at once.
pub trait TokenVerifier: Send + Sync + 'static {
    type Token: Token;
    type Error: fmt::Display;

    fn parse_raw(&self, raw: &str) -> Result<Self::Token, Self::Error>;
}

type SuccessHandler<T> = Arc<dyn Fn(&mut Request, &T) + Send + Sync>;

/// Why a request was turned away.
#[derive(Debug, PartialEq, Eq)]
enum Rejection {
    MissingToken,
    Unparsable(String),
    Invalid(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => f.write_str("no bearer token"),
            Self::Unparsable(e) => write!(f, "token parse failed: {e}"),
            Self::Invalid(e) => write!(f, "token invalid: {e}"),
        }
    }
}

/// Bearer-token authentication middleware.
///
/// See the [module docs](self) for the request flow.
pub struct BearerAuth<V: TokenVerifier> {
    verifier: Arc<V>,
    key: Arc<str>,
    strict_scheme: bool,
    error_handler: BoxedHandler,
    success_handler: SuccessHandler<V::Token>,
}

impl<V: TokenVerifier> BearerAuth<V> {
    /// Defaults: key `_jwt`, a status-only `401` error handler and a no-op
    /// success callback.
    pub fn new(verifier: V) -> Self {
        Self {
            verifier: Arc::new(verifier),
            key: Arc::from(DEFAULT_KEY),
            strict_scheme: false,
            error_handler: boxed(unauthorized),
            success_handler: Arc::new(ignore_token::<V::Token>),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Form key to read the token from.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Arc::from(key.into());
        self
    }

    /// Handler that answers rejected requests.
    pub fn on_error(mut self, handler: impl Handler) -> Self {
        self.error_handler = boxed(handler);
        self
    }

    /// Callback run with the validated token before the next handler.
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Request, &V::Token) + Send + Sync + 'static,
    {
        self.success_handler = Arc::new(callback);
        self
    }

    /// Only accept `Authorization` values whose scheme is `Bearer`
    /// (case-insensitive). Off by default.
    pub fn require_bearer_scheme(mut self, strict: bool) -> Self {
        self.strict_scheme = strict;
        self
    }

    /// Raw token candidate, empty when the request carries none.
    async fn extract<'r>(&self, req: &'r Request) -> Cow<'r, str> {
        if let Some(raw) = req.form_value(&self.key).await {
            return Cow::Owned(raw);
        }
        let Some(value) = req.headers().get(AUTHORIZATION).map(|v| v.as_bytes()) else {
            return Cow::Borrowed("");
        };
        if self.strict_scheme && !has_bearer_scheme(value) {
            return Cow::Borrowed("");
        }
        String::from_utf8_lossy(value.get(SCHEME_LEN..).unwrap_or_default())
    }

    async fn authenticate(&self, req: &Request) -> Result<V::Token, Rejection> {
        let raw = self.extract(req).await;
        if raw.is_empty() {
            return Err(Rejection::MissingToken);
        }
        let token = self
            .verifier
            .parse_raw(&raw)
            .map_err(|e| Rejection::Unparsable(e.to_string()))?;
        token.validate().map_err(|e| Rejection::Invalid(e.to_string()))?;
        Ok(token)
    }
}

impl<V: TokenVerifier> Clone for BearerAuth<V> {
    fn clone(&self) -> Self {
        Self {
            verifier: Arc::clone(&self.verifier),
            key: Arc::clone(&self.key),
            strict_scheme: self.strict_scheme,
            error_handler: Arc::clone(&self.error_handler),
            success_handler: Arc::clone(&self.success_handler),
        }
    }
}

impl<V: TokenVerifier> fmt::Debug for BearerAuth<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth")
            .field("key", &self.key)
            .field("strict_scheme", &self.strict_scheme)
            .finish_non_exhaustive()
    }
}

impl<V: TokenVerifier> Middleware for BearerAuth<V> {
    fn handle(&self, next: BoxedHandler) -> BoxedHandler {
        let auth = self.clone();
        boxed(move |mut req: Request| {
            let auth = auth.clone();
            let next = next.clone();
            async move {
                match auth.authenticate(&req).await {
                    Ok(token) => {
                        (auth.success_handler)(&mut req, &token);
                        next.call(req).await
                    }
                    Err(rejection) => {
                        debug!(path = req.path(), reason = %rejection, "bearer auth rejected");
                        auth.error_handler.call(req).await
                    }
                }
            }
        })
    }
}

async fn unauthorized(_req: Request) -> StatusCode {
    StatusCode::UNAUTHORIZED
}

fn ignore_token<T>(_req: &mut Request, _token: &T) {}

fn has_bearer_scheme(value: &[u8]) -> bool {
    value
        .get(..SCHEME_LEN)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(b"bearer "))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use http::HeaderValue;
    use http::header::CONTENT_TYPE;

    use super::*;
    use crate::middleware::Chain;
    use crate::response::Response;

    /// Tokens are `valid:<subject>` or `expired:<subject>`; anything else
    /// fails to parse.
    struct TestToken {
        subject: String,
        expired: bool,
    }

    impl Token for TestToken {
        type Error = &'static str;

        fn validate(&self) -> Result<(), Self::Error> {
            if self.expired { Err("expired") } else { Ok(()) }
        }
    }

    #[derive(Default)]
    struct TestVerifier {
        seen: Mutex<Vec<String>>,
    }

    impl TokenVerifier for Arc<TestVerifier> {
        type Token = TestToken;
        type Error = String;

        fn parse_raw(&self, raw: &str) -> Result<TestToken, String> {
            self.seen.lock().unwrap().push(raw.to_owned());
            match raw.split_once(':') {
                Some(("valid", subject)) => Ok(TestToken { subject: subject.into(), expired: false }),
                Some(("expired", subject)) => Ok(TestToken { subject: subject.into(), expired: true }),
                _ => Err(format!("malformed token {raw:?}")),
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Subject(String);

    struct Harness {
        verifier: Arc<TestVerifier>,
        next_calls: Arc<AtomicUsize>,
        success_calls: Arc<AtomicUsize>,
        handler: BoxedHandler,
    }

    fn harness(configure: impl FnOnce(BearerAuth<Arc<TestVerifier>>) -> BearerAuth<Arc<TestVerifier>>) -> Harness {
        let verifier = Arc::new(TestVerifier::default());
        let next_calls = Arc::new(AtomicUsize::new(0));
        let success_calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&success_calls);
        let auth = configure(BearerAuth::new(Arc::clone(&verifier)).on_success(move |req, token: &TestToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            req.extensions_mut().insert(Subject(token.subject.clone()));
        }));

        let calls = Arc::clone(&next_calls);
        let terminal = boxed(move |req: Request| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                match req.extensions().get::<Subject>() {
                    Some(Subject(s)) => Response::text(s.clone()),
                    None => Response::text("anonymous"),
                }
            }
        });

        Harness {
            verifier,
            next_calls,
            success_calls,
            handler: Chain::new().with(auth).then(terminal),
        }
    }

    fn get(uri: &str, authorization: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(Bytes::new()).unwrap().into()
    }

    #[tokio::test]
    async fn header_token_continues_chain() {
        let h = harness(|a| a);
        let res = h.handler.call(get("/", Some("Bearer valid:alice"))).await;

        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"alice");
        assert_eq!(h.next_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.success_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn form_value_wins_over_header() {
        let h = harness(|a| a);
        let res = h.handler.call(get("/?_jwt=valid:form", Some("Bearer valid:header"))).await;

        assert_eq!(res.body().as_ref(), b"form");
        assert_eq!(*h.verifier.seen.lock().unwrap(), ["valid:form"]);
    }

    #[tokio::test]
    async fn form_value_from_urlencoded_body() {
        let h = harness(|a| a);
        let req: Request = http::Request::builder()
            .method("POST")
            .uri("/")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Bytes::from_static(b"_jwt=valid%3Abody"))
            .unwrap()
            .into();
        let res = h.handler.call(req).await;
        assert_eq!(res.body().as_ref(), b"body");
    }

    #[tokio::test]
    async fn multipart_form_value_wins_over_header() {
        let h = harness(|a| a);
        let body = "--B\r\n\
            Content-Disposition: form-data; name=\"_jwt\"\r\n\r\n\
            valid:form\r\n\
            --B--\r\n";
        let req: Request = http::Request::builder()
            .method("POST")
            .uri("/")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=B")
            .header(AUTHORIZATION, "Bearer valid:header")
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
            .into();
        let res = h.handler.call(req).await;

        assert_eq!(res.body().as_ref(), b"form");
        assert_eq!(*h.verifier.seen.lock().unwrap(), ["valid:form"]);
    }

    #[tokio::test]
    async fn non_ascii_header_bytes_reach_verifier() {
        let h = harness(|a| a);
        let req: Request = http::Request::builder()
            .uri("/")
            .header(AUTHORIZATION, HeaderValue::from_bytes(b"Bearer valid:\xe9t").unwrap())
            .body(Bytes::new())
            .unwrap()
            .into();
        let res = h.handler.call(req).await;

        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), "\u{fffd}t".as_bytes());
    }

    #[tokio::test]
    async fn short_header_rejects_without_calling_verifier() {
        for value in ["Bearer", "Bearer ", "abc"] {
            let h = harness(|a| a);
            let res = h.handler.call(get("/", Some(value))).await;

            assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED, "{value:?}");
            assert!(res.body().is_empty());
            assert!(h.verifier.seen.lock().unwrap().is_empty());
            assert_eq!(h.next_calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn missing_token_rejects() {
        let h = harness(|a| a);
        let res = h.handler.call(get("/", None)).await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.next_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unparsable_token_rejects() {
        let h = harness(|a| a);
        let res = h.handler.call(get("/", Some("Bearer garbage"))).await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.success_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.next_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_token_skips_success_and_next() {
        let h = harness(|a| a.on_error(|_req: Request| async { StatusCode::FORBIDDEN }));
        let res = h.handler.call(get("/", Some("Bearer expired:bob"))).await;

        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(*h.verifier.seen.lock().unwrap(), ["expired:bob"]);
        assert_eq!(h.success_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.next_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scheme_text_is_not_checked_by_default() {
        let h = harness(|a| a);
        let res = h.handler.call(get("/", Some("Token: valid:carol"))).await;
        assert_eq!(res.body().as_ref(), b"carol");
    }

    #[tokio::test]
    async fn strict_scheme_requires_bearer_prefix() {
        let h = harness(|a| a.require_bearer_scheme(true));
        let res = h.handler.call(get("/", Some("Token: valid:carol"))).await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);

        let res = h.handler.call(get("/", Some("bEaReR valid:dave"))).await;
        assert_eq!(res.body().as_ref(), b"dave");
    }

    #[tokio::test]
    async fn custom_key() {
        let h = harness(|a| a.with_key("access_token"));
        let res = h.handler.call(get("/?access_token=valid:erin&_jwt=valid:x", None)).await;
        assert_eq!(res.body().as_ref(), b"erin");
    }

    #[tokio::test]
    async fn defaults() {
        let auth = BearerAuth::new(Arc::new(TestVerifier::default()));
        assert_eq!(auth.key(), DEFAULT_KEY);
        assert_eq!(
            auth.authenticate(&get("/", None)).await.err(),
            Some(Rejection::MissingToken),
        );
    }
}
