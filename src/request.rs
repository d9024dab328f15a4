//! Incoming HTTP request type.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST};
use http::request::Parts;
use http::{Extensions, HeaderMap, HeaderName, Method, Uri};
use multer::Multipart;
use url::form_urlencoded;

use crate::session::SessionStore;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM: &str = "multipart/form-data";

/// An incoming HTTP request with its body already collected.
///
/// A request is owned by exactly one handling flow: middleware receives it by
/// value, may mutate it (attach extensions, for example), and hands it on to
/// the next handler.
pub struct Request {
    parts: Parts,
    body: Bytes,
    params: HashMap<String, String>,
    session_store: Option<Arc<dyn SessionStore>>,
}

impl Request {
    pub(crate) fn new(parts: Parts, body: Bytes) -> Self {
        Self { parts, body, params: HashMap::new(), session_store: None }
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Header lookup. Returns `None` for values that are not visible ASCII.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = HeaderName::from_bytes(name.as_ref().as_bytes()).ok()?;
        self.parts.headers.get(name)?.to_str().ok()
    }

    /// The `Authorization` header value, if present.
    pub fn authorization(&self) -> Option<&str> {
        self.parts.headers.get(AUTHORIZATION)?.to_str().ok()
    }

    /// The host the request was addressed to, port included.
    ///
    /// Taken from the `Host` header, or from the URI authority for HTTP/2
    /// requests that carry `:authority` instead.
    pub fn host(&self) -> Option<&str> {
        self.parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.parts.uri.authority().map(|a| a.as_str()))
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Looks up a form value: the query string first, then the body when it
    /// is `application/x-www-form-urlencoded` or `multipart/form-data`.
    /// Empty values and multipart file parts are skipped.
    pub async fn form_value(&self, key: &str) -> Option<String> {
        if let Some(v) = self.parts.uri.query().and_then(|q| find_pair(q.as_bytes(), key)) {
            return Some(v);
        }
        let content_type = self.content_type()?;
        if content_type.starts_with(FORM_URLENCODED) {
            return find_pair(&self.body, key);
        }
        if content_type.starts_with(MULTIPART_FORM) {
            let boundary = multer::parse_boundary(content_type).ok()?;
            return find_multipart_field(self.body.clone(), boundary, key).await;
        }
        None
    }

    pub fn extensions(&self) -> &Extensions { &self.parts.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.parts.extensions }

    /// The session store of the router handling this request, if any.
    pub fn session_store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.session_store.as_ref()
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub(crate) fn set_session_store(&mut self, store: Option<Arc<dyn SessionStore>>) {
        self.session_store = store;
    }

    fn content_type(&self) -> Option<&str> {
        self.parts.headers.get(CONTENT_TYPE)?.to_str().ok()
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts, body)
    }
}

fn find_pair(input: &[u8], key: &str) -> Option<String> {
    form_urlencoded::parse(input)
        .find(|(k, v)| k == key && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

/// First non-empty text field named `key`. A malformed body ends the search.
async fn find_multipart_field(body: Bytes, boundary: String, key: &str) -> Option<String> {
    let mut multipart = Multipart::with_reader(Cursor::new(body), boundary);
    while let Some(field) = multipart.next_field().await.ok()? {
        if field.name() != Some(key) || field.file_name().is_some() {
            continue;
        }
        let text = field.text().await.ok()?;
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}
