//! Cross-origin resource sharing (CORS) for [Tower](https://crates.io/crates/tower) services
//!
//! A middleware that inspects every request for an `Origin` header and
//! decides what access-control headers the response must carry. Preflight
//! `OPTIONS` requests are answered directly without ever reaching the inner
//! service; every other cross-origin request is forwarded and the downstream
//! response is augmented in place. Requests without an `Origin` header pass
//! through untouched.
//!
//! Keep in mind that CORS is enforced by browsers, not servers: the headers
//! emitted here are advisory, and the `400` returned for a failed preflight
//! exists to aid debugging rather than to act as a security boundary.
//!
//! ## Installation
//!
//! Add the following to Cargo.toml:
//!
//! ```toml
//! tower_cors = "0.1.0"
//! ```
//!
//! ## Features
//!
//! By default, a `serialization` feature is enabled in this crate that allows
//! you to (de)serialize the [`CorsOptions`] struct that is described below.
//! If you would like to disable this, simply change your `Cargo.toml` to:
//!
//! ```toml
//! tower_cors = { version = "0.1.0", default-features = false }
//! ```
//!
//! ## Usage
//!
//! Before you can add CORS handling to your application, you need to create a
//! [`CorsOptions`] struct that will hold the settings. Defaults are defined
//! for every field and are documented on the struct. The defaults are
//! deliberately permissive: any origin may make requests, and a preflight may
//! ask for any header.
//!
//! [`CorsOptions::to_layer`] validates the settings, compiles the optional
//! origin pattern and builds the reusable [`CorsLayer`]. The layer wraps any
//! [`tower_service::Service`] that takes an [`http::Request`] and returns an
//! [`http::Response`], so it composes into hyper, axum, tonic or plain tower
//! stacks alike:
//!
//! ```rust
//! use http::{Method, Request, Response};
//! use tower::{service_fn, Layer, ServiceExt};
//! use tower_cors::{AllowedHeaders, AllowedOrigins, CorsOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cors = CorsOptions {
//!     allowed_origins: AllowedOrigins::some(&["https://www.acme.com"]),
//!     allowed_methods: vec![Method::GET].into_iter().map(From::from).collect(),
//!     allowed_headers: AllowedHeaders::some(&["Authorization", "Accept"]),
//!     allow_credentials: true,
//!     ..Default::default()
//! }
//! .to_layer()?;
//!
//! let service = cors.layer(service_fn(|_: Request<String>| async {
//!     Ok::<_, std::convert::Infallible>(Response::new("Hello CORS".to_string()))
//! }));
//!
//! let response = service
//!     .oneshot(
//!         Request::builder()
//!             .uri("/")
//!             .header("Origin", "https://www.acme.com")
//!             .body(String::new())?,
//!     )
//!     .await?;
//!
//! assert_eq!(
//!     "https://www.acme.com",
//!     response
//!         .headers()
//!         .get("access-control-allow-origin")
//!         .expect("to exist"),
//! );
//! # Ok(())
//! # }
//! ```
//!
//! The body type of the inner service must implement `From<String>` so the
//! middleware can synthesize the tiny `"OK"` and rejection bodies of preflight
//! answers; `String`, `Vec<u8>`, and the usual framework body types all do.
//!
//! ## What gets emitted
//!
//! | Request | Behavior |
//! |---------|----------|
//! | No `Origin` header | Passed through unmodified |
//! | `OPTIONS` with `Access-Control-Request-Method` | Answered directly with `200 OK` or a `400` naming the failed check |
//! | Any other request with an `Origin` header | Forwarded; allow-origin, credentials and expose-headers are added to the response |
//!
//! When all origins are allowed, responses carry a literal `*` allow-origin,
//! except that a request bearing a `Cookie` has the concrete origin mirrored
//! back instead, since browsers reject `*` on credentialed responses. With an
//! explicit origin list the concrete origin is mirrored and `Origin` is folded
//! into the response's `Vary` header so caches never leak one origin's
//! response to another.

#[cfg(test)]
#[macro_use]
mod test_macros;

mod headers;
mod service;

pub use crate::service::{Cors, CorsLayer, ResponseFuture};

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use log::{debug, warn};
use regex::Regex;
#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Errors that can occur when building the middleware out of [`CorsOptions`]
///
/// These surface misconfiguration before any request is served; a request
/// that fails the policy at runtime is answered with an ordinary `400`
/// response instead and never produces an `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The `allow_origin_regex` pattern could not be compiled
    #[error("invalid origin pattern: {0}")]
    BadOriginPattern(#[from] regex::Error),
    /// A configured header list contains a value that cannot be sent on the wire
    #[error("invalid header value: {0}")]
    BadHeaderValue(#[from] header::InvalidHeaderValue),
}

/// An enum signifying that some of type T is allowed, or `All` (everything is allowed).
///
/// `Default` is implemented for this enum and is `All`.
///
/// This enum is serialized and deserialized
/// ["Externally tagged"](https://serde.rs/enum-representations.html)
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum AllOrSome<T> {
    /// Everything is allowed. Usually equivalent to the "*" value.
    All,
    /// Only some of `T` is allowed
    Some(T),
}

impl<T> Default for AllOrSome<T> {
    fn default() -> Self {
        AllOrSome::All
    }
}

impl<T> AllOrSome<T> {
    /// Returns whether this is an `All` variant
    pub fn is_all(&self) -> bool {
        matches!(self, AllOrSome::All)
    }

    /// Returns whether this is a `Some` variant
    pub fn is_some(&self) -> bool {
        !self.is_all()
    }
}

impl AllOrSome<HashSet<String>> {
    /// Allows some values, matched byte for byte at request time
    pub fn some(values: &[&str]) -> Self {
        AllOrSome::Some(values.iter().map(|s| (*s).to_string()).collect())
    }

    /// Allows everything
    pub fn all() -> Self {
        AllOrSome::All
    }
}

/// A wrapper type around [`http::Method`] to support serialization and deserialization
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Method(http::Method);

impl FromStr for Method {
    type Err = http::method::InvalidMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = http::Method::from_str(s)?;
        Ok(Method(method))
    }
}

impl Deref for Method {
    type Target = http::Method;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<http::Method> for Method {
    fn from(method: http::Method) -> Self {
        Method(method)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(feature = "serialization")]
mod method_serde {
    use std::fmt;
    use std::str::FromStr;

    use serde::{de, Deserialize, Serialize};

    use crate::Method;

    impl Serialize for Method {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            serializer.serialize_str(self.as_str())
        }
    }

    impl<'de> Deserialize<'de> for Method {
        fn deserialize<D>(deserializer: D) -> Result<Method, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            struct MethodVisitor;
            impl<'de> de::Visitor<'de> for MethodVisitor {
                type Value = Method;

                fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                    formatter.write_str("a string containing a HTTP Verb")
                }

                fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
                where
                    E: de::Error,
                {
                    Self::Value::from_str(s).map_err(|e| de::Error::custom(format!("{e}")))
                }
            }

            deserializer.deserialize_string(MethodVisitor)
        }
    }
}

/// A list of allowed origins. Either Some origins are allowed, or all origins are allowed.
///
/// Origins are compared to the request's `Origin` header byte for byte; no
/// URL parsing or normalization is performed, so `https://acme.com` and
/// `https://acme.com:443` are two different origins as far as the allow-list
/// is concerned.
///
/// # Examples
/// ```rust
/// use tower_cors::AllowedOrigins;
///
/// let all_origins = AllowedOrigins::all();
/// let some_origins = AllowedOrigins::some(&["https://www.acme.com"]);
/// ```
pub type AllowedOrigins = AllOrSome<HashSet<String>>;

/// A list of allowed methods
///
/// Methods a preflight request may ask for via `Access-Control-Request-Method`.
/// The comparison is case sensitive, as method tokens are.
///
/// # Example
/// ```rust
/// use std::str::FromStr;
/// use tower_cors::AllowedMethods;
///
/// let allowed_methods: AllowedMethods = ["GET", "POST", "DELETE"]
///    .iter()
///    .map(|s| FromStr::from_str(s).unwrap())
///    .collect();
/// ```
pub type AllowedMethods = HashSet<Method>;

/// A list of allowed headers
///
/// Request headers a preflight may ask for via `Access-Control-Request-Headers`.
/// Tokens are compared as given, byte for byte.
///
/// # Examples
/// ```rust
/// use tower_cors::AllowedHeaders;
///
/// let all_headers = AllowedHeaders::all();
/// let some_headers = AllowedHeaders::some(&["Authorization", "Accept"]);
/// ```
pub type AllowedHeaders = AllOrSome<HashSet<String>>;

/// Configuration for CORS handling
///
/// You create a new copy of this struct by defining the configurations in the
/// fields below, then turn it into the reusable [`CorsLayer`] middleware with
/// [`to_layer`](CorsOptions::to_layer). This struct can also be deserialized
/// by serde with the `serialization` feature which is enabled by default.
///
/// [`Default`](https://doc.rust-lang.org/std/default/trait.Default.html) is
/// implemented for this struct. The default for each field is described in the
/// documentation for the field.
///
/// A configuration that is self-consistent but useless, such as an empty
/// `allowed_methods` set, is not an error: it simply rejects every preflight.
///
/// # Examples
///
/// ## Pure default
/// ```rust
/// let default = tower_cors::CorsOptions::default();
/// ```
///
/// ## JSON Examples
/// ### Default
///
/// ```json
/// {
///   "allowed_origins": "All",
///   "allow_origin_regex": null,
///   "allowed_methods": [
///     "DELETE",
///     "GET",
///     "OPTIONS",
///     "PATCH",
///     "POST",
///     "PUT"
///   ],
///   "allowed_headers": "All",
///   "allow_credentials": false,
///   "expose_headers": [],
///   "max_age": 600
/// }
/// ```
/// ### Defined
///
/// ```json
/// {
///   "allowed_origins": {
///     "Some": [
///       "https://www.acme.com"
///     ]
///   },
///   "allow_origin_regex": "^https://(www\\.)?acme\\.com$",
///   "allowed_methods": [
///     "POST",
///     "DELETE",
///     "GET"
///   ],
///   "allowed_headers": {
///     "Some": [
///       "Accept",
///       "Authorization"
///     ]
///   },
///   "allow_credentials": true,
///   "expose_headers": [
///     "Content-Type",
///     "X-Custom"
///   ],
///   "max_age": 42
/// }
/// ```
#[derive(Eq, PartialEq, Clone, Debug)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct CorsOptions {
    /// Origins that are allowed to make requests.
    /// Will be verified against the `Origin` request header.
    ///
    /// When `All` is set, a wildcard `*` is sent in the
    /// `Access-Control-Allow-Origin` response header, except on requests that
    /// carry a `Cookie`, where the client's `Origin` request header is echoed
    /// back instead.
    ///
    /// When `Some` is set, the client's `Origin` request header will be
    /// checked in a case-sensitive manner, and echoed back on a match. An
    /// empty `Some` set is treated the same as `All`.
    ///
    /// Defaults to `All`.
    #[cfg_attr(feature = "serialization", serde(default))]
    pub allowed_origins: AllowedOrigins,
    /// An alternate origin rule, applied when the `Origin` request header is
    /// not in `allowed_origins`: the origin is allowed if this regular
    /// expression matches it.
    ///
    /// The pattern is compiled once, when the options are turned into the
    /// middleware, and an invalid pattern fails that conversion. The match
    /// must start at the first character of the origin but may stop before
    /// its end, so `https://www\.acme\.com` also admits
    /// `https://www.acme.com:8443`; end the pattern with `$` to require a
    /// full match. The rule only participates when `allowed_origins` is a
    /// non-empty `Some` list, since `All` admits every origin before the
    /// pattern is consulted.
    ///
    /// Defaults to `None`.
    #[cfg_attr(feature = "serialization", serde(default))]
    pub allow_origin_regex: Option<String>,
    /// The list of methods which the allowed origins are allowed to access
    /// for non-simple requests, verified against the
    /// `Access-Control-Request-Method` header of preflight requests.
    ///
    /// Defaults to `[DELETE, GET, OPTIONS, PATCH, POST, PUT]`
    #[cfg_attr(
        feature = "serialization",
        serde(default = "CorsOptions::default_allowed_methods")
    )]
    pub allowed_methods: AllowedMethods,
    /// The list of header field names which can be used when this resource is
    /// accessed by allowed origins.
    ///
    /// If `All` is set, whatever is requested by the client in
    /// `Access-Control-Request-Headers` will be echoed back in the
    /// `Access-Control-Allow-Headers` header.
    ///
    /// Defaults to `All`.
    #[cfg_attr(feature = "serialization", serde(default))]
    pub allowed_headers: AllowedHeaders,
    /// Allows users to make authenticated requests.
    /// If true, injects the `Access-Control-Allow-Credentials` header in
    /// responses. This allows cookies and credentials to be submitted across
    /// domains.
    ///
    /// Defaults to `false`.
    #[cfg_attr(feature = "serialization", serde(default))]
    pub allow_credentials: bool,
    /// The list of headers which are safe to expose to client scripts.
    /// This corresponds to the `Access-Control-Expose-Headers` response
    /// header.
    ///
    /// This defaults to an empty set.
    #[cfg_attr(feature = "serialization", serde(default))]
    pub expose_headers: HashSet<String>,
    /// The maximum time, in seconds, for which a preflight answer may be
    /// cached by the client. This value is set as the `Access-Control-Max-Age`
    /// header.
    ///
    /// Defaults to 600.
    #[cfg_attr(feature = "serialization", serde(default = "CorsOptions::default_max_age"))]
    pub max_age: usize,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            allowed_origins: Default::default(),
            allow_origin_regex: Default::default(),
            allowed_methods: Self::default_allowed_methods(),
            allowed_headers: Default::default(),
            allow_credentials: Default::default(),
            expose_headers: Default::default(),
            max_age: Self::default_max_age(),
        }
    }
}

impl CorsOptions {
    fn default_allowed_methods() -> AllowedMethods {
        vec![
            http::Method::DELETE,
            http::Method::GET,
            http::Method::OPTIONS,
            http::Method::PATCH,
            http::Method::POST,
            http::Method::PUT,
        ]
        .into_iter()
        .map(From::from)
        .collect()
    }

    fn default_max_age() -> usize {
        600
    }

    /// Validates the settings and builds the reusable [`CorsLayer`] middleware
    ///
    /// This compiles `allow_origin_regex` and precomputes the response header
    /// lists exactly once; the returned layer is cheap to clone and every
    /// clone shares them.
    pub fn to_layer(&self) -> Result<CorsLayer, Error> {
        let policy = CorsPolicy::new(self)?;
        Ok(CorsLayer {
            policy: Arc::new(policy),
        })
    }
}

/// Outcome of evaluating a preflight request: the status to answer with, the
/// headers accumulated up to the point evaluation stopped, and the body text.
#[derive(Debug)]
pub(crate) struct Preflight {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: String,
}

impl Preflight {
    fn rejection(headers: HeaderMap, reason: String) -> Self {
        warn!("failed preflight checks: {reason}");
        Self {
            status: StatusCode::BAD_REQUEST,
            headers,
            body: reason,
        }
    }
}

/// The compiled policy: the origin/method/header match rules plus the two
/// response header lists precomputed at conversion time.
///
/// Nothing here is mutated after construction; one instance sits behind an
/// `Arc` and is shared by every clone of the layer and every in-flight
/// request.
#[derive(Debug)]
pub(crate) struct CorsPolicy {
    allow_all_origins: bool,
    allowed_origins: HashSet<String>,
    allow_origin_regex: Option<Regex>,
    allowed_methods: HashSet<String>,
    allow_all_headers: bool,
    allowed_headers: HashSet<String>,
    /// Base pairs applied to every non-preflight response.
    simple_headers: Vec<(HeaderName, HeaderValue)>,
    /// Base pairs every preflight answer starts from.
    preflight_headers: Vec<(HeaderName, HeaderValue)>,
}

impl CorsPolicy {
    pub(crate) fn new(options: &CorsOptions) -> Result<Self, Error> {
        // An absent allow-list and an empty one both mean any origin.
        let (allow_all_origins, allowed_origins) = match &options.allowed_origins {
            AllOrSome::All => (true, HashSet::new()),
            AllOrSome::Some(origins) => (origins.is_empty(), origins.clone()),
        };

        // The pattern is held to the start of the origin; its end stays open
        // unless the pattern itself closes it with `$`.
        let allow_origin_regex = options
            .allow_origin_regex
            .as_deref()
            .map(|pattern| Regex::new(&format!(r"\A(?:{pattern})")))
            .transpose()?;

        let allowed_methods: HashSet<String> = options
            .allowed_methods
            .iter()
            .map(|method| method.as_str().to_string())
            .collect();

        let (allow_all_headers, allowed_headers) = match &options.allowed_headers {
            AllOrSome::All => (true, HashSet::new()),
            AllOrSome::Some(headers) => (false, headers.clone()),
        };

        let mut simple_headers = Vec::new();
        if allow_all_origins {
            simple_headers.push((
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ));
        }
        if options.allow_credentials {
            simple_headers.push((
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            ));
        }
        if !options.expose_headers.is_empty() {
            simple_headers.push((
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                headers::join_sorted(&options.expose_headers)?,
            ));
        }

        let mut preflight_headers = Vec::new();
        if allow_all_origins {
            preflight_headers.push((
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ));
        } else {
            // The answer depends on the requester's origin, so caches must
            // key on it.
            preflight_headers.push((header::VARY, HeaderValue::from_static("Origin")));
        }
        preflight_headers.push((
            header::ACCESS_CONTROL_ALLOW_METHODS,
            headers::join_sorted(&allowed_methods)?,
        ));
        preflight_headers.push((
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from(options.max_age),
        ));
        if !allow_all_headers {
            preflight_headers.push((
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                headers::join_sorted(&allowed_headers)?,
            ));
        }
        if options.allow_credentials {
            preflight_headers.push((
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            ));
        }

        Ok(Self {
            allow_all_origins,
            allowed_origins,
            allow_origin_regex,
            allowed_methods,
            allow_all_headers,
            allowed_headers,
            simple_headers,
            preflight_headers,
        })
    }

    /// Checks an origin against the configured rule: wildcard first, then the
    /// pattern, then the exact allow-list.
    fn is_allowed_origin(&self, origin: &str) -> bool {
        if self.allow_all_origins {
            return true;
        }
        if let Some(pattern) = &self.allow_origin_regex {
            if pattern.is_match(origin) {
                return true;
            }
        }
        self.allowed_origins.contains(origin)
    }

    /// An `Origin` value that is not UTF-8 cannot be listed or match a
    /// pattern, so only wildcard mode accepts it.
    fn is_allowed_origin_value(&self, origin: &HeaderValue) -> bool {
        match origin.to_str() {
            Ok(origin) => self.is_allowed_origin(origin),
            Err(_) => self.allow_all_origins,
        }
    }

    /// Evaluates a preflight request.
    ///
    /// Checks run in order: origin, then method, then each requested header,
    /// and the first failing check stops evaluation. Its reason becomes the
    /// `400` body; the headers gathered before the failure stay on the answer
    /// so the caller can still see the advertised policy.
    pub(crate) fn preflight_check(
        &self,
        origin: &HeaderValue,
        request_method: &HeaderValue,
        request_headers: Option<&HeaderValue>,
    ) -> Preflight {
        let mut response_headers = HeaderMap::with_capacity(self.preflight_headers.len() + 2);
        for (name, value) in &self.preflight_headers {
            response_headers.insert(name.clone(), value.clone());
        }

        if !self.is_allowed_origin_value(origin) {
            return Preflight::rejection(
                response_headers,
                format!("Invalid origin {}", headers::lossy(origin)),
            );
        }
        if !self.allow_all_origins {
            // Allowed and not in wildcard mode: mirror the concrete origin.
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        }

        match request_method.to_str() {
            Ok(method) if self.allowed_methods.contains(method) => {}
            _ => {
                return Preflight::rejection(
                    response_headers,
                    format!("Invalid method {}", headers::lossy(request_method)),
                );
            }
        }

        if let Some(requested) = request_headers {
            if self.allow_all_headers {
                // Echo the requested list back verbatim, byte for byte.
                response_headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
            } else {
                let Ok(requested) = requested.to_str() else {
                    return Preflight::rejection(
                        response_headers,
                        format!("Invalid header {}", headers::lossy(requested)),
                    );
                };
                for token in requested.split(',').map(str::trim) {
                    if !self.allowed_headers.contains(token) {
                        return Preflight::rejection(
                            response_headers,
                            format!("Invalid header {token}"),
                        );
                    }
                }
            }
        }

        debug!("passed preflight checks");
        Preflight {
            status: StatusCode::OK,
            headers: response_headers,
            body: "OK".to_string(),
        }
    }

    /// Applies the simple-response headers to a downstream response.
    ///
    /// `origin` is the request's `Origin` value and `has_cookie` whether the
    /// request carried a `Cookie` header. In wildcard mode a cookie forces
    /// the concrete origin to be mirrored in place of `*`; the substitution
    /// happens on this response's headers only, never on the stored list, so
    /// concurrent requests cannot observe each other's origin.
    pub(crate) fn augment_simple_response(
        &self,
        response_headers: &mut HeaderMap,
        origin: &HeaderValue,
        has_cookie: bool,
    ) {
        if !self.allow_all_origins && self.is_allowed_origin_value(origin) {
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers::merge_vary(response_headers);
        }

        let mirror_origin = self.allow_all_origins && has_cookie;
        for (name, value) in &self.simple_headers {
            if mirror_origin && *name == header::ACCESS_CONTROL_ALLOW_ORIGIN {
                response_headers.insert(name.clone(), origin.clone());
            } else {
                response_headers.insert(name.clone(), value.clone());
            }
        }
    }
}
