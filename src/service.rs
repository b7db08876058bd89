//! Tower layer and service implementation

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::ready;
use http::{HeaderValue, Request, Response};
use log::debug;
use pin_project::pin_project;
use tower_layer::Layer;
use tower_service::Service;

use crate::headers;
use crate::CorsPolicy;

/// The reusable CORS middleware, created with
/// [`CorsOptions::to_layer`](crate::CorsOptions::to_layer)
///
/// The layer holds the compiled policy behind an `Arc`, so cloning it and
/// applying it to any number of services is cheap and they all share the one
/// policy.
#[derive(Clone, Debug)]
pub struct CorsLayer {
    pub(crate) policy: Arc<CorsPolicy>,
}

impl<S> Layer<S> for CorsLayer {
    type Service = Cors<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Cors {
            inner,
            policy: Arc::clone(&self.policy),
        }
    }
}

/// Middleware service produced by [`CorsLayer`]
///
/// Answers preflight requests itself and augments the inner service's
/// responses to every other cross-origin request. Requests without an
/// `Origin` header are forwarded untouched.
#[derive(Clone, Debug)]
pub struct Cors<S> {
    inner: S,
    policy: Arc<CorsPolicy>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Cors<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: From<String>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let Some(origin) = headers::origin(req.headers()).cloned() else {
            debug!("skipping CORS processing; request has no origin header");
            return ResponseFuture {
                kind: Kind::Passthrough {
                    future: self.inner.call(req),
                },
            };
        };

        if req.method() == http::Method::OPTIONS {
            if let Some(request_method) = headers::request_method(req.headers()) {
                debug!("intercepting preflight request");
                let preflight = self.policy.preflight_check(
                    &origin,
                    request_method,
                    headers::request_headers(req.headers()),
                );

                let mut response = Response::new(ResBody::from(preflight.body));
                *response.status_mut() = preflight.status;
                *response.headers_mut() = preflight.headers;
                return ResponseFuture {
                    kind: Kind::Preflight {
                        response: Some(response),
                    },
                };
            }
        }

        debug!("augmenting simple CORS response");
        let has_cookie = headers::has_cookie(req.headers());
        ResponseFuture {
            kind: Kind::Simple {
                future: self.inner.call(req),
                policy: Arc::clone(&self.policy),
                origin,
                has_cookie,
            },
        }
    }
}

/// Response future for [`Cors`]
#[pin_project]
pub struct ResponseFuture<F, B> {
    #[pin]
    kind: Kind<F, B>,
}

#[pin_project(project = KindProj)]
enum Kind<F, B> {
    /// No `Origin` header; the inner response passes through unmodified.
    Passthrough {
        #[pin]
        future: F,
    },
    /// A preflight is answered here and the inner service is never called.
    Preflight { response: Option<Response<B>> },
    /// The inner response gets the simple CORS headers before it is returned.
    Simple {
        #[pin]
        future: F,
        policy: Arc<CorsPolicy>,
        origin: HeaderValue,
        has_cookie: bool,
    },
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().kind.project() {
            KindProj::Passthrough { future } => future.poll(cx),
            KindProj::Preflight { response } => {
                let response = response.take().expect("future polled after completion");
                Poll::Ready(Ok(response))
            }
            KindProj::Simple {
                future,
                policy,
                origin,
                has_cookie,
            } => {
                let mut response = ready!(future.poll(cx))?;
                policy.augment_simple_response(response.headers_mut(), origin, *has_cookie);
                Poll::Ready(Ok(response))
            }
        }
    }
}
