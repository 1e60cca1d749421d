//! Tower middleware wrapping protected handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::ratelimit::{
    ClientKey, CooldownTracker, RateLimitHeaders, SlidingWindowLimiter, Verdict,
};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Resolve the client key for a request.
///
/// Uses the first `X-Forwarded-For` entry, else the peer address recorded by
/// axum's `ConnectInfo`.
pub fn client_key(request: &Request<Body>) -> ClientKey {
    let forwarded = request
        .headers()
        .get(X_FORWARDED_FOR)
        .map(|value| value.as_bytes());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    ClientKey::from_parts(forwarded, peer)
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, values: &RateLimitHeaders) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(values.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(values.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(values.reset_secs));
}

fn too_many_requests(values: &RateLimitHeaders) -> Response {
    let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
    insert_rate_limit_headers(response.headers_mut(), values);
    response
}

/// Sliding-window rate limiting layer.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<SlidingWindowLimiter>,
}

impl RateLimitLayer {
    /// Create a new rate limiting layer around a shared limiter.
    pub fn new(limiter: Arc<SlidingWindowLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service.
///
/// Admitted requests reach the wrapped service and get the `X-RateLimit-*`
/// headers added to its response. Rejected requests get an empty 429 with
/// the same headers and never reach it.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<SlidingWindowLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        // Keep the instance that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let key = client_key(&request);

            match limiter.check(&key).await {
                Verdict::Decided(decision) if decision.allowed => {
                    let mut response = inner.call(request).await?;
                    insert_rate_limit_headers(response.headers_mut(), &decision.headers);
                    Ok(response)
                }
                Verdict::Decided(decision) => Ok(too_many_requests(&decision.headers)),
                Verdict::FailedOpen => inner.call(request).await,
                Verdict::FailedClosed => Ok(StatusCode::SERVICE_UNAVAILABLE.into_response()),
            }
        })
    }
}

/// Cooldown layer: delays clients that return too quickly.
#[derive(Clone)]
pub struct CooldownLayer {
    tracker: Arc<CooldownTracker>,
}

impl CooldownLayer {
    /// Create a new cooldown layer around a shared tracker.
    pub fn new(tracker: Arc<CooldownTracker>) -> Self {
        Self { tracker }
    }
}

impl<S> Layer<S> for CooldownLayer {
    type Service = CooldownService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CooldownService {
            inner,
            tracker: self.tracker.clone(),
        }
    }
}

/// Cooldown service. Never rejects; only delays.
#[derive(Clone)]
pub struct CooldownService<S> {
    inner: S,
    tracker: Arc<CooldownTracker>,
}

impl<S> Service<Request<Body>> for CooldownService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let tracker = self.tracker.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            if let Some(delay) = tracker.observe(&client_key(&request)) {
                tokio::time::sleep(delay).await;
            }
            inner.call(request).await
        })
    }
}
