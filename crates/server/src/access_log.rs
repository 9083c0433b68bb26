//! Access-log middleware. Grounded on the shape of the teacher's
//! `tracing::TracingLayer`/`TracingService` (a `tower::Layer`/`Service` pair
//! wrapping the inner service in a boxed future) but emits one `log::info!`
//! line per request instead of exporting spans — this bridge carries no
//! distributed-tracing machinery (see DESIGN.md).

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use axum::{body::Body, extract::MatchedPath};
use http::{Request, Response};
use tower::{Layer, Service};

#[derive(Debug, Clone, Default)]
pub struct AccessLogLayer;

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct AccessLogService<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for AccessLogService<S>
where
    S: Service<Request<B>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Display,
    B: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let method = req.method().clone();
        let path = req.extensions().get::<MatchedPath>().map(|m| m.as_str().to_string()).unwrap_or_else(|| req.uri().path().to_string());
        let started = Instant::now();

        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        Box::pin(async move {
            let response = inner.call(req).await?;
            log::info!("{method} {path} {} {:?}", response.status().as_u16(), started.elapsed());
            Ok(response)
        })
    }
}
