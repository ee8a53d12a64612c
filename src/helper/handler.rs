use std::error::Error as StdError;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{CONTENT_TYPE, HeaderValue, SERVER};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, warn};

use super::Helper;
use crate::error::RequestError;
use crate::model::{ControlRequest, ControlResponse};

/// Value of the `Server` header on every response.
pub const SERVER_NAME: &str = concat!("webconnectivity-helper/", env!("CARGO_PKG_VERSION"));

/// Decrements the in-flight counter when dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Helper {
    /// Serves one HTTP request.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        if request.method() == Method::GET {
            return respond(StatusCode::OK, &json!({"message": "Hello, world!"}));
        }

        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        if previous >= self.settings.max_in_flight {
            warn!(in_flight = previous, "too many requests in flight");
            return respond(
                StatusCode::SERVICE_UNAVAILABLE,
                &json!({"error": "too many requests"}),
            );
        }

        match self.control(request).await {
            Ok(response) => respond(StatusCode::OK, &response),
            Err(err) => {
                debug!(error = %err, "rejecting request");
                respond(StatusCode::BAD_REQUEST, &json!({"error": err.to_string()}))
            }
        }
    }

    async fn control<B>(&self, request: Request<B>) -> Result<ControlResponse, RequestError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        if request.method() != Method::POST {
            return Err(RequestError::Method(request.method().to_string()));
        }
        let is_json = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
        if !is_json {
            return Err(RequestError::ContentType);
        }

        let limit = self.settings.max_body_size;
        let body = Limited::new(request.into_body(), limit)
            .collect()
            .await
            .map_err(|err| {
                if err.downcast_ref::<LengthLimitError>().is_some() {
                    RequestError::BodyTooLarge { limit }
                } else {
                    RequestError::Body(err.to_string())
                }
            })?
            .to_bytes();

        let request: ControlRequest = serde_json::from_slice(&body)?;
        self.measure(&request).await
    }
}

fn respond<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let (status, body) = match serde_json::to_vec(body) {
        Ok(body) => (status, body),
        Err(err) => {
            error!(error = %err, "cannot encode response");
            (StatusCode::INTERNAL_SERVER_ERROR, b"{}".to_vec())
        }
    };
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
