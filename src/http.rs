use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::ClimprojError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

/// `timeout` bounds the whole exchange including the body; `None` leaves only
/// the connect timeout.
pub fn build_client(
    connect_timeout: Duration,
    timeout: Option<Duration>,
) -> Result<Client, ClimprojError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("climproj/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| ClimprojError::CatalogHttp(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
        .map_err(|err| ClimprojError::CatalogHttp(err.to_string()))
}

/// Send a request, retrying transient statuses and connection failures with
/// linear backoff. `on_error` maps the final transport error.
pub fn send_with_retries<F, E>(mut make_req: F, on_error: E) -> Result<Response, ClimprojError>
where
    F: FnMut() -> RequestBuilder,
    E: Fn(String) -> ClimprojError,
{
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Err(on_error(err.to_string()));
            }
        }
    }
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    thread::sleep(Duration::from_millis(delay));
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
