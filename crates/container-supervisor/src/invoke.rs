//! HTTP invocation of a prepared container: request shaping, linear connection-refused retry,
//! timeout handling, and response interpretation (spec §4.3).
//!
//! No source file in the pack exercises an HTTP call against a locally-managed container, so
//! this module's retry/timeout shape is grounded instead on `megaeth-rpc/src/client.rs`'s
//! `reqwest`-based request loop (attempt counter, distinguishing transport errors from HTTP
//! status errors) rather than on a container-specific precedent.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, SupervisorError};
use crate::pool::{ContainerHandle, ContainerSupervisor};

/// Default time budget for a single container invocation (spec §4.5 default).
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(180);

/// Default number of connection-refused retries before giving up.
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;

/// Default delay between connection-refused retries (spec §4.3 default).
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Outcome of a single container invocation.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    /// Raw output bytes produced by the container.
    pub output: Vec<u8>,
    /// The container's reported exit/status code (`0` for success, by convention).
    pub exit_code: i32,
    /// Wall-clock time spent on the call, including retries.
    pub elapsed_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ComputationResponse {
    output: serde_json::Value,
    #[serde(default)]
    exit_code: i32,
}

/// A single attempt's outcome, distinguishing retryable transport failure from terminal errors.
enum AttemptError {
    ConnectRefused(reqwest::Error),
    Timeout,
    Terminal(SupervisorError),
}

/// Collaborator seam for invoking a prepared container, so callers (namely `request-handler`)
/// can depend on the behavior without pulling in a live Docker daemon for their own tests.
/// Grounded on `agent-core::ports`'s hexagonal port/adapter split.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Invoke the prepared container `container_id` with `input`, subject to the given timeout
    /// and connection-refused retry policy.
    async fn invoke(
        &self,
        container_id: &str,
        input: &[u8],
        timeout: Duration,
        connect_retries: u32,
        retry_delay: Duration,
    ) -> Result<InvocationResult>;
}

#[async_trait::async_trait]
impl ContainerRuntime for ContainerSupervisor {
    async fn invoke(
        &self,
        container_id: &str,
        input: &[u8],
        timeout: Duration,
        connect_retries: u32,
        retry_delay: Duration,
    ) -> Result<InvocationResult> {
        ContainerSupervisor::invoke(self, container_id, input, timeout, connect_retries, retry_delay).await
    }
}

#[async_trait::async_trait]
impl<T: ContainerRuntime + ?Sized> ContainerRuntime for std::sync::Arc<T> {
    async fn invoke(
        &self,
        container_id: &str,
        input: &[u8],
        timeout: Duration,
        connect_retries: u32,
        retry_delay: Duration,
    ) -> Result<InvocationResult> {
        (**self).invoke(container_id, input, timeout, connect_retries, retry_delay).await
    }
}

impl ContainerSupervisor {
    /// Invoke the prepared container `container_id` with `input`, retrying connection-refused
    /// failures linearly up to `connect_retries` times, `retry_delay` apart, with an overall
    /// per-attempt `timeout`.
    pub async fn invoke(
        &self,
        container_id: &str,
        input: &[u8],
        timeout: Duration,
        connect_retries: u32,
        retry_delay: Duration,
    ) -> Result<InvocationResult> {
        let handle = self.handle_for(container_id).await?;
        let started = Instant::now();

        let mut attempt = 0;
        loop {
            match self.try_invoke(&handle, input, timeout).await {
                Ok(mut result) => {
                    result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    return Ok(result);
                }
                Err(AttemptError::ConnectRefused(source)) if attempt < connect_retries => {
                    attempt += 1;
                    warn!(container_id, attempt, connect_retries, "connection refused, retrying");
                    let _ = source;
                    tokio::time::sleep(retry_delay).await;
                }
                Err(AttemptError::ConnectRefused(source)) => {
                    return Err(SupervisorError::ConnectionRefused { attempts: attempt + 1, source });
                }
                Err(AttemptError::Timeout) => return Err(SupervisorError::Timeout(timeout)),
                Err(AttemptError::Terminal(e)) => return Err(e),
            }
        }
    }

    async fn try_invoke(
        &self,
        handle: &ContainerHandle,
        input: &[u8],
        timeout: Duration,
    ) -> std::result::Result<InvocationResult, AttemptError> {
        let url = format!("http://{}:{}/computation", handle.host, handle.port);
        let request_body = build_request_body(input);

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&request_body)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_transport_error)?;
        let status = response.status();
        let response_body = response.bytes().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            return Err(AttemptError::Terminal(SupervisorError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&response_body).into_owned(),
            }));
        }

        debug!(url, status = status.as_u16(), "container responded");
        interpret_response(&response_body).map_err(AttemptError::Terminal)
    }
}

/// Shape the `/computation` request body (spec §4.3, "Invocation"): `{"input": original}`,
/// spread with the input's own top-level fields when it parses as a JSON object, so a caller
/// that resolved `{"x": 2}` gets both `input` and `x` on the request.
fn build_request_body(input: &[u8]) -> serde_json::Value {
    let original = String::from_utf8_lossy(input).into_owned();
    let mut body = serde_json::Map::new();
    body.insert("input".to_string(), serde_json::Value::String(original));
    if let Ok(serde_json::Value::Object(parsed)) = serde_json::from_slice::<serde_json::Value>(input) {
        for (key, value) in parsed {
            body.insert(key, value);
        }
    }
    serde_json::Value::Object(body)
}

fn classify_transport_error(e: reqwest::Error) -> AttemptError {
    if e.is_timeout() {
        AttemptError::Timeout
    } else if e.is_connect() {
        AttemptError::ConnectRefused(e)
    } else {
        AttemptError::Terminal(SupervisorError::MalformedResponse(e.to_string()))
    }
}

fn interpret_response(body: &[u8]) -> std::result::Result<InvocationResult, SupervisorError> {
    if let Ok(parsed) = serde_json::from_slice::<ComputationResponse>(body) {
        let output = match parsed.output {
            serde_json::Value::String(s) => s.into_bytes(),
            other => serde_json::to_vec(&other).map_err(|e| SupervisorError::MalformedResponse(e.to_string()))?,
        };
        return Ok(InvocationResult { output, exit_code: parsed.exit_code, elapsed_ms: 0 });
    }
    Ok(InvocationResult { output: body.to_vec(), exit_code: 0, elapsed_ms: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interprets_string_output_field() {
        let body = br#"{"output":"hello","exit_code":0}"#;
        let result = interpret_response(body).unwrap();
        assert_eq!(result.output, b"hello");
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn interprets_structured_output_field_as_json() {
        let body = br#"{"output":{"a":1},"exit_code":2}"#;
        let result = interpret_response(body).unwrap();
        assert_eq!(result.exit_code, 2);
        let parsed: serde_json::Value = serde_json::from_slice(&result.output).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn request_body_spreads_object_fields_alongside_input() {
        let body = build_request_body(br#"{"x":2}"#);
        assert_eq!(body["input"], serde_json::json!(r#"{"x":2}"#));
        assert_eq!(body["x"], serde_json::json!(2));
    }

    #[test]
    fn request_body_wraps_non_object_input() {
        let body = build_request_body(b"plain text");
        assert_eq!(body, serde_json::json!({"input": "plain text"}));
    }

    #[test]
    fn falls_back_to_raw_body_when_unstructured() {
        let body = b"plain text output";
        let result = interpret_response(body).unwrap();
        assert_eq!(result.output, body);
        assert_eq!(result.exit_code, 0);
    }

    async fn supervisor_with_handle(host: &str, port: u16) -> ContainerSupervisor {
        let supervisor = ContainerSupervisor::connect().expect("docker client construction is lazy");
        supervisor
            .handles
            .write()
            .await
            .insert("demo".to_string(), ContainerHandle { container_name: "noosphere-demo".to_string(), host: host.to_string(), port });
        supervisor
    }

    #[tokio::test]
    async fn invoke_succeeds_against_a_mock_server() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/computation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"output": "ok", "exit_code": 0})))
            .mount(&server)
            .await;

        let url = server.uri();
        let (host, port) = parse_host_port(&url);
        let supervisor = supervisor_with_handle(&host, port).await;

        let result = supervisor
            .invoke("demo", b"{\"x\":1}", Duration::from_secs(5), 0, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(result.output, b"ok");
    }

    #[tokio::test]
    async fn invoke_surfaces_http_status_errors_without_retry() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/computation"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let url = server.uri();
        let (host, port) = parse_host_port(&url);
        let supervisor = supervisor_with_handle(&host, port).await;

        let err = supervisor
            .invoke("demo", b"input", Duration::from_secs(5), 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::HttpStatus { status: 500, .. }));
    }

    fn parse_host_port(uri: &str) -> (String, u16) {
        let stripped = uri.trim_start_matches("http://");
        let (host, port) = stripped.split_once(':').expect("wiremock uri has a port");
        (host.to_string(), port.parse().expect("wiremock port is numeric"))
    }
}
