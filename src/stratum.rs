//! Pool login protocol client
//!
//! Speaks the line-delimited JSON `login` handshake a mining client uses to
//! authenticate against the pool and receive its first job. Each call opens
//! a fresh TCP connection, writes one frame, reads one frame and shuts the
//! socket down in both directions, whatever the outcome.

use crate::schema::{describe, Schema};
use crate::{ConnectionEndpoint, Error, JobDescriptor, LoginParams, LoginRequest, LoginResponse, Result};
use futures::StreamExt;
use serde_json::Value;
use std::net::Shutdown;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, instrument, warn};

/// Upper bound on a single response frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Default bound on connect, write and read
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Status value of a successful login
pub const STATUS_OK: &str = "OK";

/// One-shot login client for a pool endpoint
#[derive(Debug, Clone)]
pub struct StratumClient {
    endpoint: ConnectionEndpoint,
    io_timeout: Duration,
    max_frame_len: usize,
}

impl StratumClient {
    pub fn new(endpoint: ConnectionEndpoint) -> Self {
        Self {
            endpoint,
            io_timeout: DEFAULT_IO_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn endpoint(&self) -> &ConnectionEndpoint {
        &self.endpoint
    }

    /// Perform one login exchange and return the raw parsed response
    #[instrument(skip(self, params), fields(endpoint = %self.endpoint, rig = %params.rig_id))]
    pub async fn login(&self, params: LoginParams) -> Result<Value> {
        let frame = LoginRequest::new(params).to_frame()?;

        let mut stream = timeout(self.io_timeout, TcpStream::connect(self.endpoint.authority()))
            .await
            .map_err(|_| Error::connection(format!("connect to {} timed out", self.endpoint)))?
            .map_err(|e| Error::connection(format!("connect to {} failed: {}", self.endpoint, e)))?;

        debug!("Connected to pool, sending {} byte login frame", frame.len());

        let outcome = timeout(self.io_timeout, self.exchange(&mut stream, &frame))
            .await
            .unwrap_or_else(|_| {
                Err(Error::connection(format!(
                    "no response from {} within {:?}",
                    self.endpoint, self.io_timeout
                )))
            });

        close(stream);

        let line = outcome?;
        debug!("Received {} byte response frame", line.len());

        serde_json::from_str(&line)
            .map_err(|e| Error::protocol(format!("response is not valid JSON ({}): {:?}", e, line)))
    }

    /// Log in and hold the response to the handshake contract
    pub async fn login_checked(&self, params: LoginParams) -> Result<LoginResponse> {
        let response = self.login(params).await?;
        verify_login_response(&response)
    }

    async fn exchange(&self, stream: &mut TcpStream, frame: &[u8]) -> Result<String> {
        stream
            .write_all(frame)
            .await
            .map_err(|e| Error::connection(format!("write to {} failed: {}", self.endpoint, e)))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::connection(format!("flush to {} failed: {}", self.endpoint, e)))?;

        let codec = LinesCodec::new_with_max_length(self.max_frame_len);
        let mut lines = FramedRead::new(stream, codec);

        match lines.next().await {
            Some(Ok(line)) => Ok(line),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => Err(Error::protocol(format!(
                "response frame exceeds {} bytes",
                self.max_frame_len
            ))),
            Some(Err(LinesCodecError::Io(e))) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(Error::protocol(format!("response is not UTF-8: {}", e)))
            }
            Some(Err(LinesCodecError::Io(e))) => Err(Error::connection(format!(
                "read from {} failed: {}",
                self.endpoint, e
            ))),
            None => Err(Error::protocol(format!(
                "{} closed the connection without a response",
                self.endpoint
            ))),
        }
    }
}

/// Shut the socket down in both directions and drop it
fn close(stream: TcpStream) {
    match stream.into_std() {
        Ok(std_stream) => {
            if let Err(e) = std_stream.shutdown(Shutdown::Both) {
                // Peer already gone
                debug!("Socket shutdown: {}", e);
            }
        }
        Err(e) => warn!("Could not detach socket for shutdown: {}", e),
    }
}

/// Check a raw login response against the handshake contract.
///
/// Envelope keys, a null `error`, `jsonrpc == "2.0"`, the full result/job
/// shape and `status == "OK"` are required. Missing keys and a rejected
/// login are protocol errors; a present but mistyped field is a schema
/// violation.
pub fn verify_login_response(response: &Value) -> Result<LoginResponse> {
    let envelope = response
        .as_object()
        .ok_or_else(|| Error::protocol(format!("response is {}, not an object", describe(response))))?;

    for key in ["id", "jsonrpc", "error"] {
        if !envelope.contains_key(key) {
            return Err(Error::protocol(format!("response is missing `{}`", key)));
        }
    }

    // A rejected login carries no `result` at all
    if !response["error"].is_null() {
        return Err(Error::protocol(format!(
            "login rejected: error is {}",
            response["error"]
        )));
    }

    if !envelope.contains_key("result") {
        return Err(Error::protocol("response is missing `result`"));
    }

    if response["jsonrpc"] != LoginRequest::PROTOCOL_VERSION {
        return Err(Error::protocol(format!(
            "jsonrpc is {}, expected \"{}\"",
            response["jsonrpc"],
            LoginRequest::PROTOCOL_VERSION
        )));
    }

    Schema::login_response()
        .validate(response)
        .map_err(|e| match e {
            Error::SchemaViolation { path, actual, .. } if actual == "missing" => {
                Error::protocol(format!("response is missing `{}`", path))
            }
            other => other,
        })?;

    let status = &response["result"]["status"];
    if status != STATUS_OK {
        return Err(Error::protocol(format!(
            "result.status is {}, expected \"{}\"",
            status, STATUS_OK
        )));
    }

    let parsed: LoginResponse = serde_json::from_value(response.clone())
        .map_err(|e| Error::protocol(format!("response does not decode: {}", e)))?;
    check_job_hex(&parsed.result.job)?;
    Ok(parsed)
}

fn check_job_hex(job: &JobDescriptor) -> Result<()> {
    let fields = [
        ("blob", &job.blob),
        ("target", &job.target),
        ("seed_hash", &job.seed_hash),
        ("next_seed_hash", &job.next_seed_hash),
    ];
    for (name, value) in fields {
        if hex::decode(value).is_err() {
            return Err(Error::schema(
                format!("result.job.{}", name),
                "hex string",
                format!("string {:?}", value),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
    use tokio::net::TcpListener;

    fn params() -> LoginParams {
        LoginParams {
            login: "9wviCeWe2D8XS82k2ovp5EUYLzBt9pYNW2LXUFsZiv8S3Mt21FZ5qQaAroko1enzw3eGr9qC7X1D7Geoo2RrAotYPwq9Gm8".to_string(),
            pass: "d=300000".to_string(),
            agent: "pool-integ".to_string(),
            rig_id: "pool-integ_test".to_string(),
            algorithms: vec!["rx/0".to_string()],
        }
    }

    fn good_response() -> Value {
        json!({
            "id": 1,
            "jsonrpc": "2.0",
            "error": null,
            "result": {
                "id": "1f2e3d",
                "status": "OK",
                "job": {
                    "blob": "0e0ea1b2c3",
                    "job_id": "7",
                    "target": "b88d0600",
                    "height": 1500123,
                    "seed_hash": "aabbccdd",
                    "next_seed_hash": ""
                }
            }
        })
    }

    /// Serve one connection: read the request line, then write `reply` and close
    async fn canned_server(reply: Vec<u8>) -> (ConnectionEndpoint, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut reader = BufReader::new(read_half);
            let mut request = String::new();
            reader.read_line(&mut request).await.unwrap();
            write_half.write_all(&reply).await.unwrap();
            let _ = write_half.shutdown().await;
            request
        });
        (ConnectionEndpoint::new("127.0.0.1", port).unwrap(), handle)
    }

    #[tokio::test]
    async fn test_login_round_trip() {
        let mut reply = serde_json::to_vec(&good_response()).unwrap();
        reply.push(b'\n');
        let (endpoint, server) = canned_server(reply).await;

        let client = StratumClient::new(endpoint);
        let response = client.login_checked(params()).await.unwrap();

        assert_eq!(response.result.status, "OK");
        assert_eq!(response.result.job.height, 1500123);
        assert!(response.error.is_none());

        let request: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(request["method"], "login");
        assert_eq!(request["params"]["pass"], "d=300000");
        assert_eq!(request["params"]["algo"], json!(["rx/0"]));
    }

    #[tokio::test]
    async fn test_job_has_exactly_the_six_keys() {
        let mut reply = serde_json::to_vec(&good_response()).unwrap();
        reply.push(b'\n');
        let (endpoint, _server) = canned_server(reply).await;

        let raw = StratumClient::new(endpoint).login(params()).await.unwrap();
        let job = raw["result"]["job"].as_object().unwrap();
        let mut keys: Vec<&str> = job.keys().map(String::as_str).collect();
        keys.sort_unstable();
        let mut expected = JobDescriptor::KEYS.to_vec();
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_response_split_across_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let body = serde_json::to_vec(&good_response()).unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let (head, tail) = body.split_at(body.len() / 2);
            socket.write_all(head).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            socket.write_all(tail).await.unwrap();
            socket.write_all(b"\n").await.unwrap();
        });

        let client = StratumClient::new(ConnectionEndpoint::new("127.0.0.1", port).unwrap());
        let response = client.login_checked(params()).await.unwrap();
        assert_eq!(response.result.job.job_id, "7");
    }

    #[tokio::test]
    async fn test_response_larger_than_legacy_buffer() {
        let mut response = good_response();
        response["result"]["job"]["blob"] = json!("ab".repeat(4096));
        let mut reply = serde_json::to_vec(&response).unwrap();
        reply.push(b'\n');
        assert!(reply.len() > 4096);
        let (endpoint, _server) = canned_server(reply).await;

        let parsed = StratumClient::new(endpoint).login_checked(params()).await.unwrap();
        assert_eq!(parsed.result.job.blob.len(), 8192);
    }

    #[tokio::test]
    async fn test_frame_terminated_by_eof() {
        let reply = serde_json::to_vec(&good_response()).unwrap();
        let (endpoint, _server) = canned_server(reply).await;

        let parsed = StratumClient::new(endpoint).login_checked(params()).await.unwrap();
        assert_eq!(parsed.id, 1);
    }

    #[tokio::test]
    async fn test_malformed_json_is_protocol_error() {
        let (endpoint, _server) = canned_server(b"{\"id\":1,\"jsonrpc\"\n".to_vec()).await;
        let err = StratumClient::new(endpoint).login(params()).await.unwrap_err();
        assert_matches!(err, Error::Protocol { .. });
    }

    #[tokio::test]
    async fn test_oversized_frame_is_protocol_error() {
        let (endpoint, _server) = canned_server(vec![b'x'; 2048]).await;
        let err = StratumClient::new(endpoint)
            .with_max_frame_len(1024)
            .login(params())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Protocol { .. });
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = StratumClient::new(ConnectionEndpoint::new("127.0.0.1", port).unwrap())
            .login(params())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Connection { .. });
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = StratumClient::new(ConnectionEndpoint::new("127.0.0.1", port).unwrap())
            .with_io_timeout(Duration::from_millis(100))
            .login(params())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Connection { .. });
    }

    #[test]
    fn test_rejected_login_reports_error_value() {
        let response = json!({
            "id": 1,
            "jsonrpc": "2.0",
            "error": {"code": -1, "message": "Invalid address"},
            "result": null
        });
        let err = verify_login_response(&response).unwrap_err();
        assert_matches!(err, Error::Protocol { ref message } if message.contains("Invalid address"));
    }

    #[test]
    fn test_pool_rejection_frame_without_result() {
        let response: Value = serde_json::from_str(
            r#"{"id":1,"jsonrpc":"2.0","error":{"code":-1, "message":"login only main wallet addresses are supported"}}"#,
        )
        .unwrap();
        let err = verify_login_response(&response).unwrap_err();
        assert_matches!(
            err,
            Error::Protocol { ref message }
                if message.contains("main wallet") && message.contains("-1")
        );
    }

    #[test]
    fn test_success_without_result_is_protocol_error() {
        let mut response = good_response();
        response.as_object_mut().unwrap().remove("result");
        let err = verify_login_response(&response).unwrap_err();
        assert_matches!(err, Error::Protocol { ref message } if message.contains("`result`"));
    }

    #[test]
    fn test_wrong_status_reports_actual_value() {
        let mut response = good_response();
        response["result"]["status"] = json!("BLOCKED");
        let err = verify_login_response(&response).unwrap_err();
        assert_matches!(err, Error::Protocol { ref message } if message.contains("\"BLOCKED\""));
    }

    #[test]
    fn test_missing_job_key_is_protocol_error() {
        let mut response = good_response();
        response["result"]["job"]
            .as_object_mut()
            .unwrap()
            .remove("seed_hash");
        let err = verify_login_response(&response).unwrap_err();
        assert_matches!(err, Error::Protocol { ref message } if message.contains("result.job.seed_hash"));
    }

    #[test]
    fn test_mistyped_height_is_schema_violation() {
        let mut response = good_response();
        response["result"]["job"]["height"] = json!("1500123");
        let err = verify_login_response(&response).unwrap_err();
        assert_matches!(err, Error::SchemaViolation { ref path, .. } if path == "result.job.height");
    }

    #[test]
    fn test_non_hex_blob_is_schema_violation() {
        let mut response = good_response();
        response["result"]["job"]["blob"] = json!("zz");
        let err = verify_login_response(&response).unwrap_err();
        assert_matches!(err, Error::SchemaViolation { ref path, .. } if path == "result.job.blob");
    }

    #[test]
    fn test_wrong_protocol_version() {
        let mut response = good_response();
        response["jsonrpc"] = json!("1.0");
        assert_matches!(verify_login_response(&response), Err(Error::Protocol { .. }));
    }
}
