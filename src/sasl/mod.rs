//! Bit-exact framing for the saslauthd Unix-socket protocol, plus a small
//! server loop that fronts an arbitrary authentication callback with it.
//!
//! Wire format: a request is four length-prefixed UTF-8 strings, in order
//! `login, password, service, realm`; each field is a big-endian `u16`
//! length followed by that many bytes. A response is a single
//! length-prefixed string: `"OK"` or `"NO"`, optionally followed by a space
//! and a free-form message.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, warn};

use crate::error::WireError;
use crate::secret::SecretString;

/// Fields longer than this fail encode/decode with [`WireError::TooLong`].
pub const MAX_FIELD_LEN: usize = 256;

/// A saslauthd authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub login: String,
    pub password: String,
    pub service: String,
    pub realm: String,
}

impl Request {
    pub fn new(login: impl Into<String>, password: impl Into<String>, service: impl Into<String>, realm: impl Into<String>) -> Self {
        Self { login: login.into(), password: password.into(), service: service.into(), realm: realm.into() }
    }

    /// Encodes the four fields in wire order. Fails if any field exceeds
    /// [`MAX_FIELD_LEN`]; emptiness of `login`/`password` is a decode-time
    /// concern, not an encode-time one.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        for field in [&self.login, &self.password, &self.service, &self.realm] {
            encode_field(&mut out, field)?;
        }
        Ok(out)
    }

    /// Reads one request off `reader`. `login` and `password` must be
    /// non-empty; `service` and `realm` may be zero-length.
    pub async fn decode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, WireError> {
        let login = read_field(reader, false).await?;
        let password = read_field(reader, false).await?;
        let service = read_field(reader, true).await?;
        let realm = read_field(reader, true).await?;
        Ok(Self { login, password, service, realm })
    }
}

/// The saslauthd response: a yes/no result plus an optional free-form
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub ok: bool,
    pub message: Option<String>,
}

impl Response {
    /// `message` is only meaningful when `ok` is `false`; a successful
    /// response never carries one, matching saslauthd itself.
    pub fn new(ok: bool, message: impl Into<String>) -> Self {
        let message = message.into();
        Self { ok, message: if ok || message.is_empty() { None } else { Some(message) } }
    }

    /// A successful result is always rendered as the bare literal `"OK"`;
    /// saslauthd never attaches a message to a success. A failure is `"NO"`
    /// plus an optional `" "`-separated reason.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let text = if self.ok {
            String::from("OK")
        } else {
            match &self.message {
                Some(message) => format!("NO {message}"),
                None => String::from("NO"),
            }
        };
        let mut out = Vec::new();
        encode_field(&mut out, &text)?;
        Ok(out)
    }

    pub async fn decode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, WireError> {
        let text = read_field(reader, true).await?;
        let (code, message) = match text.split_once(' ') {
            Some((code, message)) => (code, Some(message.to_owned())),
            None => (text.as_str(), None),
        };
        match code {
            "OK" => Ok(Self { ok: true, message: None }),
            "NO" => Ok(Self { ok: false, message }),
            _ => Err(WireError::Truncated),
        }
    }
}

fn encode_field(out: &mut Vec<u8>, s: &str) -> Result<(), WireError> {
    if s.len() > MAX_FIELD_LEN {
        return Err(WireError::TooLong { limit: MAX_FIELD_LEN });
    }
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

async fn read_field<R: AsyncRead + Unpin>(reader: &mut R, allow_empty: bool) -> Result<String, WireError> {
    let len = reader.read_u16().await.map_err(|_| WireError::Truncated)? as usize;
    if len > MAX_FIELD_LEN {
        return Err(WireError::TooLong { limit: MAX_FIELD_LEN });
    }
    if len == 0 {
        return if allow_empty { Ok(String::new()) } else { Err(WireError::EmptyCredential) };
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|_| WireError::Truncated)?;
    String::from_utf8(buf).map_err(|_| WireError::Truncated)
}

/// Binds `socket_path` (removing a stale socket file first, matching
/// saslauthd's own behavior) and serves connections until a permanent
/// accept error occurs.
pub async fn listen_and_serve<F, Fut>(socket_path: &std::path::Path, callback: F) -> io::Result<()>
where
    F: Fn(String, SecretString, String, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = (bool, String)> + Send,
{
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    serve(listener, callback).await
}

/// Runs the accept loop against an already-bound listener. Temporary accept
/// errors (`Interrupted`, `ConnectionAborted`, `WouldBlock`) are retried;
/// anything else terminates the loop.
pub async fn serve<F, Fut>(listener: UnixListener, callback: F) -> io::Result<()>
where
    F: Fn(String, SecretString, String, String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = (bool, String)> + Send,
{
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let callback = callback.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, callback).await {
                        debug!(error = %e, "sasl connection error");
                    }
                });
            }
            Err(e) if is_transient(&e) => {
                warn!(error = %e, "transient accept error, retrying");
            }
            Err(e) => {
                error!(error = %e, "permanent accept error, stopping sasl listener");
                return Err(e);
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted | io::ErrorKind::WouldBlock)
}

async fn handle_connection<F, Fut>(mut stream: UnixStream, callback: F) -> io::Result<()>
where
    F: Fn(String, SecretString, String, String) -> Fut,
    Fut: Future<Output = (bool, String)> + Send,
{
    let response = match Request::decode(&mut stream).await {
        Ok(request) => {
            let password = SecretString::from_str(&request.password);
            let (ok, message) = callback(request.login, password, request.service, request.realm).await;
            Response::new(ok, message)
        }
        Err(e) => Response::new(false, format!("error decoding request: {e}")),
    };

    let bytes = response.encode().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    stream.write_all(&bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn request_round_trips() {
        let req = Request::new("user", "pw", "service", "realm");
        let bytes = req.encode().unwrap();
        let decoded = Request::decode(&mut Cursor::new(bytes)).await.unwrap();
        assert_eq!(decoded, req);
    }

    #[tokio::test]
    async fn request_allows_empty_service_and_realm() {
        let req = Request::new("user", "pw", "", "");
        let bytes = req.encode().unwrap();
        let decoded = Request::decode(&mut Cursor::new(bytes)).await.unwrap();
        assert_eq!(decoded, req);
    }

    #[tokio::test]
    async fn decode_matches_the_literal_saslauthd_frame() {
        let bytes = [0x00, 0x04, b'u', b's', b'e', b'r', 0x00, 0x02, b'p', b'w', 0x00, 0x00, 0x00, 0x00];
        let decoded = Request::decode(&mut Cursor::new(bytes.to_vec())).await.unwrap();
        assert_eq!(decoded, Request::new("user", "pw", "", ""));
    }

    #[tokio::test]
    async fn decode_rejects_empty_login() {
        let bytes = [0x00, 0x00, 0x00, 0x02, b'p', b'w', 0x00, 0x00, 0x00, 0x00];
        let err = Request::decode(&mut Cursor::new(bytes.to_vec())).await.unwrap_err();
        assert_eq!(err, WireError::EmptyCredential);
    }

    #[tokio::test]
    async fn decode_rejects_oversized_field() {
        let mut bytes = vec![0x01, 0x01];
        bytes.extend(std::iter::repeat_n(b'x', 257));
        let err = Request::decode(&mut Cursor::new(bytes)).await.unwrap_err();
        assert_eq!(err, WireError::TooLong { limit: MAX_FIELD_LEN });
    }

    #[tokio::test]
    async fn decode_rejects_truncated_frame() {
        let bytes = [0x00, 0x04, b'u', b's'];
        let err = Request::decode(&mut Cursor::new(bytes.to_vec())).await.unwrap_err();
        assert_eq!(err, WireError::Truncated);
    }

    #[tokio::test]
    async fn response_round_trips_with_a_failure_message() {
        let resp = Response::new(false, "wrong credentials");
        let bytes = resp.encode().unwrap();
        let decoded = Response::decode(&mut Cursor::new(bytes)).await.unwrap();
        assert_eq!(decoded, resp);
    }

    #[tokio::test]
    async fn success_is_always_the_bare_ok_literal() {
        let resp = Response::new(true, "OK");
        let bytes = resp.encode().unwrap();
        assert_eq!(bytes, vec![0x00, 0x02, b'O', b'K']);
    }
}
