//! Replies and in-flight calls.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use super::connection::ClientConnection;
use crate::error::{RpcError, Result};
use crate::protocol::envelope::{self, Envelope, ResultCode};

/// A reply received from the server.
///
/// The envelope's status is checked on receipt; the value is decoded
/// lazily by [`value`](Reply::value).
#[derive(Debug, Clone)]
pub struct Reply {
    request_id: u64,
    code: ResultCode,
    body: Bytes,
}

impl Reply {
    pub(crate) fn parse(request_id: u64, body: Bytes) -> Result<Self> {
        let code = envelope::code(&body).map_err(|e| {
            RpcError::Protocol(format!("malformed reply to request {}: {}", request_id, e))
        })?;
        Ok(Self {
            request_id,
            code,
            body,
        })
    }

    /// Request id this reply answers.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Envelope status.
    pub fn code(&self) -> ResultCode {
        self.code
    }

    /// Whether the call succeeded.
    pub fn success(&self) -> bool {
        self.code == ResultCode::Ok
    }

    /// Decode the returned value.
    ///
    /// A reply without a value (the handler returned unit) decodes as
    /// `()` or `None`.
    ///
    /// # Errors
    ///
    /// [`RpcError::Remote`] for a FAIL reply, a decode error if the value
    /// is not a `T`.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T> {
        envelope::decode::<T>(&self.body)?.into_result()
    }

    /// `Ok(())` for a success, [`RpcError::Remote`] for a failure.
    pub fn check(&self) -> Result<()> {
        match self.error_message() {
            Some(message) => Err(RpcError::Remote(message)),
            None => Ok(()),
        }
    }

    /// The server's message for a FAIL reply.
    pub fn error_message(&self) -> Option<String> {
        match envelope::decode::<serde::de::IgnoredAny>(&self.body) {
            Ok(Envelope::Fail(message)) => Some(message),
            _ => None,
        }
    }

    /// Raw envelope bytes.
    pub fn payload(&self) -> &Bytes {
        &self.body
    }
}

/// A call that has been sent and is waiting for its reply.
///
/// Each call waits on its own result slot, so calls may be awaited in any
/// order and from different tasks.
pub struct PendingCall {
    pub(crate) request_id: u64,
    pub(crate) rx: oneshot::Receiver<Result<Bytes>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) conn: Arc<ClientConnection>,
}

impl PendingCall {
    /// Request id carried by the call.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Wait for the reply.
    ///
    /// # Errors
    ///
    /// - [`RpcError::WaitTimeout`] when the wait timeout elapses first; the
    ///   call is forgotten and a late reply is discarded.
    /// - [`RpcError::ConnectionClosed`] when the connection drops first.
    /// - [`RpcError::Protocol`] when the reply is not a valid envelope.
    pub async fn wait(self) -> Result<Reply> {
        let PendingCall {
            request_id,
            rx,
            timeout,
            conn,
        } = self;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    conn.forget(request_id);
                    return Err(RpcError::WaitTimeout(request_id));
                }
            },
            None => rx.await,
        };

        let body = received.map_err(|_| RpcError::ConnectionClosed)??;
        Reply::parse(request_id, body)
    }

    /// Wait for the reply from synchronous code.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn blocking_wait(self) -> Result<Reply> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        runtime.block_on(self.wait())
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("request_id", &self.request_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_reply() {
        let reply = Reply::parse(3, envelope::encode_ok(&5i32).unwrap()).unwrap();

        assert!(reply.success());
        assert_eq!(reply.request_id(), 3);
        assert_eq!(reply.code(), ResultCode::Ok);
        assert_eq!(reply.value::<i32>().unwrap(), 5);
        assert!(reply.check().is_ok());
        assert_eq!(reply.error_message(), None);
    }

    #[test]
    fn test_unit_reply() {
        let reply = Reply::parse(1, envelope::encode_ok(&()).unwrap()).unwrap();
        assert!(reply.success());
        reply.value::<()>().unwrap();
        assert_eq!(reply.value::<Option<String>>().unwrap(), None);
    }

    #[test]
    fn test_fail_reply() {
        let reply = Reply::parse(4, envelope::encode_fail("unknown function: missing")).unwrap();

        assert!(!reply.success());
        assert_eq!(reply.code(), ResultCode::Fail);
        assert_eq!(
            reply.error_message().as_deref(),
            Some("unknown function: missing")
        );

        match reply.value::<i32>() {
            Err(RpcError::Remote(message)) => assert_eq!(message, "unknown function: missing"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(reply.check(), Err(RpcError::Remote(_))));
    }

    #[test]
    fn test_wrong_value_type() {
        let reply = Reply::parse(1, envelope::encode_ok(&"text").unwrap()).unwrap();
        assert!(matches!(reply.value::<u64>(), Err(RpcError::MsgPackDecode(_))));
    }

    #[test]
    fn test_malformed_reply_rejected() {
        let result = Reply::parse(9, Bytes::from_static(b"\x92\x07\x01"));
        assert!(matches!(result, Err(RpcError::Protocol(_))));
    }
}
