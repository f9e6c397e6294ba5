//! Newline-delimited JSON transport.
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//!
//! The same framing is used on TCP connections and on stdio; in stdio mode
//! stderr carries the logs, never protocol messages.
//!
//! Reading and writing are split into [`LineReader`] and [`LineWriter`] so a
//! connection can read in one task while another writes.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::protocol::jsonrpc::{
    JsonRpcError, JsonRpcResponse, OutgoingNotification, OutgoingRequest,
};

/// Reads newline-terminated messages.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wraps a byte stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Reads the next message line.
    ///
    /// Returns `None` if the stream is closed (EOF).
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        // Remove the trailing newline
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        Ok(Some(line))
    }
}

/// Writes newline-terminated messages.
#[derive(Debug)]
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// Wraps a byte sink.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a JSON-RPC response.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        self.write_message(response).await
    }

    /// Writes a JSON-RPC error.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_error(&mut self, error: &JsonRpcError) -> io::Result<()> {
        self.write_message(error).await
    }

    /// Writes a JSON-RPC notification.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_notification(
        &mut self,
        notification: &OutgoingNotification,
    ) -> io::Result<()> {
        self.write_message(notification).await
    }

    /// Writes a JSON-RPC request.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_request(&mut self, request: &OutgoingRequest) -> io::Result<()> {
        self.write_message(request).await
    }

    async fn write_message<T: Serialize + Sync>(&mut self, message: &T) -> io::Result<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.write_raw(json).await
    }

    /// Writes a raw JSON string with newline termination.
    ///
    /// The line goes out in a single write so concurrent writers sharing
    /// the sink behind a lock never interleave partial messages.
    async fn write_raw(&mut self, mut json: String) -> io::Result<()> {
        debug_assert!(
            !json.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::jsonrpc::RequestId;

    #[tokio::test]
    async fn reads_lines_and_strips_terminators() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"a\":1}\r\n{\"b\":")
            .read(b"2}\n")
            .build();
        let mut reader = LineReader::new(mock);

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_returned() {
        let mock = tokio_test::io::Builder::new().read(b"ping").build();
        let mut reader = LineReader::new(mock);
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("ping"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_one_line_per_message() {
        let mock = tokio_test::io::Builder::new()
            .write(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n")
            .build();
        let mut writer = LineWriter::new(mock);
        writer
            .write_response(&JsonRpcResponse::success(
                RequestId::Number(1),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
    }

    #[test]
    fn serialise_error_no_newlines() {
        let error = JsonRpcError::method_not_found(RequestId::Number(1), "test/method");

        let json = serde_json::to_string(&error).unwrap();
        assert!(
            !json.contains('\n'),
            "Serialised JSON should not contain newlines"
        );
    }
}
