//! Message transports for the stdio server loop.
//!
//! Frames are newline-delimited JSON. [`LineTransport`] works over any async
//! reader/writer pair; [`StdioTransport`] is that over stdin/stdout.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc;

use crate::error::McpError;

/// Moves one JSON-RPC frame at a time.
///
/// The server loop races `receive` against finished tool calls, so
/// `receive` must be cancel safe: dropping it mid-read must not lose input.
#[async_trait]
pub trait McpTransport: Send {
    /// Next non-empty frame, or `None` once the peer has closed.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;

    async fn send(&mut self, message: &str) -> Result<(), McpError>;
}

/// Newline-delimited JSON over an async byte stream.
pub struct LineTransport<R, W> {
    lines: Lines<BufReader<R>>,
    writer: W,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }
}

#[async_trait]
impl<R, W> McpTransport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        // `next_line` is cancel safe; `read_line` is not.
        while let Some(line) = self.lines.next_line().await? {
            let frame = line.trim();
            if !frame.is_empty() {
                return Ok(Some(frame.to_string()));
            }
        }
        Ok(None)
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        let mut frame = Vec::with_capacity(message.len() + 1);
        frame.extend_from_slice(message.as_bytes());
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Stdin/stdout transport. Logs must go to stderr.
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl StdioTransport {
    pub fn stdio() -> Self {
        LineTransport::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

/// In-memory transport; one end for the server, one for a test client.
pub struct ChannelTransport {
    inbox: mpsc::Receiver<String>,
    outbox: mpsc::Sender<String>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, Self) {
        let (to_b, b_inbox) = mpsc::channel(32);
        let (to_a, a_inbox) = mpsc::channel(32);
        (
            Self {
                inbox: a_inbox,
                outbox: to_b,
            },
            Self {
                inbox: b_inbox,
                outbox: to_a,
            },
        )
    }
}

#[async_trait]
impl McpTransport for ChannelTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.inbox.recv().await)
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.outbox.send(message.to_string()).await.map_err(|_| {
            McpError::Transport(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer transport dropped"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_line_transport_skips_blank_lines() {
        let input: &[u8] = b"\n  \n{\"a\":1}\n\n{\"b\":2}\n";
        let mut out = Vec::new();
        let mut transport = LineTransport::new(input, &mut out);

        assert_eq!(transport.receive().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(transport.receive().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(transport.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_transport_frames_output() {
        let (client, server) = tokio::io::duplex(256);
        let (_server_read, server_write) = tokio::io::split(server);
        let mut transport = LineTransport::new(tokio::io::empty(), server_write);
        transport.send("{\"id\":1}").await.unwrap();
        transport.send("{\"id\":2}").await.unwrap();
        drop(transport);

        let (mut client_read, _client_write) = tokio::io::split(client);
        let mut buf = vec![0u8; 18];
        client_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"{\"id\":1}\n{\"id\":2}\n");
    }

    #[tokio::test]
    async fn test_channel_pair_is_crossed() {
        let (mut a, mut b) = ChannelTransport::pair();
        a.send("from a").await.unwrap();
        assert_eq!(b.receive().await.unwrap().as_deref(), Some("from a"));
        b.send("from b").await.unwrap();
        assert_eq!(a.receive().await.unwrap().as_deref(), Some("from b"));
    }

    #[tokio::test]
    async fn test_channel_closed_peer() {
        let (mut a, b) = ChannelTransport::pair();
        drop(b);
        assert_eq!(a.receive().await.unwrap(), None);
        assert!(a.send("lost").await.is_err());
    }
}
