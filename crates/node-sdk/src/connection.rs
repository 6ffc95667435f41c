//! TCP plumbing shared by both ends of a session: a line reader, a writer
//! task fed through the [`Link`]'s outbound channel, and orderly teardown.
//!
//! Lines are framed on raw bytes so a peer sending bytes that are not UTF-8
//! costs one [`Frame::Garbled`], not the session.  Only an oversized line or
//! an I/O error ends the stream.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{
    AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead, FramedWrite, LinesCodec,
};

use crate::link::{Link, Outbound};

/// Grace period for the writer to flush on close.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// One `\n`-terminated line received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    /// Not valid UTF-8.  Holds a lossy rendering for the logs.
    Garbled(String),
}

impl Frame {
    /// Decode one raw line, dropping a trailing `\r`.
    pub fn decode(raw: &[u8]) -> Self {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        match std::str::from_utf8(raw) {
            Ok(text) => Frame::Line(text.to_owned()),
            Err(_) => Frame::Garbled(String::from_utf8_lossy(raw).into_owned()),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Line(text) | Frame::Garbled(text) => f.write_str(text),
        }
    }
}

pub struct Connection {
    pub link: Link,
    lines: FramedRead<OwnedReadHalf, AnyDelimiterCodec>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Split `stream` and start its writer task.
    pub fn new(stream: TcpStream, peer: impl Into<String>, timeout: Duration, max_line: usize) -> Self {
        let (read, write) = stream.into_split();
        let lines = FramedRead::new(
            read,
            AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_line),
        );
        let mut sink = FramedWrite::new(write, LinesCodec::new());

        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                match frame {
                    Outbound::Line(line) => {
                        if sink.send(line).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => break,
                }
            }
            let _ = SinkExt::<String>::close(&mut sink).await;
        });

        Self {
            link: Link::new(peer, tx, timeout),
            lines,
            writer,
        }
    }

    /// Next received line; `None` on EOF.  An error is fatal: the stream
    /// yields nothing after it.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, AnyDelimiterCodecError>> {
        match self.lines.next().await? {
            Ok(raw) => Some(Ok(Frame::decode(&raw))),
            Err(e) => Some(Err(e)),
        }
    }

    /// Close the link and wait briefly for queued output to flush.
    pub async fn finish(self) {
        self.link.close();
        let mut writer = self.writer;
        if tokio::time::timeout(FLUSH_GRACE, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lu_protocol::Message;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn lines_flow_both_ways_and_flush_on_finish() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let client = TcpStream::connect(addr).await.unwrap();
        let server = accept.await.unwrap();

        let mut conn = Connection::new(server, "peer", Duration::from_secs(1), 1024);
        let (read, mut write) = client.into_split();
        let mut peer_lines = BufReader::new(read).lines();

        write.write_all(b"hello\r\n").await.unwrap();
        assert_eq!(
            conn.next_frame().await.unwrap().unwrap(),
            Frame::Line("hello".into())
        );

        conn.link
            .send_event(&Message::event("x/started", vec![]))
            .unwrap();
        assert!(conn.link.send_keepalive());
        conn.finish().await;

        let event = peer_lines.next_line().await.unwrap().unwrap();
        assert_eq!(Message::from_wire(&event).unwrap().name, "x/started");
        assert_eq!(peer_lines.next_line().await.unwrap().unwrap(), "");
        // write half shut down after the flush
        assert!(peer_lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overlong_line_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let mut client = TcpStream::connect(addr).await.unwrap();
        let server = accept.await.unwrap();

        let mut conn = Connection::new(server, "peer", Duration::from_secs(1), 8);
        client.write_all(b"0123456789abcdef\n").await.unwrap();
        assert!(matches!(
            conn.next_frame().await,
            Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded))
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_is_one_garbled_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let mut client = TcpStream::connect(addr).await.unwrap();
        let server = accept.await.unwrap();

        let mut conn = Connection::new(server, "peer", Duration::from_secs(1), 1024);
        client.write_all(b"\xff\xfe noise\n{\"name\":\"x\"}\n").await.unwrap();
        assert!(matches!(
            conn.next_frame().await,
            Some(Ok(Frame::Garbled(text))) if text.ends_with(" noise")
        ));
        assert_eq!(
            conn.next_frame().await.unwrap().unwrap(),
            Frame::Line("{\"name\":\"x\"}".into())
        );
    }

    #[test]
    fn decode_strips_carriage_return() {
        assert_eq!(Frame::decode(b"ping\r"), Frame::Line("ping".into()));
        assert_eq!(Frame::decode(b""), Frame::Line(String::new()));
        assert!(matches!(Frame::decode(b"\xc3"), Frame::Garbled(_)));
    }
}
