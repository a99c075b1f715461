//! Frame-level WebSocket client for the terminal socket.
//!
//! Data frames are handed out one at a time, including continuation
//! fragments, so output can be written before a message is complete.

use std::io::Cursor;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::{generate_request, Response};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::handshake::machine::TryParse;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::{CloseFrame, Frame, FrameHeader};
use tokio_tungstenite::MaybeTlsStream;
use url::Url;

use crate::errors::{CloudShellError, Result};

const MAX_FRAME_SIZE: u64 = 16 << 20;
const READ_CHUNK: usize = 4096;

pub(crate) type SocketStream = MaybeTlsStream<TcpStream>;

/// Open the socket (TLS for `wss`) and run the client handshake.
///
/// Returns the stream and whatever was read past the handshake response.
pub(crate) async fn connect(socket_uri: &str) -> Result<(SocketStream, BytesMut)> {
    let url = Url::parse(socket_uri)?;
    let host = url
        .host_str()
        .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
        .ok_or_else(|| CloudShellError::TransportFault(format!("no host in {}", socket_uri)))?;
    let port = url.port_or_known_default().ok_or_else(|| {
        CloudShellError::TransportFault(format!("no port for scheme {}", url.scheme()))
    })?;

    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true)?;

    let mut stream = match url.scheme() {
        "ws" => MaybeTlsStream::Plain(tcp),
        "wss" => {
            let server_name = ServerName::try_from(host.to_string()).map_err(|_| {
                CloudShellError::TransportFault(format!("invalid server name {}", host))
            })?;
            MaybeTlsStream::Rustls(tls_connector()?.connect(server_name, tcp).await?)
        }
        other => {
            return Err(CloudShellError::TransportFault(format!(
                "unsupported socket scheme {}",
                other
            )))
        }
    };

    let leftover = handshake(&mut stream, socket_uri).await?;
    Ok((stream, leftover))
}

fn tls_connector() -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| CloudShellError::TransportFault(format!("TLS setup failed: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn handshake<S>(stream: &mut S, socket_uri: &str) -> Result<BytesMut>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (request, key) = generate_request(socket_uri.into_client_request()?)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut buffer = BytesMut::with_capacity(READ_CHUNK);
    let response = loop {
        if let Some((size, response)) = <Response as TryParse>::try_parse(&buffer[..])? {
            buffer.advance(size);
            break response;
        }
        if stream.read_buf(&mut buffer).await? == 0 {
            return Err(CloudShellError::TransportFault(
                "connection closed during handshake".to_string(),
            ));
        }
    };

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(CloudShellError::TransportFault(format!(
            "handshake rejected with status {}",
            response.status()
        )));
    }

    let expected = derive_accept_key(key.as_bytes());
    let accepted = response
        .headers()
        .get("Sec-WebSocket-Accept")
        .and_then(|value| value.to_str().ok());
    if accepted != Some(expected.as_str()) {
        return Err(CloudShellError::TransportFault(
            "handshake returned a mismatched accept key".to_string(),
        ));
    }

    log::debug!("Terminal socket handshake complete");
    Ok(buffer)
}

/// Reads frames off the socket without joining fragments
pub(crate) struct FrameReader<R> {
    stream: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(stream: R, buffered: BytesMut) -> Self {
        Self {
            stream,
            buffer: buffered,
        }
    }

    /// Next frame, or `None` once the peer has shut the stream.
    ///
    /// Cancel safe: bytes of a partially received frame stay buffered.
    pub(crate) async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.parse_buffered()? {
                return Ok(Some(frame));
            }

            self.buffer.reserve(READ_CHUNK);
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(CloudShellError::TransportFault(
                    "connection closed in the middle of a frame".to_string(),
                ));
            }
        }
    }

    fn parse_buffered(&mut self) -> Result<Option<Frame>> {
        let mut cursor = Cursor::new(&self.buffer[..]);
        let Some((header, length)) = FrameHeader::parse(&mut cursor)? else {
            return Ok(None);
        };
        let header_len = cursor.position() as usize;

        if length > MAX_FRAME_SIZE {
            return Err(CloudShellError::TransportFault(format!(
                "frame of {} bytes exceeds the {} byte limit",
                length, MAX_FRAME_SIZE
            )));
        }
        let length = length as usize;
        if self.buffer.len() < header_len + length {
            return Ok(None);
        }

        self.buffer.advance(header_len);
        let mut payload = self.buffer.split_to(length);
        if let Some(mask) = header.mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok(Some(Frame::from_payload(header, payload.freeze())))
    }
}

/// Writes masked client frames
pub(crate) struct FrameWriter<W> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub(crate) fn new(stream: W) -> Self {
        Self { stream }
    }

    pub(crate) async fn write_frame(&mut self, mut frame: Frame) -> Result<()> {
        frame.header_mut().mask = Some(rand::random());
        let mut encoded = Vec::with_capacity(frame.len());
        frame.format(&mut encoded)?;
        self.stream.write_all(&encoded).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

pub(crate) fn text_frame(text: String) -> Frame {
    Frame::message(text.into_bytes(), OpCode::Data(Data::Text), true)
}

/// Close frame carrying `code`, or an empty one when there is no status to send
pub(crate) fn close_frame(code: Option<u16>) -> Frame {
    Frame::close(code.map(|code| CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn encoded(frame: Frame) -> Vec<u8> {
        let mut bytes = Vec::new();
        frame.format(&mut bytes).unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_reader_waits_for_a_complete_frame() {
        let (mut server, client) = duplex(1024);
        let mut reader = FrameReader::new(client, BytesMut::new());

        let bytes = encoded(Frame::message(
            b"Hel".to_vec(),
            OpCode::Data(Data::Text),
            false,
        ));
        server.write_all(&bytes[..1]).await.unwrap();

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            reader.read_frame(),
        )
        .await;
        assert!(pending.is_err());

        server.write_all(&bytes[1..]).await.unwrap();
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.payload(), b"Hel");
        assert!(!frame.header().is_final);
        assert_eq!(frame.header().opcode, OpCode::Data(Data::Text));
    }

    #[tokio::test]
    async fn test_reader_starts_from_bytes_left_by_handshake() {
        let (server, client) = duplex(64);
        drop(server);

        let leftover = BytesMut::from(&encoded(Frame::message(
            b"welcome".to_vec(),
            OpCode::Data(Data::Text),
            true,
        ))[..]);
        let mut reader = FrameReader::new(client, leftover);

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.payload(), b"welcome");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_written_frames_are_masked_and_readable() {
        let (client, server) = duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, BytesMut::new());

        writer.write_frame(text_frame("ls\r".to_string())).await.unwrap();
        writer.write_frame(close_frame(Some(1000))).await.unwrap();

        let text = reader.read_frame().await.unwrap().unwrap();
        assert!(text.header().mask.is_some());
        assert_eq!(text.payload(), b"ls\r");

        let close = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(close.payload()[..2], 1000u16.to_be_bytes());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_a_fault() {
        let (mut server, client) = duplex(64);
        let mut reader = FrameReader::new(client, BytesMut::new());

        let bytes = encoded(Frame::message(
            b"partial".to_vec(),
            OpCode::Data(Data::Text),
            true,
        ));
        server.write_all(&bytes[..4]).await.unwrap();
        drop(server);

        let result = reader.read_frame().await;
        assert!(matches!(result, Err(CloudShellError::TransportFault(_))));
    }
}
