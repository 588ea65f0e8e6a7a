//! Connection transport shared by the IMAP and SMTP servers.
//!
//! A connection starts plain and may be upgraded in place by STARTTLS, or
//! arrive already encrypted on an implicit-TLS listener. Sessions only
//! ever see this enum, so command handling is identical either way.

use crate::security::TlsConfig;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

pub enum MailStream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
    /// Temporary state during STARTTLS upgrade - should never be observable
    Upgrading,
}

impl MailStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, MailStream::Tls(_))
    }

    /// Run the TLS handshake over the underlying TCP stream, replacing
    /// `self` in place. Any buffered reader over the old stream must be
    /// dropped first; bytes it held came from the plaintext phase and
    /// must not leak into the encrypted one.
    pub async fn upgrade(&mut self, tls: &TlsConfig) -> std::io::Result<()> {
        let tcp_stream = match std::mem::replace(self, MailStream::Upgrading) {
            MailStream::Plain(tcp) => tcp,
            other => {
                *self = other;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "stream is not plain",
                ));
            }
        };
        let tls_stream = tls.acceptor().accept(tcp_stream).await?;
        *self = MailStream::Tls(tls_stream);
        Ok(())
    }
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MailStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            MailStream::Upgrading => panic!("Attempted I/O on MailStream during STARTTLS upgrade"),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MailStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            MailStream::Upgrading => panic!("Attempted I/O on MailStream during STARTTLS upgrade"),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MailStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
            MailStream::Upgrading => panic!("Attempted I/O on MailStream during STARTTLS upgrade"),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MailStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            MailStream::Upgrading => panic!("Attempted I/O on MailStream during STARTTLS upgrade"),
        }
    }
}
