//! Idle-connection enforcement.
//!
//! Connections with no read or write activity within the configured window are closed,
//! because a connection that has gone quiet for that long is usually broken rather than
//! merely slow.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, Sleep};

/// A TCP listener that wraps every accepted connection in an [`IdleStream`].
#[derive(Debug)]
pub struct IdleListener {
    inner: TcpListener,
    idle_time: Option<Duration>,
}

impl IdleListener {
    /// Wraps a listener; an `idle_time` of zero disables enforcement.
    pub fn new(inner: TcpListener, idle_time: Duration) -> Self {
        Self {
            inner,
            idle_time: (idle_time > Duration::ZERO).then_some(idle_time),
        }
    }
}

/// [`Connected`](axum::extract::connect_info::Connected) wrapper for [`IdleListener`]'s
/// connection address, since `axum` only implements `Connected` for its own listener types.
#[derive(Clone, Copy, Debug)]
pub struct SocketAddrConnectInfo(pub SocketAddr);

impl axum::extract::connect_info::Connected<axum::serve::IncomingStream<'_, IdleListener>>
    for SocketAddrConnectInfo
{
    fn connect_info(stream: axum::serve::IncomingStream<'_, IdleListener>) -> Self {
        SocketAddrConnectInfo(*stream.remote_addr())
    }
}

impl axum::serve::Listener for IdleListener {
    type Io = IdleStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => return (IdleStream::new(stream, self.idle_time), addr),
                Err(error) => {
                    // Accept errors are transient (EMFILE and friends); pause and retry.
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        "failed to accept connection"
                    );
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// A byte stream that errors out once it has seen no activity for the idle window.
///
/// Every completed read or write pushes the deadline out; the timer is only armed while
/// the stream is actually waiting on the peer.
#[derive(Debug)]
pub struct IdleStream<S> {
    inner: S,
    idle_time: Option<Duration>,
    timer: Option<Pin<Box<Sleep>>>,
}

impl<S> IdleStream<S> {
    /// Wraps a stream; `None` disables idle enforcement.
    pub fn new(inner: S, idle_time: Option<Duration>) -> Self {
        let timer = idle_time.map(|idle| Box::pin(tokio::time::sleep(idle)));
        Self {
            inner,
            idle_time,
            timer,
        }
    }

    fn touch(&mut self) {
        if let (Some(idle), Some(timer)) = (self.idle_time, self.timer.as_mut()) {
            timer.as_mut().reset(Instant::now() + idle);
        }
    }

    fn check_idle(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if let Some(timer) = self.timer.as_mut() {
            if timer.as_mut().poll(cx).is_ready() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection idle for too long",
                ));
            }
        }
        Ok(())
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for IdleStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.touch();
                Poll::Ready(result)
            }
            Poll::Pending => {
                this.check_idle(cx)?;
                Poll::Pending
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for IdleStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.touch();
                Poll::Ready(result)
            }
            Poll::Pending => {
                this.check_idle(cx)?;
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
