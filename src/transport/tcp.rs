use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::{RequestHandler, Transport, TransportError};
use crate::common::PeerAddr;
use crate::wire::codec::{read_frame, write_frame, CodecError};
use crate::wire::{Request, Response};

/// Connection-per-call TCP transport framed with the wire codec.
///
/// Consensus traffic is sparse (a handful of small messages per election),
/// so a fresh connection per request keeps the transport stateless; the
/// whole connect/write/read exchange shares one deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(
        &self,
        target: &PeerAddr,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let exchange = async {
            let mut stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
            write_frame(&mut stream, &request).await?;
            let response: Response = read_frame(&mut stream).await?;
            Ok::<Response, TransportError>(response)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(target.clone())),
        }
    }
}

/// Accept loop feeding framed requests into a `RequestHandler`.
pub struct RpcServer {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    pub async fn bind(
        addr: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler).await {
                                debug!("connection from {peer} closed: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept failed: {e}");
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn RequestHandler>,
) -> Result<(), TransportError> {
    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(request) => request,
            // Clean close between frames.
            Err(CodecError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(())
            }
            Err(e) => return Err(e.into()),
        };

        let response = handler.handle(request).await?;
        write_frame(&mut stream, &response).await?;
    }
}
