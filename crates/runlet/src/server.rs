//! Mutual-TLS HTTP server.
//!
//! Each accepted TCP connection is handshaken on its own task. The client
//! certificate chain negotiated there is attached to every request of the
//! connection as a [`PeerCertificates`] extension, which the auth middleware
//! resolves to a user.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use axum::{Extension, Router};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower::Service;

use crate::auth::PeerCertificates;

/// Accept connections until `shutdown` resolves.
///
/// Connections already being served are left to finish on their own tasks.
pub async fn serve<F>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    router: Router,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let local_addr = listener.local_addr()?;
    info!("Listening on https://{}", local_addr);

    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            () = &mut shutdown => {
                info!("Stopped accepting connections on {}", local_addr);
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(serve_connection(stream, peer, acceptor, router));
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, acceptor: TlsAcceptor, router: Router) {
    let tls = match acceptor.accept(stream).await {
        Ok(tls) => tls,
        Err(e) => {
            debug!("TLS handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let certificates = PeerCertificates::new(tls.get_ref().1.peer_certificates());
    debug!(
        "Accepted connection from {} ({} client certificates)",
        peer,
        certificates.chain().map_or(0, <[_]>::len)
    );

    let app = router.layer(Extension(certificates));
    let service = service_fn(move |req: hyper::Request<Incoming>| app.clone().call(req));

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls), service)
        .await
    {
        debug!("Connection from {} closed with error: {}", peer, e);
    }
}
