pub mod codec;
mod content;
mod controller;
pub mod error;
pub mod lock;
pub mod memory;
mod middleware;
mod mkcol;
pub mod propfind;
pub mod property;
pub mod proppatch;
mod relocate;
pub mod resource;
pub mod services;
pub mod standard;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use hyper::rt::{Read, Write};
use hyper::server::conn::http1 as http;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use rustls_pemfile::{certs, private_key};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;

use oriel_user::config::{DavConfig, DavUnsecureConfig};
use oriel_user::login::ArcLoginProvider;

pub use controller::Controller;
pub use services::DavContext;

pub struct Server {
    bind_addr: SocketAddr,
    login_provider: ArcLoginProvider,
    context: DavContext,
    tls: Option<TlsAcceptor>,
}

pub fn new_unsecure(
    config: DavUnsecureConfig,
    login: ArcLoginProvider,
    context: DavContext,
) -> Server {
    Server {
        bind_addr: config.bind_addr,
        login_provider: login,
        context,
        tls: None,
    }
}

pub fn new(config: DavConfig, login: ArcLoginProvider, context: DavContext) -> Result<Server> {
    let loaded_certs = certs(&mut std::io::BufReader::new(std::fs::File::open(
        &config.certs,
    )?))
    .collect::<Result<Vec<_>, _>>()?;
    let loaded_key = private_key(&mut std::io::BufReader::new(std::fs::File::open(
        &config.key,
    )?))?
    .ok_or_else(|| anyhow!("no private key found in {}", config.key.display()))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(loaded_certs, loaded_key)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    Ok(Server {
        bind_addr: config.bind_addr,
        login_provider: login,
        context,
        tls: Some(acceptor),
    })
}

trait Stream: Read + Write + Send + Unpin {}
impl<T: Unpin + AsyncRead + AsyncWrite + Send> Stream for TokioIo<T> {}

impl Server {
    pub async fn run(self, must_exit: watch::Receiver<bool>) -> Result<()> {
        let tcp = TcpListener::bind(self.bind_addr).await?;
        self.serve(tcp, must_exit).await
    }

    /// Serve connections accepted on an already bound listener until
    /// `must_exit` turns true, then drain the open connections.
    pub async fn serve(self, tcp: TcpListener, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("DAV server listening on {:#}", tcp.local_addr()?);

        let mut connections = FuturesUnordered::new();
        while !*must_exit.borrow() {
            let wait_conn_finished = async {
                if connections.is_empty() {
                    futures::future::pending().await
                } else {
                    connections.next().await
                }
            };
            let (socket, remote_addr) = tokio::select! {
                a = tcp.accept() => a?,
                _ = wait_conn_finished => continue,
                _ = must_exit.changed() => continue,
            };
            tracing::info!("Accepted connection from {}", remote_addr);
            let stream = match self.build_stream(socket).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(err=?e, "TLS acceptor failed");
                    continue;
                }
            };

            let login = self.login_provider.clone();
            let context = self.context.clone();
            let conn = tokio::spawn(async move {
                match http::Builder::new()
                    .serve_connection(
                        stream,
                        service_fn(|req: Request<hyper::body::Incoming>| {
                            let login = login.clone();
                            let context = context.clone();
                            tracing::info!("{:?} {:?}", req.method(), req.uri());
                            async move {
                                let resp = match middleware::auth(login, req, |principal, request| {
                                    async move { Controller::route(context, Some(principal), request).await }
                                        .boxed()
                                })
                                .await
                                {
                                    Ok(v) => v,
                                    Err(e) => {
                                        tracing::error!(err=?e, "internal error");
                                        codec::rejection(
                                            hyper::StatusCode::INTERNAL_SERVER_ERROR,
                                            "Internal error",
                                        )
                                    }
                                };
                                Ok::<_, std::convert::Infallible>(resp)
                            }
                        }),
                    )
                    .await
                {
                    Err(e) => tracing::warn!(err=?e, "connection failed"),
                    Ok(()) => tracing::trace!("connection terminated with success"),
                }
            });
            connections.push(conn);
        }
        drop(tcp);

        tracing::info!("Server shutting down, draining remaining connections...");
        while connections.next().await.is_some() {}

        Ok(())
    }

    async fn build_stream(&self, socket: TcpStream) -> Result<Box<dyn Stream>> {
        match self.tls.clone() {
            Some(acceptor) => {
                let stream = acceptor.accept(socket).await?;
                Ok(Box::new(TokioIo::new(stream)))
            }
            None => Ok(Box::new(TokioIo::new(socket))),
        }
    }
}
