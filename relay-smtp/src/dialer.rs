//! Opening outbound SMTP sessions from a chosen source address.

use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use relay_common::internal;
use tokio::net::{TcpSocket, TcpStream};

use crate::{
    client::{ClientError, Response, Result, SmtpClient},
    timeouts::SmtpTimeouts,
};

/// An open, greeted SMTP session ready for a mail transaction
#[async_trait]
pub trait SmtpSession: Send {
    /// The remote address this session is connected to
    fn peer(&self) -> SocketAddr;

    /// Run one MAIL FROM / RCPT TO / DATA transaction
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] carrying the server's reply when a command is
    /// refused, any other variant for I/O failures and timeouts
    async fn send(&mut self, from: &str, to: &str, data: &[u8]) -> Result<()>;

    /// Say goodbye. Failures are logged and otherwise ignored.
    async fn quit(&mut self);
}

/// Opens SMTP sessions
#[async_trait]
pub trait Dialer: Send + Sync + std::fmt::Debug {
    /// Connect from `local` to `remote` within `timeout`, read the greeting
    /// and introduce ourselves as `identity`
    ///
    /// # Errors
    ///
    /// If binding, connecting or the greeting exchange fails
    async fn dial(
        &self,
        remote: SocketAddr,
        local: IpAddr,
        identity: &str,
        timeout: Duration,
    ) -> Result<Box<dyn SmtpSession>>;
}

/// Run `command` under `timeout`, turning a refusal into [`ClientError::Rejected`]
async fn expect(
    command: &'static str,
    timeout: Duration,
    accept: fn(&Response) -> bool,
    exchange: impl Future<Output = Result<Response>> + Send,
) -> Result<Response> {
    let reply = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| ClientError::Timeout(command.to_string()))??;

    if accept(&reply) {
        Ok(reply)
    } else {
        Err(ClientError::Rejected { command, reply })
    }
}

/// Dials plain TCP, binding the socket to the requested source address
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    timeouts: SmtpTimeouts,
}

impl TcpDialer {
    #[must_use]
    pub const fn new(timeouts: SmtpTimeouts) -> Self {
        Self { timeouts }
    }

    async fn connect(remote: SocketAddr, local: IpAddr) -> Result<TcpStream> {
        let socket = match remote {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }?;

        socket.set_nodelay(true)?;
        socket.bind(SocketAddr::new(local, 0))?;

        Ok(socket.connect(remote).await?)
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self, identity, timeout))]
    async fn dial(
        &self,
        remote: SocketAddr,
        local: IpAddr,
        identity: &str,
        timeout: Duration,
    ) -> Result<Box<dyn SmtpSession>> {
        let stream = tokio::time::timeout(timeout, Self::connect(remote, local))
            .await
            .map_err(|_| ClientError::Timeout(format!("connect {local} -> {remote}")))??;

        let mut client = SmtpClient::new(stream);
        let ehlo_timeout = self.timeouts.ehlo();

        expect(
            "greeting",
            ehlo_timeout,
            Response::is_success,
            client.read_greeting(),
        )
        .await?;

        let ehlo = tokio::time::timeout(ehlo_timeout, client.ehlo(identity))
            .await
            .map_err(|_| ClientError::Timeout("EHLO".to_string()))??;

        if !ehlo.is_success() {
            internal!(
                level = DEBUG,
                "{remote} refused EHLO ({ehlo}), falling back to HELO"
            );
            expect(
                "HELO",
                ehlo_timeout,
                Response::is_success,
                client.helo(identity),
            )
            .await?;
        }

        Ok(Box::new(TcpSession {
            client,
            peer: remote,
            timeouts: self.timeouts.clone(),
        }))
    }
}

struct TcpSession {
    client: SmtpClient<TcpStream>,
    peer: SocketAddr,
    timeouts: SmtpTimeouts,
}

#[async_trait]
impl SmtpSession for TcpSession {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&mut self, from: &str, to: &str, data: &[u8]) -> Result<()> {
        let client = &mut self.client;

        expect(
            "MAIL FROM",
            self.timeouts.mail_from(),
            Response::is_success,
            client.mail_from(from),
        )
        .await?;

        expect(
            "RCPT TO",
            self.timeouts.rcpt_to(),
            Response::is_success,
            client.rcpt_to(to),
        )
        .await?;

        expect(
            "DATA",
            self.timeouts.data(),
            Response::is_intermediate,
            client.data(),
        )
        .await?;

        expect(
            "message data",
            self.timeouts.data(),
            Response::is_success,
            client.send_data(data),
        )
        .await?;

        Ok(())
    }

    async fn quit(&mut self) {
        match tokio::time::timeout(self.timeouts.quit(), self.client.quit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => internal!(level = DEBUG, "QUIT to {} failed: {err}", self.peer),
            Err(_) => internal!(level = DEBUG, "QUIT to {} timed out", self.peer),
        }
    }
}
