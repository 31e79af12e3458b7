//! Mock SMTP server for testing delivery scenarios
//!
//! Answers every command with a configurable reply, records what it was
//! sent, and can hang or hang up part way through a session.
//!
//! ```rust,ignore
//! let server = MockSmtpServer::builder()
//!     .with_rcpt_to_response(550, "User unknown")
//!     .build()
//!     .await?;
//!
//! // deliver to server.addr() ...
//!
//! assert!(server.commands().await.contains(&SmtpCommand::Quit));
//! ```

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    task::JoinHandle,
};

/// SMTP command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    /// Everything after `MAIL FROM:`
    MailFrom(String),
    /// Everything after `RCPT TO:`
    RcptTo(String),
    Data,
    /// The message, with dot-stuffing removed
    Message(Vec<u8>),
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct MockServerConfig {
    greeting: Reply,
    /// `None` refuses EHLO so the client has to fall back to HELO
    ehlo_capabilities: Option<Vec<String>>,
    helo: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    hang_on_command: Option<usize>,
    drop_after_commands: Option<usize>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.test ESMTP ready"),
            ehlo_capabilities: Some(vec!["mock.test".to_string(), "SIZE 10000".to_string()]),
            helo: Reply::new(250, "Hello"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end: Reply::new(250, "OK: queued"),
            hang_on_command: None,
            drop_after_commands: None,
        }
    }
}

fn ehlo_reply(capabilities: &[String]) -> Vec<u8> {
    let last = capabilities.len().saturating_sub(1);
    capabilities
        .iter()
        .enumerate()
        .map(|(i, cap)| {
            let separator = if i == last { ' ' } else { '-' };
            format!("250{separator}{cap}\r\n")
        })
        .collect::<String>()
        .into_bytes()
}

/// Mock SMTP server, stopped when dropped
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    accept_loop: JoinHandle<()>,
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every command received so far, across all connections
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut received = 0;

        writer.write_all(&config.greeting.to_bytes()).await?;

        loop {
            if config.drop_after_commands == Some(received) {
                return Ok(());
            }

            if config.hang_on_command == Some(received) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            received += 1;

            let input = line.trim_end();
            let (verb, rest) = input.split_once(' ').unwrap_or((input, ""));

            let (reply, command) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (
                    config.ehlo_capabilities.as_ref().map_or_else(
                        || Reply::new(500, "EHLO not supported").to_bytes(),
                        |caps| ehlo_reply(caps),
                    ),
                    SmtpCommand::Ehlo(rest.to_string()),
                ),
                "HELO" => (config.helo.to_bytes(), SmtpCommand::Helo(rest.to_string())),
                "MAIL" => (
                    config.mail_from.to_bytes(),
                    SmtpCommand::MailFrom(rest.trim_start_matches("FROM:").to_string()),
                ),
                "RCPT" => (
                    config.rcpt_to.to_bytes(),
                    SmtpCommand::RcptTo(rest.trim_start_matches("TO:").to_string()),
                ),
                "DATA" => (config.data.to_bytes(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    return Ok(());
                }
                _ => (
                    Reply::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(input.to_string()),
                ),
            };

            let accepts_data = command == SmtpCommand::Data && config.data.code == 354;
            commands.write().await.push(command);
            writer.write_all(&reply).await?;

            if accepts_data {
                let message = Self::read_message(&mut reader).await?;
                commands.write().await.push(SmtpCommand::Message(message));
                writer.write_all(&config.data_end.to_bytes()).await?;
            }
        }
    }

    async fn read_message<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
    where
        R: AsyncBufReadExt + Unpin,
    {
        let mut message = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return Ok(message);
            }

            if line == b".\r\n" {
                return Ok(message);
            }

            let unstuffed = if line.starts_with(b"..") {
                &line[1..]
            } else {
                &line[..]
            };
            message.extend_from_slice(unstuffed);
        }
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = Reply::new(code, message);
        self
    }

    /// Refuse EHLO, forcing a HELO fallback
    #[must_use]
    pub fn without_ehlo(mut self) -> Self {
        self.config.ehlo_capabilities = None;
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data = Reply::new(code, message);
        self
    }

    /// Reply to the end of the message (after `<CRLF>.<CRLF>`)
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = Reply::new(code, message);
        self
    }

    /// Stop answering at the Nth command (0-indexed)
    #[must_use]
    pub const fn with_timeout_on_command(mut self, index: usize) -> Self {
        self.config.hang_on_command = Some(index);
        self
    }

    /// Close the connection after N commands
    #[must_use]
    pub const fn with_network_error_after_commands(mut self, count: usize) -> Self {
        self.config.drop_after_commands = Some(count);
        self
    }

    /// Bind to a free port on 127.0.0.1 and start accepting
    ///
    /// # Errors
    ///
    /// If the listener cannot be bound
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));

        let accept_commands = Arc::clone(&commands);
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let config = Arc::clone(&config);
                let commands = Arc::clone(&accept_commands);

                tokio::spawn(async move {
                    if let Err(err) =
                        MockSmtpServer::handle_client(stream, config, commands).await
                    {
                        eprintln!("mock server client error: {err}");
                    }
                });
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands,
            accept_loop,
        })
    }
}
