#![allow(dead_code)] // Not every test binary uses every helper

pub mod mock_server;

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use relay_common::envelope::Envelope;
use relay_delivery::{
    BounceTemplate, Collaborators, Delivery, DeliveryConfig, DeliveryError, DnsError,
    LocalDeliverer, MailServer, MailboxDeliverer, Resolve, bounce::DEFAULT_TEMPLATE,
};
use relay_queue::{
    BlobStore, Enqueue, JobId, MemoryBroker, MessageKey, Queue, QueueError, QueuedMessage,
    RecordStore, TestBlobStore, TestRecordStore,
};
use relay_smtp::{ClientError, Dialer, Response, SmtpSession};

/// Resolver answering from fixed tables
#[derive(Debug, Default)]
pub struct FakeDns {
    pub hosts: HashMap<String, Vec<IpAddr>>,
    pub mx: HashMap<String, Vec<MailServer>>,
}

#[async_trait]
impl Resolve for FakeDns {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| DnsError::NoAddresses(host.to_string()))
    }

    async fn mail_servers(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError> {
        self.mx
            .get(domain)
            .cloned()
            .map(Arc::new)
            .ok_or_else(|| DnsError::NoMailServers(domain.to_string()))
    }
}

/// What a [`FakeDialer`] session does with a transaction
#[derive(Debug, Clone)]
pub enum Script {
    Accept,
    Reject {
        command: &'static str,
        code: u16,
        text: &'static str,
    },
    /// The connection drops mid-transaction
    Hangup,
}

/// A transaction seen by a [`FakeDialer`] session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub peer: SocketAddr,
    pub from: String,
    pub to: String,
    pub data: Vec<u8>,
}

/// Dialer that connects only from the listed local addresses and plays a
/// fixed script on every session
#[derive(Debug)]
pub struct FakeDialer {
    pub accept_from: Vec<IpAddr>,
    pub script: Script,
    pub dialed: Mutex<Vec<(IpAddr, SocketAddr)>>,
    pub sent: Arc<Mutex<Vec<Sent>>>,
}

impl FakeDialer {
    pub fn new(accept_from: Vec<IpAddr>, script: Script) -> Self {
        Self {
            accept_from,
            script,
            dialed: Mutex::default(),
            sent: Arc::default(),
        }
    }

    /// Accepts from anywhere, delivers everything
    pub fn accepting() -> Self {
        Self::new(Vec::new(), Script::Accept)
    }

    pub fn dialed(&self) -> Vec<(IpAddr, SocketAddr)> {
        self.dialed.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

struct FakeSession {
    peer: SocketAddr,
    script: Script,
    sent: Arc<Mutex<Vec<Sent>>>,
}

#[async_trait]
impl SmtpSession for FakeSession {
    fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn send(&mut self, from: &str, to: &str, data: &[u8]) -> relay_smtp::client::Result<()> {
        match &self.script {
            Script::Accept => {
                self.sent.lock().unwrap().push(Sent {
                    peer: self.peer,
                    from: from.to_string(),
                    to: to.to_string(),
                    data: data.to_vec(),
                });
                Ok(())
            }
            Script::Reject {
                command,
                code,
                text,
            } => Err(ClientError::Rejected {
                command: *command,
                reply: Response::new(*code, text.lines().map(str::to_string).collect()),
            }),
            Script::Hangup => Err(ClientError::ConnectionClosed),
        }
    }

    async fn quit(&mut self) {}
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(
        &self,
        remote: SocketAddr,
        local: IpAddr,
        _identity: &str,
        _timeout: Duration,
    ) -> relay_smtp::client::Result<Box<dyn SmtpSession>> {
        self.dialed.lock().unwrap().push((local, remote));

        if !self.accept_from.is_empty() && !self.accept_from.contains(&local) {
            return Err(ClientError::ConnectionClosed);
        }

        Ok(Box::new(FakeSession {
            peer: remote,
            script: self.script.clone(),
            sent: Arc::clone(&self.sent),
        }))
    }
}

pub fn default_template() -> BounceTemplate {
    BounceTemplate::new(DEFAULT_TEMPLATE).unwrap()
}

/// Enqueue path that is always down
#[derive(Debug, Default)]
pub struct FailingEnqueue;

#[async_trait]
impl Enqueue for FailingEnqueue {
    async fn enqueue(
        &self,
        _raw: &[u8],
        _envelope: &Envelope,
        _routing_hint: Option<&str>,
    ) -> relay_queue::Result<MessageKey> {
        Err(QueueError::Unavailable("queue offline".to_string()))
    }
}

/// Local delivery that panics for one recipient and succeeds for the rest
#[derive(Debug)]
pub struct PanickingDeliverer {
    pub rcpt: String,
    pub delivered: Mutex<Vec<String>>,
}

impl PanickingDeliverer {
    pub fn new(rcpt: &str) -> Self {
        Self {
            rcpt: rcpt.to_string(),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalDeliverer for PanickingDeliverer {
    async fn deliver(&self, message: &QueuedMessage, _body: &[u8]) -> Result<(), DeliveryError> {
        assert_ne!(message.rcpt_to, self.rcpt, "mailbox exploded");
        self.delivered.lock().unwrap().push(message.rcpt_to.clone());
        Ok(())
    }
}

/// Collaborators a test can swap in; anything unset gets the usual stand-in
#[derive(Debug, Default)]
pub struct Parts {
    pub dns: FakeDns,
    pub template: Option<BounceTemplate>,
    pub enqueue: Option<Arc<dyn Enqueue>>,
    pub local: Option<Arc<dyn LocalDeliverer>>,
}

/// A [`Delivery`] over test stores, with a real enqueue path for bounces
pub struct Harness {
    pub records: Arc<TestRecordStore>,
    pub blobs: Arc<TestBlobStore>,
    pub broker: MemoryBroker,
    pub queue: Queue,
    pub mailboxes: tempfile::TempDir,
    pub delivery: Arc<Delivery>,
}

impl Harness {
    pub fn new(config: DeliveryConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self::build(config, dialer, Parts::default())
    }

    pub fn build(config: DeliveryConfig, dialer: Arc<dyn Dialer>, parts: Parts) -> Self {
        let records = Arc::new(TestRecordStore::new());
        let blobs = Arc::new(TestBlobStore::new());
        let broker = MemoryBroker::new(Duration::from_secs(300));
        let mailboxes = tempfile::tempdir().unwrap();

        let queue = Queue::new(
            Arc::clone(&records) as Arc<dyn RecordStore>,
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
            Arc::new(broker.clone()),
        );

        let delivery = Delivery::new(
            Arc::new(config),
            parts.template.unwrap_or_else(default_template),
            Collaborators {
                records: Arc::clone(&records) as Arc<dyn RecordStore>,
                blobs: Arc::clone(&blobs) as Arc<dyn BlobStore>,
                enqueue: parts
                    .enqueue
                    .unwrap_or_else(|| Arc::new(queue.clone())),
                dialer,
                resolver: Arc::new(parts.dns),
                local: parts
                    .local
                    .unwrap_or_else(|| Arc::new(MailboxDeliverer::new(mailboxes.path()))),
            },
        );

        Self {
            records,
            blobs,
            broker,
            queue,
            mailboxes,
            delivery: Arc::new(delivery),
        }
    }

    /// Store `body` and a pending job for it, without publishing it
    pub async fn job(&self, from: &str, to: &str, body: &[u8]) -> QueuedMessage {
        let key = self.blobs.put(body).await.unwrap();
        let host = relay_common::envelope::domain_of(to).unwrap();
        let message = QueuedMessage::new(key, from, to, host);
        self.records.save(&message).await.unwrap();
        message
    }

    pub async fn save(&self, message: &QueuedMessage) {
        self.records.save(message).await.unwrap();
    }

    pub async fn record(&self, id: &JobId) -> QueuedMessage {
        self.records.lookup(id).await.unwrap()
    }

    pub async fn blob(&self, key: &MessageKey) -> String {
        String::from_utf8(self.blobs.get(key).await.unwrap()).unwrap()
    }

    /// The single job left in the store
    pub async fn only_record(&self) -> QueuedMessage {
        let mut records = self.records.records().await.unwrap();
        assert_eq!(records.len(), 1, "expected exactly one record: {records:?}");
        records.remove(0)
    }
}

/// Delivery configuration routing `example.com` through `local_ip` to
/// `remote`
pub fn routed_config(local_ip: &str, remote: &str) -> DeliveryConfig {
    routed_config_with_port(local_ip, remote, 25)
}

pub fn routed_config_with_port(local_ip: &str, remote: &str, port: u16) -> DeliveryConfig {
    let config = format!(
        r#"(
            me: "relay.test",
            local_domains: ["relay.test"],
            dial_timeout_secs: 5,
            routes: {{
                "example.com": [
                    (local_ip: "{local_ip}", remote_host: "{remote}", remote_port: {port}),
                ],
            }},
        )"#
    );
    ron::from_str(&config).unwrap()
}
