//! Delivery over SMTP to another host

use relay_common::internal;
use relay_smtp::ClientError;

use super::Job;
use crate::error::{DeliveryError, TemporaryError, handle_smtp_error};

impl Job<'_> {
    /// Pick a route, open a session and run the transaction
    ///
    /// Rejections are classified from the server's reply, anything that went
    /// wrong below the reply level is a temporary failure.
    pub(super) async fn deliver_remote(&self) -> Result<(), DeliveryError> {
        let resolver = &self.delivery.routes;
        let record = &self.record;

        let routes = resolver
            .routes(record.routing_hint.as_deref(), &record.host)
            .await
            .map_err(TemporaryError::Route)?;
        let (mut session, route) = resolver
            .connect(&routes)
            .await
            .map_err(TemporaryError::Route)?;

        let remote = session.peer().ip();
        internal!(
            level = DEBUG,
            job_id = %record.id,
            "Connected to {} via {} (local {})",
            session.peer(),
            route.remote_host,
            route.local_ip
        );

        let body = self.body.as_deref().unwrap_or_default();
        let result = session.send(&record.mail_from, &record.rcpt_to, body).await;

        match result {
            Ok(()) => {
                session.quit().await;
                Ok(())
            }
            Err(ClientError::Rejected { command, reply }) => {
                internal!(level = DEBUG, job_id = %record.id, "{command} rejected by {remote}: {reply}");
                session.quit().await;
                Err(handle_smtp_error(&reply.first_line(), remote))
            }
            Err(ClientError::ParseError(reason)) => Err(TemporaryError::Smtp(reason).into()),
            Err(err) => Err(TemporaryError::Smtp(format!("remote {remote}: {err}")).into()),
        }
    }
}
