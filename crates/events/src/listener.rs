//! Bridge from PostgreSQL `LISTEN` to the [`ChangePublisher`].
//!
//! Notifications are only delivered while a connection is listening. When
//! the connection drops, anything sent in between is lost, so every
//! subscriber gets one [`Gap`](crate::StreamMessage::Gap) per outage and is
//! expected to re-fetch current state.

use std::time::Duration;

use ingestq_core::backoff::{Backoff, BackoffConfig};
use ingestq_core::change_events::CHANGE_CHANNEL;
use ingestq_db::DbPool;
use sqlx::postgres::PgListener;
use tokio_util::sync::CancellationToken;

use crate::change::ChangeEvent;
use crate::publisher::ChangePublisher;

/// Long-running `LISTEN ingestq_change` loop.
pub struct ChangeListener {
    pool: DbPool,
    publisher: ChangePublisher,
    backoff: BackoffConfig,
}

impl ChangeListener {
    pub fn new(pool: DbPool, publisher: ChangePublisher) -> Self {
        Self {
            pool,
            publisher,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until `cancel` fires, reconnecting with exponential backoff.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.backoff.clone());
        let mut connected_once = false;

        loop {
            match self.listen(&cancel, &mut backoff, &mut connected_once).await {
                Ok(()) => {
                    tracing::info!("Change listener stopped");
                    return;
                }
                Err(e) => {
                    // The gap is published once listening resumes.
                    let wait = backoff.next_wait();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = wait.as_millis() as u64,
                        "Change listener connection failed",
                    );
                    if !sleep_or_cancel(wait, &cancel).await {
                        return;
                    }
                }
            }
        }
    }

    /// Listen on one connection. `Ok` means cancelled, `Err` means the
    /// connection needs to be re-established.
    async fn listen(
        &self,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
        connected_once: &mut bool,
    ) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        backoff.reset();
        if *connected_once {
            // Anything committed while we were away was not delivered.
            self.publisher.publish_gap();
        }
        *connected_once = true;
        tracing::info!(channel = CHANGE_CHANNEL, "Change listener connected");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                received = listener.try_recv() => match received? {
                    Some(notification) => self.dispatch(notification.payload()),
                    None => {
                        return Err(sqlx::Error::Io(std::io::Error::new(
                            std::io::ErrorKind::ConnectionAborted,
                            "notification connection lost",
                        )));
                    }
                },
            }
        }
    }

    fn dispatch(&self, payload: &str) {
        match ChangeEvent::from_notification(payload) {
            Ok(event) => {
                let delivered = self.publisher.publish(event);
                tracing::trace!(delivered, "Change event published");
            }
            Err(e) => {
                tracing::error!(error = %e, payload, "Undecodable change notification");
            }
        }
    }
}

/// Sleep for `wait` unless cancelled first. Returns `false` on cancel.
async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(wait) => true,
    }
}
