//! Post-commit notices and their fan-out.
//!
//! Services publish a [`LedgerNotice`] on the process-wide bus strictly after
//! the ledger write committed. A [`NotificationBroadcaster`] owned by the
//! surrounding application drains the bus on its own thread and hands every
//! notice to a [`NoticeSink`]. Nothing on this path can affect ledger state.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mutua_core::{Amount, DeathId, ObligationId, PaymentId};
use mutua_dues::{EntityRef, KindTag, ObligationStatus, PaymentMode};
use mutua_events::{Event, EventBus, EventEnvelope, Subscription};

pub type NoticeEnvelope = EventEnvelope<LedgerNotice>;

/// What the ledger tells the outside world after a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerNotice {
    PaymentRecorded {
        obligation_id: ObligationId,
        payment_id: PaymentId,
        amount: Amount,
        reference: String,
        mode: PaymentMode,
        amount_remaining: Amount,
        status: ObligationStatus,
        liable: Vec<EntityRef>,
        occurred_at: DateTime<Utc>,
    },
    /// The payment that brought the remaining balance to zero.
    ObligationSettled {
        obligation_id: ObligationId,
        kind: KindTag,
        amount_owed: Amount,
        motif: String,
        liable: Vec<EntityRef>,
        occurred_at: DateTime<Utc>,
    },
    DuesGenerated {
        death_id: DeathId,
        kind: KindTag,
        created: usize,
        total_amount: Amount,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for LedgerNotice {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerNotice::PaymentRecorded { .. } => "ledger.payment.recorded",
            LedgerNotice::ObligationSettled { .. } => "ledger.obligation.settled",
            LedgerNotice::DuesGenerated { .. } => "ledger.dues.generated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerNotice::PaymentRecorded { occurred_at, .. }
            | LedgerNotice::ObligationSettled { occurred_at, .. }
            | LedgerNotice::DuesGenerated { occurred_at, .. } => *occurred_at,
        }
    }
}

impl LedgerNotice {
    /// Wrap into an envelope keyed by the record the notice is about.
    ///
    /// `sequence` is the obligation version after the commit (0 for generation notices).
    pub fn into_envelope(self, sequence: u64) -> NoticeEnvelope {
        let (aggregate_id, aggregate_type): (Uuid, &str) = match &self {
            LedgerNotice::PaymentRecorded { obligation_id, .. }
            | LedgerNotice::ObligationSettled { obligation_id, .. } => {
                (*obligation_id.as_uuid(), "obligation")
            }
            LedgerNotice::DuesGenerated { death_id, .. } => (*death_id.as_uuid(), "death"),
        };
        EventEnvelope::wrap(aggregate_id, aggregate_type, sequence, self)
    }
}

/// Publish after a commit. A failure becomes a warning, never an error.
pub(crate) fn publish_best_effort<B>(bus: &B, notice: NoticeEnvelope, warnings: &mut Vec<String>)
where
    B: EventBus<NoticeEnvelope> + ?Sized,
{
    let event_type = notice.event_type().to_string();
    let aggregate_id = notice.aggregate_id();
    match bus.publish(notice) {
        Ok(()) => debug!(event_type = %event_type, aggregate_id = %aggregate_id, "notice published"),
        Err(err) => {
            warn!(
                event_type = %event_type,
                aggregate_id = %aggregate_id,
                error = %err,
                "failed to publish ledger notice"
            );
            warnings.push(format!("notification {event_type} was not published: {err}"));
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Outbound transport for notices (SMS, e-mail, websocket, ...).
pub trait NoticeSink: Send {
    fn deliver(&mut self, notice: &NoticeEnvelope) -> Result<(), SinkError>;
}

impl<F> NoticeSink for F
where
    F: FnMut(&NoticeEnvelope) -> Result<(), SinkError> + Send,
{
    fn deliver(&mut self, notice: &NoticeEnvelope) -> Result<(), SinkError> {
        self(notice)
    }
}

/// Writes every notice to the log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNoticeSink;

impl NoticeSink for LoggingNoticeSink {
    fn deliver(&mut self, notice: &NoticeEnvelope) -> Result<(), SinkError> {
        let payload = serde_json::to_string(notice.payload())?;
        info!(
            event_type = notice.event_type(),
            aggregate_id = %notice.aggregate_id(),
            payload = %payload,
            "ledger notice"
        );
        Ok(())
    }
}

/// Background thread fanning bus notices out to a sink.
#[derive(Debug)]
pub struct NotificationBroadcaster {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl NotificationBroadcaster {
    /// Subscribe to `bus` and start delivering to `sink`.
    ///
    /// Only notices published after this call are delivered.
    pub fn spawn<B, S>(bus: &B, sink: S) -> std::io::Result<Self>
    where
        B: EventBus<NoticeEnvelope> + ?Sized,
        S: NoticeSink + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let subscription = bus.subscribe();

        let join = thread::Builder::new()
            .name("ledger-notices".to_string())
            .spawn(move || broadcast_loop(subscription, shutdown_rx, sink))?;

        Ok(Self {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// Stop after the notice in flight and wait for the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn broadcast_loop<S: NoticeSink>(
    subscription: Subscription<NoticeEnvelope>,
    shutdown_rx: mpsc::Receiver<()>,
    mut sink: S,
) {
    let tick = Duration::from_millis(100);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.recv_timeout(tick) {
            Ok(notice) => {
                if let Err(err) = sink.deliver(&notice) {
                    warn!(
                        event_type = notice.event_type(),
                        aggregate_id = %notice.aggregate_id(),
                        error = %err,
                        "notice delivery failed"
                    );
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
