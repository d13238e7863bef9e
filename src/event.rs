//! Service event stream.

use tokio::sync::broadcast;

/// Events emitted by the tip service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Maintenance service has started.
    Started,

    /// Maintenance service is shutting down.
    ShuttingDown,

    /// A verified tip was credited.
    TipCredited {
        /// New tip vote.
        tip_vote_id: String,
        /// Tipped clip variant.
        clip_variant_id: String,
        /// Amount in cents.
        amount_cents: u64,
        /// Creator share went to escrow.
        escrowed: bool,
    },

    /// A credited tip settled on chain.
    SettlementSettled {
        /// Tip vote.
        tip_vote_id: String,
        /// Transaction hash, when reported.
        transaction_hash: Option<String>,
    },

    /// A credited tip failed to settle; flagged for reconciliation.
    SettlementFailed {
        /// Tip vote.
        tip_vote_id: String,
        /// Failure description.
        error: String,
    },

    /// Expired escrow was swept to the treasury.
    FundsSwept {
        /// Funds swept.
        funds: usize,
        /// Amount in cents.
        amount_cents: u64,
    },

    /// A payout run finished.
    PayoutsProcessed {
        /// Entries paid.
        paid: usize,
        /// Entries failed.
        failed: usize,
    },

    /// Error occurred.
    Error {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving service events.
pub type ServiceEventsChannel = broadcast::Receiver<ServiceEvent>;

/// Sender for service events.
pub type ServiceEventsSender = broadcast::Sender<ServiceEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (ServiceEventsSender, ServiceEventsChannel) {
    broadcast::channel(256)
}

/// Send without caring whether anyone listens.
pub(crate) fn emit(sender: &ServiceEventsSender, event: ServiceEvent) {
    // Err only means there are no receivers
    let _ = sender.send(event);
}
