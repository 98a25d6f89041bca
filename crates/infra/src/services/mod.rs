//! Ledger services: the operations callers invoke.
//!
//! Services resolve collaborator data (registries), hand commands to the
//! [`LedgerStore`](crate::ledger_store::LedgerStore), and publish notices after
//! a commit. They hold no state of their own.

pub mod error;
pub mod generator;
pub mod obligations;
pub mod query;
pub mod settlement;

use tracing::{debug, warn};

use mutua_dues::ObligationCommand;

use crate::ledger_store::{Committed, LedgerStore, StoreError};

pub use error::{ErrorBody, LedgerError};
pub use generator::{DueGenerator, GenerationReport, LineageDueRequest};
pub use obligations::{AmendRequest, CreateKind, CreateObligation, ObligationService};
pub use query::{
    Arrears, BalanceLine, EntityBalance, GlobalTotals, GroupBalance, LedgerQueryService,
    MemberStatement, MonthlyTotals, Period, StatusBreakdown, TotalsFilter,
};
pub use settlement::{BatchOutcome, BatchRejection, SettlementOutcome, SettlementService};

/// Run a command, retrying exactly once on lock contention.
pub(crate) async fn execute_with_retry<S>(store: &S, command: ObligationCommand) -> Result<Committed, LedgerError>
where
    S: LedgerStore + ?Sized,
{
    let result = match store.execute(command.clone()).await {
        Err(StoreError::Concurrency(first)) => {
            warn!(
                obligation_id = %command.obligation_id(),
                command = command.name(),
                error = %first,
                "lock contention, retrying once"
            );
            store.execute(command.clone()).await
        }
        other => other,
    };

    result.map_err(|err| {
        let err = LedgerError::from(err);
        if err.is_client_error() {
            debug!(
                obligation_id = %command.obligation_id(),
                command = command.name(),
                code = err.code(),
                "command rejected"
            );
        }
        err
    })
}
