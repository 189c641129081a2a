//! TimerService trait - one-shot delayed flush requests

use std::time::Duration;

use crate::{ContractError, FlushRequest};

/// Schedules a one-shot wake-up for a key.
///
/// Each accepted request is delivered exactly once, no earlier than `delay`
/// after scheduling. There is no upper bound on lateness and no cancellation:
/// consumers must treat every delivery as possibly stale.
#[trait_variant::make(TimerService: Send)]
pub trait LocalTimerService {
    async fn schedule(&self, request: FlushRequest, delay: Duration)
        -> Result<(), ContractError>;
}
