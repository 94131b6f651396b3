use std::fmt;

/// Identifies one detection request. Ids increase monotonically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    RequestInFlight(RequestId),
    /// Terminal. Reached through [`PollScheduler::cancel`].
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickDecision {
    /// Start a detection request with this id.
    Issue(RequestId),
    /// A request is already outstanding; this tick is dropped, not queued.
    Coalesced,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    Cancelled,
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    Apply,
    Discard(DiscardReason),
}

/// Gatekeeper for the polling loop: at most one detection request is ever
/// outstanding, and nothing settles after cancellation.
#[derive(Debug)]
pub struct PollScheduler {
    state: PollState,
    next_id: u64,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self {
            state: PollState::Idle,
            next_id: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == PollState::Cancelled
    }

    pub fn on_tick(&mut self) -> TickDecision {
        match self.state {
            PollState::Idle => {
                let id = RequestId(self.next_id);
                self.next_id += 1;
                self.state = PollState::RequestInFlight(id);
                TickDecision::Issue(id)
            }
            PollState::RequestInFlight(_) => TickDecision::Coalesced,
            PollState::Cancelled => TickDecision::Stopped,
        }
    }

    /// Takes back an issued request that was never dispatched.
    ///
    /// Returns `false` if `id` is not the request in flight.
    pub fn withdraw(&mut self, id: RequestId) -> bool {
        if self.state == PollState::RequestInFlight(id) {
            self.state = PollState::Idle;
            true
        } else {
            false
        }
    }

    pub fn on_settled(&mut self, id: RequestId) -> Settlement {
        match self.state {
            PollState::Cancelled => Settlement::Discard(DiscardReason::Cancelled),
            PollState::RequestInFlight(current) if current == id => {
                self.state = PollState::Idle;
                Settlement::Apply
            }
            _ => Settlement::Discard(DiscardReason::Stale),
        }
    }

    pub fn cancel(&mut self) {
        self.state = PollState::Cancelled;
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_issues() {
        let mut scheduler = PollScheduler::new();
        assert_eq!(scheduler.on_tick(), TickDecision::Issue(RequestId(0)));
        assert_eq!(scheduler.state(), PollState::RequestInFlight(RequestId(0)));
    }

    #[test]
    fn test_ticks_while_in_flight_issue_nothing() {
        let mut scheduler = PollScheduler::new();
        scheduler.on_tick();

        let issued = (0..50)
            .map(|_| scheduler.on_tick())
            .filter(|d| matches!(d, TickDecision::Issue(_)))
            .count();

        assert_eq!(issued, 0);
        assert_eq!(scheduler.state(), PollState::RequestInFlight(RequestId(0)));
    }

    #[test]
    fn test_settle_returns_to_idle_and_next_id_increases() {
        let mut scheduler = PollScheduler::new();
        let TickDecision::Issue(first) = scheduler.on_tick() else {
            panic!("expected issue");
        };
        assert_eq!(scheduler.on_settled(first), Settlement::Apply);
        assert_eq!(scheduler.state(), PollState::Idle);

        let TickDecision::Issue(second) = scheduler.on_tick() else {
            panic!("expected issue");
        };
        assert!(second > first);
    }

    #[test]
    fn test_withdraw_only_matches_in_flight_id() {
        let mut scheduler = PollScheduler::new();
        scheduler.on_tick();
        assert!(!scheduler.withdraw(RequestId(7)));
        assert!(scheduler.withdraw(RequestId(0)));
        assert_eq!(scheduler.state(), PollState::Idle);
        assert!(!scheduler.withdraw(RequestId(0)));
    }

    #[test]
    fn test_settling_unknown_id_is_stale() {
        let mut scheduler = PollScheduler::new();
        scheduler.on_tick();
        assert_eq!(
            scheduler.on_settled(RequestId(42)),
            Settlement::Discard(DiscardReason::Stale)
        );
        assert_eq!(scheduler.state(), PollState::RequestInFlight(RequestId(0)));
    }

    #[test]
    fn test_cancel_discards_in_flight_and_stops_ticks() {
        let mut scheduler = PollScheduler::new();
        scheduler.on_tick();
        scheduler.cancel();

        assert_eq!(
            scheduler.on_settled(RequestId(0)),
            Settlement::Discard(DiscardReason::Cancelled)
        );
        assert_eq!(scheduler.on_tick(), TickDecision::Stopped);
        assert!(!scheduler.withdraw(RequestId(0)));
        assert!(scheduler.is_cancelled());
    }

    #[test]
    fn test_cancel_from_idle_is_terminal() {
        let mut scheduler = PollScheduler::new();
        scheduler.cancel();
        scheduler.cancel();
        assert_eq!(scheduler.on_tick(), TickDecision::Stopped);
    }
}
