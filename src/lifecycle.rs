//! Pure decision logic for order and payment transitions.
//!
//! Nothing in here touches the database. The store builds its conditional
//! UPDATE predicates from `legal_sources`, so the validation below executes
//! inside the same atomic statement as the write.

use crate::models::{OrderStatus, PaymentMethod};

use OrderStatus::*;

impl OrderStatus {
    /// Statuses this order may move to next. Terminal states return an
    /// empty slice.
    pub fn next_allowed(self) -> &'static [OrderStatus] {
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Preparing, Cancelled],
            Preparing => &[Ready],
            Ready => &[PickedUp],
            PickedUp => &[Delivered],
            Delivered | Cancelled => &[],
        }
    }

    pub fn can_transition(self, to: OrderStatus) -> bool {
        self.next_allowed().contains(&to)
    }

    /// Inverse view of the graph: the statuses from which `to` is legally
    /// reachable. Cancellation stops once preparation has started.
    pub fn legal_sources(to: OrderStatus) -> &'static [OrderStatus] {
        match to {
            Pending => &[],
            Confirmed => &[Pending],
            Preparing => &[Confirmed],
            Ready => &[Preparing],
            PickedUp => &[Ready],
            Delivered => &[PickedUp],
            Cancelled => &[Pending, Confirmed],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next_allowed().is_empty()
    }
}

/// Whether `paid` is a legal payment state given the order's current status.
///
/// Cash changes hands at the door, so a cash order is only paid once it is
/// delivered. Card captures happen up front, but never before the order is
/// confirmed; the store advances pending orders to confirmed in the same
/// statement that marks them paid, which keeps this gate satisfiable.
pub fn paid_allowed(method: PaymentMethod, status: OrderStatus) -> bool {
    match method {
        PaymentMethod::Cash => status == Delivered,
        PaymentMethod::Card => !matches!(status, Pending),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 7] = [
        Pending, Confirmed, Preparing, Ready, PickedUp, Delivered, Cancelled,
    ];

    #[test]
    fn graph_matches_fulfillment_path() {
        assert!(Pending.can_transition(Confirmed));
        assert!(Confirmed.can_transition(Preparing));
        assert!(Preparing.can_transition(Ready));
        assert!(Ready.can_transition(PickedUp));
        assert!(PickedUp.can_transition(Delivered));
    }

    #[test]
    fn no_skips_or_backward_moves() {
        assert!(!Pending.can_transition(Ready));
        assert!(!Pending.can_transition(Preparing));
        assert!(!Confirmed.can_transition(Ready));
        assert!(!Preparing.can_transition(PickedUp));
        assert!(!Ready.can_transition(Delivered));
        for status in ALL {
            assert!(!status.can_transition(Pending), "{status} -> pending");
        }
        assert!(!Ready.can_transition(Confirmed));
        assert!(!Delivered.can_transition(PickedUp));
    }

    #[test]
    fn cancellation_only_before_preparation() {
        assert!(Pending.can_transition(Cancelled));
        assert!(Confirmed.can_transition(Cancelled));
        assert!(!Preparing.can_transition(Cancelled));
        assert!(!Ready.can_transition(Cancelled));
        assert!(!PickedUp.can_transition(Cancelled));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(Delivered.is_terminal());
        assert!(Cancelled.is_terminal());
        for to in ALL {
            assert!(!Delivered.can_transition(to));
            assert!(!Cancelled.can_transition(to));
        }
    }

    #[test]
    fn legal_sources_is_the_inverse_of_next_allowed() {
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition(to),
                    OrderStatus::legal_sources(to).contains(&from),
                    "disagreement on {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn cash_is_paid_only_at_handoff() {
        assert!(paid_allowed(PaymentMethod::Cash, Delivered));
        for status in [Pending, Confirmed, Preparing, Ready, PickedUp, Cancelled] {
            assert!(!paid_allowed(PaymentMethod::Cash, status), "cash paid at {status}");
        }
    }

    #[test]
    fn card_capture_requires_a_confirmed_order() {
        assert!(!paid_allowed(PaymentMethod::Card, Pending));
        assert!(paid_allowed(PaymentMethod::Card, Confirmed));
        assert!(paid_allowed(PaymentMethod::Card, Preparing));
        assert!(paid_allowed(PaymentMethod::Card, Delivered));
    }
}
