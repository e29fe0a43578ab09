//! Queue ticket sequencing and the ticket status machine.

mod service;

pub use service::TicketService;

use common::TicketStatus;
use store::Ticket;

/// Picks the ticket a queue display should show.
///
/// That is the highest-numbered called ticket, or failing that the
/// lowest-numbered waiting one. `tickets` may be in any order.
pub fn current_of(tickets: &[Ticket]) -> Option<&Ticket> {
    tickets
        .iter()
        .filter(|t| t.status == TicketStatus::Called)
        .max_by_key(|t| t.sequence_number)
        .or_else(|| {
            tickets
                .iter()
                .filter(|t| t.status == TicketStatus::Waiting)
                .min_by_key(|t| t.sequence_number)
        })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{ServiceDay, TicketId};

    use super::*;

    fn ticket(sequence_number: u32, status: TicketStatus) -> Ticket {
        Ticket {
            id: TicketId::new(),
            sequence_number,
            customer_name: None,
            status,
            service_day: ServiceDay::from_ymd(2024, 1, 1).unwrap(),
            created_at: Utc::now(),
            called_at: None,
            served_at: None,
        }
    }

    #[test]
    fn latest_called_ticket_wins() {
        let tickets = vec![
            ticket(1, TicketStatus::Served),
            ticket(3, TicketStatus::Called),
            ticket(2, TicketStatus::Called),
            ticket(4, TicketStatus::Waiting),
        ];
        assert_eq!(current_of(&tickets).map(|t| t.sequence_number), Some(3));
    }

    #[test]
    fn falls_back_to_first_waiting_ticket() {
        let tickets = vec![
            ticket(1, TicketStatus::Served),
            ticket(5, TicketStatus::Waiting),
            ticket(2, TicketStatus::Cancelled),
            ticket(4, TicketStatus::Waiting),
        ];
        assert_eq!(current_of(&tickets).map(|t| t.sequence_number), Some(4));
    }

    #[test]
    fn nothing_to_show() {
        let tickets = vec![ticket(1, TicketStatus::Served)];
        assert!(current_of(&tickets).is_none());
        assert!(current_of(&[]).is_none());
    }
}
