//! Ticket issuing and status changes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{ServiceDay, TicketId, TicketStatus};
use store::{PosStore, StoreError, Ticket, UnitOfWork};

use super::current_of;
use crate::clock::{Clock, ServiceCalendar, SystemClock};
use crate::config::{EngineConfig, MIN_TICKET_ATTEMPTS, TransitionPolicy};
use crate::error::{DomainError, Result};
use crate::order::non_blank;
use crate::unit_of_work::settle;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(10);

/// Service issuing queue tickets and moving them through their lifecycle.
pub struct TicketService<S: PosStore> {
    store: S,
    clock: Arc<dyn Clock>,
    calendar: ServiceCalendar,
    max_attempts: u32,
    backoff: Duration,
    policy: TransitionPolicy,
}

impl<S: PosStore> TicketService<S> {
    /// Creates a ticket service with default settings and the system clock.
    pub fn new(store: S) -> Self {
        Self::with_config(store, &EngineConfig::default(), Arc::new(SystemClock))
    }

    pub fn with_config(store: S, config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            calendar: config.calendar,
            max_attempts: config.ticket_max_attempts.max(MIN_TICKET_ATTEMPTS),
            backoff: DEFAULT_BACKOFF,
            policy: config.transition_policy,
        }
    }

    /// Sets the base delay between sequencing attempts.
    ///
    /// Attempt `n` waits `n * backoff` before retrying.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the service day the current instant belongs to.
    pub fn today(&self) -> ServiceDay {
        self.calendar.service_day(self.clock.now())
    }

    /// Issues the next ticket of `service_day`.
    ///
    /// Numbers start at 1 and have no gaps. A number taken by a concurrent
    /// issuer, or any other storage failure except a missing row, is retried
    /// with a fresh number until the attempt budget runs out, which yields
    /// the retryable [`DomainError::SequenceExhausted`].
    #[tracing::instrument(skip(self))]
    pub async fn issue_ticket(
        &self,
        service_day: ServiceDay,
        customer_name: Option<&str>,
    ) -> Result<Ticket> {
        let customer_name = non_blank(customer_name);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_issue(service_day, customer_name.clone()).await {
                Ok(ticket) => {
                    metrics::counter!("tickets_issued_total").increment(1);
                    tracing::info!(
                        ticket_id = %ticket.id,
                        sequence_number = ticket.sequence_number,
                        "ticket issued"
                    );
                    return Ok(ticket);
                }
                Err(DomainError::Store(err)) if !matches!(err, StoreError::NotFound { .. }) => {
                    if attempt >= self.max_attempts {
                        tracing::error!(attempt, error = %err, "ticket sequencing gave up");
                        return Err(DomainError::SequenceExhausted {
                            service_day,
                            attempts: attempt,
                            last_error: err,
                        });
                    }
                    metrics::counter!("ticket_sequence_retries_total").increment(1);
                    tracing::warn!(attempt, error = %err, "ticket sequencing failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Issues the next ticket of the current service day.
    pub async fn issue_ticket_now(&self, customer_name: Option<&str>) -> Result<Ticket> {
        self.issue_ticket(self.today(), customer_name).await
    }

    async fn try_issue(
        &self,
        service_day: ServiceDay,
        customer_name: Option<String>,
    ) -> Result<Ticket> {
        let mut uow = self.store.begin().await?;
        let result =
            Self::insert_next(uow.as_mut(), service_day, customer_name, self.clock.now()).await;
        settle(uow, result).await
    }

    async fn insert_next(
        uow: &mut dyn UnitOfWork,
        service_day: ServiceDay,
        customer_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Ticket> {
        let sequence_number = uow.next_ticket_number(service_day).await?;
        let ticket = Ticket {
            id: TicketId::new(),
            sequence_number,
            customer_name,
            status: TicketStatus::Waiting,
            service_day,
            created_at: now,
            called_at: None,
            served_at: None,
        };
        uow.insert_ticket(&ticket).await?;
        Ok(ticket)
    }

    /// Moves a ticket to `status`.
    ///
    /// Entering `Called` stamps `called_at`, entering `Served` stamps
    /// `served_at`; other moves leave both timestamps alone.
    #[tracing::instrument(skip(self))]
    pub async fn set_ticket_status(&self, ticket_id: TicketId, status: TicketStatus) -> Result<Ticket> {
        let mut uow = self.store.begin().await?;
        let result = self.transition(uow.as_mut(), ticket_id, status).await;
        let ticket = settle(uow, result).await?;

        metrics::counter!("ticket_status_changes_total", "status" => status.as_str()).increment(1);
        tracing::info!(%ticket_id, %status, "ticket status changed");
        Ok(ticket)
    }

    async fn transition(
        &self,
        uow: &mut dyn UnitOfWork,
        ticket_id: TicketId,
        status: TicketStatus,
    ) -> Result<Ticket> {
        let mut ticket = uow
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Ticket", ticket_id))?;

        let from = ticket.status;
        if !self.policy.permits(from.can_transition_to(status)) {
            tracing::warn!(%ticket_id, %from, to = %status, "rejected ticket transition");
            return Err(DomainError::InvalidTransition {
                entity: "ticket",
                from: from.to_string(),
                to: status.to_string(),
            });
        }

        let now = self.clock.now();
        match status {
            TicketStatus::Called => ticket.called_at = Some(now),
            TicketStatus::Served => ticket.served_at = Some(now),
            TicketStatus::Waiting | TicketStatus::Cancelled => {}
        }
        ticket.status = status;

        uow.update_ticket(&ticket).await?;
        Ok(ticket)
    }

    /// Returns the tickets of `service_day` in queue order.
    #[tracing::instrument(skip(self))]
    pub async fn queue_for_day(&self, service_day: ServiceDay) -> Result<Vec<Ticket>> {
        Ok(self.store.tickets_for_day(service_day).await?)
    }

    /// Returns the ticket a queue display should show for `service_day`.
    ///
    /// See [`current_of`](super::current_of).
    #[tracing::instrument(skip(self))]
    pub async fn current_ticket(&self, service_day: ServiceDay) -> Result<Option<Ticket>> {
        let tickets = self.store.tickets_for_day(service_day).await?;
        Ok(current_of(&tickets).cloned())
    }
}
