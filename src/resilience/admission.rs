//! Circuit breaker admission and result recording.
//!
//! # Responsibilities
//! - Refuse calls to a service whose breaker is open, before any upstream call
//! - Record the forward result against the breaker that admitted the call
//! - Apply the cancellation policy when the client goes away mid-call

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::CancellationPolicy;
use crate::error::GatewayError;
use crate::http::request::RequestContext;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitState, Rejection, Ticket,
};
use crate::routing::ServiceName;
use crate::upstream::{FailureKind, ForwardOutcome};

/// A RAII guard for one admitted call.
///
/// Completing the permit records the outcome. Dropping it uncompleted means
/// the request future was cancelled, and the cancellation policy decides.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    ticket: Ticket,
    on_cancel: CancellationPolicy,
    completed: bool,
}

impl CallPermit {
    pub fn acquire(
        breaker: Arc<CircuitBreaker>,
        on_cancel: CancellationPolicy,
    ) -> Result<Self, Rejection> {
        let ticket = breaker.try_acquire()?;
        Ok(Self {
            breaker,
            ticket,
            on_cancel,
            completed: false,
        })
    }

    /// Breaker state when the call was admitted.
    pub fn admitted_in(&self) -> CircuitState {
        self.ticket.state
    }

    pub fn succeed(mut self) {
        self.finish(CallOutcome::Success);
    }

    pub fn fail(mut self) {
        self.finish(CallOutcome::Failure);
    }

    /// Give the slot back without an outcome (no upstream call was made).
    pub fn release(mut self) {
        self.finish(CallOutcome::Abandoned);
    }

    fn finish(&mut self, outcome: CallOutcome) {
        self.completed = true;
        self.breaker.complete(self.ticket, outcome);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let service = self.breaker.service().clone();
        tracing::debug!(service = %service, policy = ?self.on_cancel, "Call cancelled before completion");

        match self.on_cancel {
            CancellationPolicy::Ignore => self.finish(CallOutcome::Abandoned),
            CancellationPolicy::Failure => {
                metrics::record_upstream_failure(service.as_str(), FailureKind::Cancelled);
                self.finish(CallOutcome::Failure);
            }
        }
    }
}

/// Middleware function for per-service circuit breaking.
pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let service = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.service.clone())
        .unwrap_or_else(ServiceName::unknown);

    let breaker = state.breakers.breaker(&service);
    let permit = match CallPermit::acquire(breaker, state.config.circuit_breaker.cancellation) {
        Ok(permit) => permit,
        Err(rejection) => {
            tracing::debug!(service = %service, state = %rejection.state, "Circuit breaker rejected request");
            metrics::record_circuit_rejection(service.as_str(), rejection.state);
            return GatewayError::CircuitOpen {
                service,
                state: rejection.state,
            }
            .into_response();
        }
    };

    let response = next.run(request).await;

    match response.extensions().get::<ForwardOutcome>() {
        Some(ForwardOutcome::Success) => permit.succeed(),
        Some(ForwardOutcome::Failure(_)) => permit.fail(),
        Some(ForwardOutcome::NotAttempted) | None => permit.release(),
    }

    response
}
