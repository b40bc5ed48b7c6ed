//! Contextual telemetry
//!
//! A [`RequestContext`] travels explicitly through every public service
//! operation. It carries the request id, the trace id and, when the caller
//! is authenticated, the [`UserInfos`] from the access token. Spans opened
//! through the context are tagged with both ids so that every log line
//! emitted inside them can be correlated.
//!
//! Background reconcilers use [`RequestContext::background`], which is not
//! traced: its spans are disabled so periodic sweeps do not consume the
//! sampling budget.
//!
//! Work that outlives the request (asynchronous notifications) takes a
//! [`ContextSnapshot`] and runs under a child span of the caller's span.

use std::future::Future;
use tracing::{field, Instrument, Span};
use uuid::Uuid;

use crate::auth::jwt::UserInfos;

/// Per-request context passed into every service call
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    trace_id: String,
    user: Option<UserInfos>,
    traced: bool,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            trace_id: trace_id.into(),
            user: None,
            traced: true,
        }
    }

    /// Fresh context with generated ids
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self::new(id.clone(), id)
    }

    /// Context for background sweeps, never traced
    pub fn background(job: &str) -> Self {
        Self {
            request_id: format!("{}-{}", job, Uuid::new_v4().simple()),
            trace_id: String::new(),
            user: None,
            traced: false,
        }
    }

    pub fn with_user(mut self, user: UserInfos) -> Self {
        self.user = Some(user);
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn user(&self) -> Option<&UserInfos> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user.map(|u| u.id)
    }

    pub fn is_traced(&self) -> bool {
        self.traced
    }

    /// Opens a span for `operation`, or a disabled span for untraced contexts
    pub fn span(&self, operation: &'static str) -> Span {
        if !self.traced {
            return Span::none();
        }
        tracing::info_span!(
            "op",
            operation,
            request_id = %self.request_id,
            trace_id = %self.trace_id,
            user_id = field::Empty,
            error = field::Empty,
            error.message = field::Empty,
        )
    }

    /// Captures what a detached task needs to stay correlated with this
    /// request
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            request_id: self.request_id.clone(),
            trace_id: self.trace_id.clone(),
            traced: self.traced,
            parent: Span::current(),
        }
    }
}

/// Records an error on `span`
pub fn mark_span_error(span: &Span, err: &dyn std::fmt::Display) {
    span.record("error", true);
    span.record("error.message", field::display(err));
}

/// Carrier-captured context for detached work
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    request_id: String,
    trace_id: String,
    traced: bool,
    parent: Span,
}

impl ContextSnapshot {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Context rebuilt from the snapshot, without the caller's user
    pub fn context(&self) -> RequestContext {
        RequestContext {
            request_id: self.request_id.clone(),
            trace_id: self.trace_id.clone(),
            user: None,
            traced: self.traced,
        }
    }

    /// Span linked to the caller's span for a detached task
    pub fn detached_span(&self, operation: &'static str) -> Span {
        if !self.traced {
            return Span::none();
        }
        tracing::info_span!(
            parent: &self.parent,
            "detached",
            operation,
            request_id = %self.request_id,
            trace_id = %self.trace_id,
            error = field::Empty,
            error.message = field::Empty,
        )
    }

    /// Spawns `future` on the runtime under [`Self::detached_span`]
    pub fn spawn<F>(&self, operation: &'static str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = self.detached_span(operation);
        tokio::spawn(future.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RoleSlug, RoleStatus};

    #[test]
    fn test_generate_has_ids() {
        let ctx = RequestContext::generate();
        assert_eq!(ctx.request_id().len(), 32);
        assert!(ctx.is_traced());
        assert!(ctx.user_id().is_none());
    }

    #[test]
    fn test_background_is_untraced() {
        let ctx = RequestContext::background("temp-block-clearer");
        assert!(!ctx.is_traced());
        assert!(ctx.request_id().starts_with("temp-block-clearer-"));
        assert!(ctx.span("sweep").is_disabled());
    }

    #[test]
    fn test_snapshot_keeps_ids_drops_user() {
        let ctx = RequestContext::new("req-1", "trace-1").with_user(UserInfos {
            id: 9,
            role: RoleSlug::Owner,
            profile_status: RoleStatus::Active,
        });
        assert_eq!(ctx.user_id(), Some(9));

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.request_id(), "req-1");
        assert_eq!(snapshot.trace_id(), "trace-1");

        let detached = snapshot.context();
        assert_eq!(detached.request_id(), "req-1");
        assert!(detached.user().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_spawn_runs_future() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let snapshot = RequestContext::generate().snapshot();

        snapshot
            .spawn("test", async move {
                let _ = tx.send(42);
            })
            .await
            .unwrap();

        assert_eq!(rx.await.unwrap(), 42);
    }
}
