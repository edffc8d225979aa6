//! Ambient active span for production code and task functions.
//!
//! Code that wants its artifacts evaluated online runs inside
//! [`with_capability_span`] (or [`with_active_span`]); anything called from
//! there can then find the span through [`current_span`] or capture a
//! [`Correlation`] with [`current_correlation`] for later, deferred use.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use evalscope_trace::{AttrValue, Span, SpanContext, SpanLink, SpanOptions, SpanStatus, Tracer};
use tokio::task::futures::TaskLocalFuture;

use crate::correlation::attributes as attr;
use crate::domain::Correlation;

tokio::task_local! {
    static ACTIVE_SPAN: ActiveSpan;
}

/// The span currently in scope plus the capability/step it belongs to.
#[derive(Clone)]
pub struct ActiveSpan {
    pub span: Arc<dyn Span>,
    pub capability: Option<String>,
    pub step: Option<String>,
    pub conversation_id: Option<String>,
}

impl ActiveSpan {
    pub fn new(span: Arc<dyn Span>) -> Self {
        Self {
            span,
            capability: None,
            step: None,
            conversation_id: None,
        }
    }

    pub fn with_capability(mut self, capability: &str, step: Option<&str>) -> Self {
        self.capability = Some(capability.to_string());
        self.step = step.map(str::to_string);
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: &str) -> Self {
        self.conversation_id = Some(conversation_id.to_string());
        self
    }

    /// Correlation for this span. Capability and step fall back to empty /
    /// absent when the span was not tagged with them.
    pub fn correlation(&self) -> Correlation {
        let mut correlation = Correlation::for_span(
            &self.span.context(),
            self.capability.as_deref().unwrap_or_default(),
            self.step.as_deref(),
        );
        correlation.conversation_id = self.conversation_id.clone();
        correlation
    }
}

/// A span whose status and end belong to whoever started it.
///
/// Code running inside the scope may annotate it (attributes, exceptions,
/// links) but `set_status` and `end` are dropped, so the owner's terminal
/// status always wins.
pub struct BorrowedSpan(Arc<dyn Span>);

impl BorrowedSpan {
    pub fn wrap(span: Arc<dyn Span>) -> Arc<dyn Span> {
        Arc::new(Self(span))
    }
}

impl Span for BorrowedSpan {
    fn context(&self) -> SpanContext {
        self.0.context()
    }

    fn set_attribute(&self, key: &str, value: AttrValue) {
        self.0.set_attribute(key, value);
    }

    fn set_status(&self, _status: SpanStatus) {}

    fn record_exception(&self, message: &str) {
        self.0.record_exception(message);
    }

    fn add_link(&self, link: SpanLink) {
        self.0.add_link(link);
    }

    fn end(&self) {}
}

/// Ends the span when dropped, so a cancelled scope still closes it.
struct EndOnDrop(Arc<dyn Span>);

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        self.0.end();
    }
}

impl fmt::Debug for ActiveSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSpan")
            .field("context", &self.span.context())
            .field("capability", &self.capability)
            .field("step", &self.step)
            .finish()
    }
}

/// The active span on the current task, if any.
pub fn current_span() -> Option<ActiveSpan> {
    ACTIVE_SPAN.try_with(Clone::clone).ok()
}

/// Capture the active span's [`Correlation`] for use after leaving its scope.
pub fn current_correlation() -> Option<Correlation> {
    current_span().map(|active| active.correlation())
}

/// Run `fut` with `active` as the ambient span.
pub fn with_active_span<F: Future>(active: ActiveSpan, fut: F) -> TaskLocalFuture<ActiveSpan, F> {
    ACTIVE_SPAN.scope(active, fut)
}

/// Run production code inside a capability span.
///
/// The span is tagged with capability/step, becomes the ambient span for
/// `fut`, and ends with `ok` or `error` status from the future's result.
/// A cancelled `fut` still ends the span, with status left unset.
pub async fn with_capability_span<F, T, E>(
    tracer: &dyn Tracer,
    capability: &str,
    step: Option<&str>,
    fut: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let parent = current_span().map(|a| a.span.context());
    let mut options = SpanOptions::new(match step {
        Some(step) => format!("{capability} {step}"),
        None => capability.to_string(),
    })
    .with_parent(parent)
    .with_attribute(attr::CAPABILITY, capability);
    if let Some(step) = step {
        options = options.with_attribute(attr::STEP, step);
    }
    let span = tracer.start_span(options);
    let _end = EndOnDrop(Arc::clone(&span));

    let active = ActiveSpan::new(Arc::clone(&span)).with_capability(capability, step);
    let result = with_active_span(active, fut).await;

    match &result {
        Ok(_) => span.set_status(SpanStatus::Ok),
        Err(e) => {
            let message = e.to_string();
            span.record_exception(&message);
            span.set_attribute(attr::ERROR_MESSAGE, AttrValue::from(message.as_str()));
            span.set_status(SpanStatus::error(message));
        }
    }
    result
}
