//! Cross-trace correlation between an evaluation and a production trace.

use evalscope_trace::{SpanContext, SpanId, TraceId};
use serde::{Deserialize, Serialize};

use crate::domain::error::EvalResult;

/// The (trace, span, capability, step) tuple an online evaluation links to.
///
/// `trace_id` is a validated [`TraceId`], so a `Correlation` can never carry
/// an empty trace id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correlation {
    pub trace_id: TraceId,
    pub span_id: Option<SpanId>,
    pub capability: String,
    pub step: Option<String>,
    pub conversation_id: Option<String>,
}

impl Correlation {
    /// Correlation pointing at a concrete span.
    pub fn for_span(context: &SpanContext, capability: &str, step: Option<&str>) -> Self {
        Self {
            trace_id: context.trace_id.clone(),
            span_id: Some(context.span_id.clone()),
            capability: capability.to_string(),
            step: step.map(str::to_string),
            conversation_id: None,
        }
    }

    /// Build from raw identifiers, e.g. ones persisted alongside a response.
    pub fn parse(
        trace_id: &str,
        span_id: Option<&str>,
        capability: &str,
        step: Option<&str>,
    ) -> EvalResult<Self> {
        let trace_id = TraceId::try_from(trace_id.to_string())?;
        let span_id = span_id
            .map(|s| SpanId::try_from(s.to_string()))
            .transpose()?;
        Ok(Self {
            trace_id,
            span_id,
            capability: capability.to_string(),
            step: step.map(str::to_string),
            conversation_id: None,
        })
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// The linkable span context, when the correlation names a span.
    pub fn span_context(&self) -> Option<SpanContext> {
        self.span_id
            .as_ref()
            .map(|span_id| SpanContext::new(self.trace_id.clone(), span_id.clone()))
    }
}
