use tracing::Span;
use uuid::Uuid;

/// Request-scoped correlation state, passed explicitly into every pipeline
/// step. Each refinement opens a child span so log records emitted under it
/// carry every identifier learned so far.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    span: Span,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let span = tracing::info_span!("request", request_id = %request_id);
        Self { request_id, span }
    }

    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn for_user(&self, username: &str, platform: &str) -> Self {
        Self {
            request_id: self.request_id.clone(),
            span: tracing::info_span!(parent: &self.span, "user", username, platform),
        }
    }

    pub fn for_user_id(&self, user_id: &str) -> Self {
        Self {
            request_id: self.request_id.clone(),
            span: tracing::info_span!(parent: &self.span, "profile", user_id),
        }
    }
}
