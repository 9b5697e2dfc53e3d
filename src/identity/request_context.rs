use super::Principal;

/// Per-request identity, attached by the bearer middleware.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Principal,
    pub request_id: String,
}

impl RequestContext {
    pub fn user_id(&self) -> &str {
        &self.principal.subject
    }
}
