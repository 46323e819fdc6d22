use parking_lot::RwLock;
use std::sync::Arc;

/// Shared holder of the bearer token attached to outgoing requests.
///
/// Clones share the same slot. Writes replace the whole value, so a reader
/// sees either the old token or the new one, never a mix.
#[derive(Debug, Clone, Default)]
pub struct CredentialSlot {
    token: Arc<RwLock<Option<Arc<str>>>>,
}

impl CredentialSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, token: &str) {
        *self.token.write() = Some(Arc::from(token));
    }

    pub(crate) fn detach(&self) {
        *self.token.write() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.token.read().is_some()
    }

    /// Current token, if any.
    pub fn current(&self) -> Option<Arc<str>> {
        self.token.read().clone()
    }

    /// `Token <value>` for the `Authorization` header.
    pub fn authorization_header(&self) -> Option<String> {
        self.token
            .read()
            .as_ref()
            .map(|token| format!("Token {token}"))
    }
}
