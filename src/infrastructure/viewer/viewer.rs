use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::core::strong_types::UserId;

/// Capability resolution, consumed as a black box by the engine
pub trait CapabilityGuard: Send + Sync {
    /// True if the actor holds at least one of `candidates`
    fn can_one_of(&self, candidates: &[String]) -> bool;
}

/// Guard backed by a fixed capability set, e.g. decoded from a token by the transport layer
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet(HashSet<String>);

impl CapabilitySet {
    pub fn new<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(capabilities.into_iter().map(Into::into).collect())
    }
}

impl CapabilityGuard for CapabilitySet {
    fn can_one_of(&self, candidates: &[String]) -> bool {
        candidates.iter().any(|c| self.0.contains(c))
    }
}

/// The acting user for one request
#[derive(Clone)]
pub struct ViewerContext {
    pub user_id: Option<UserId>,
    guard: Arc<dyn CapabilityGuard>,
}

impl ViewerContext {
    pub fn new(user_id: Option<UserId>, guard: Arc<dyn CapabilityGuard>) -> Self {
        ViewerContext { user_id, guard }
    }

    pub fn with_capabilities<I, S>(user_id: Option<UserId>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(user_id, Arc::new(CapabilitySet::new(capabilities)))
    }

    /// Signed-in user holding no capabilities
    pub fn user(user_id: UserId) -> Self {
        Self::with_capabilities(Some(user_id), Vec::<String>::new())
    }

    pub fn anonymous() -> Self {
        Self::with_capabilities(None, Vec::<String>::new())
    }

    pub fn can_one_of(&self, candidates: &[String]) -> bool {
        !candidates.is_empty() && self.guard.can_one_of(candidates)
    }
}

impl fmt::Debug for ViewerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewerContext")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_one_of() {
        let vc = ViewerContext::with_capabilities(Some(1), ["posts:read"]);
        assert!(vc.can_one_of(&["posts:manage".into(), "posts:read".into()]));
        assert!(!vc.can_one_of(&["posts:manage".into()]));
        assert!(!vc.can_one_of(&[]));
    }

    #[test]
    fn test_anonymous_has_nothing() {
        let vc = ViewerContext::anonymous();
        assert_eq!(vc.user_id, None);
        assert!(!vc.can_one_of(&["posts:read".into()]));
    }
}
