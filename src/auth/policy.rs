//! Operation classification and the authorization matrix.

use serde::Serialize;

use crate::domain::{Capability, RepositoryRef, User};
use crate::error::CoreError;

/// Smart-HTTP service names.
pub const UPLOAD_PACK: &str = "git-upload-pack";
pub const RECEIVE_PACK: &str = "git-receive-pack";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Push,
    Pull,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Push => "push",
            OperationKind::Pull => "pull",
        }
    }
}

/// Classify a request by the service named in its path or query.
///
/// `git-receive-pack` anywhere means push; everything else, including
/// requests naming neither service, is pull-class.  The query is
/// percent-decoded first so this sees the same service the handlers do.
pub fn classify(path: &str, query: Option<&str>) -> OperationKind {
    let in_query = query.is_some_and(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .any(|(key, value)| key == "service" && value == RECEIVE_PACK)
    });
    if in_query || path.trim_end_matches('/').ends_with(RECEIVE_PACK) {
        OperationKind::Push
    } else {
        OperationKind::Pull
    }
}

/// Capabilities that satisfy `operation` on `repo`, or `None` when no
/// capability is needed.
pub fn required_capability(operation: OperationKind, repo: &RepositoryRef) -> Option<Capability> {
    match operation {
        OperationKind::Push => Some(Capability::Administrator),
        OperationKind::Pull if repo.is_public() => None,
        OperationKind::Pull => Some(Capability::Administrator),
    }
}

pub fn authorize(
    user: &User,
    operation: OperationKind,
    repo: &RepositoryRef,
) -> Result<(), CoreError> {
    match required_capability(operation, repo) {
        Some(capability) if !user.has(capability) => Err(CoreError::AuthorizationFailure),
        _ => Ok(()),
    }
}
