// Auth: opaque identity+role extraction from an authenticated session.
// Token issuance is out of scope; the engine only consumes the verifier's
// decision through a pluggable boolean gate, the same shape as a signature
// verifier would take.

use async_trait::async_trait;

use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Tourist,
    Authority,
    AuthorityWithImpersonation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn can_impersonate(&self) -> bool {
        matches!(self.role, Role::AuthorityWithImpersonation)
    }

    pub fn is_authority(&self) -> bool {
        matches!(self.role, Role::Authority | Role::AuthorityWithImpersonation)
    }
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, bearer_token: &str) -> Result<Principal, EngineError>;
}

/// Development/test verifier: tokens are `"<role>:<id>"` (e.g.
/// `"tourist:t1"`, `"authority:a1"`). A real deployment swaps this for a
/// verifier backed by the external token-issuance service (out of scope
/// here) without the rest of the engine changing.
pub struct StaticTokenVerifier;

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, bearer_token: &str) -> Result<Principal, EngineError> {
        let (role_str, id) = bearer_token.split_once(':').ok_or(EngineError::Unauthenticated)?;
        if id.is_empty() {
            return Err(EngineError::Unauthenticated);
        }
        let role = match role_str {
            "tourist" => Role::Tourist,
            "authority" => Role::Authority,
            "authority_impersonate" => Role::AuthorityWithImpersonation,
            _ => return Err(EngineError::Unauthenticated),
        };
        Ok(Principal { id: id.to_string(), role })
    }
}

/// Ingestion step 1: reject unless the principal is the tourist
/// themselves, or an authority with impersonation enabled (disabled by
/// default).
pub fn authorize_ingest(principal: &Principal, fix_tourist_id: &str, impersonation_enabled: bool) -> Result<(), EngineError> {
    if principal.id == fix_tourist_id {
        return Ok(());
    }
    if impersonation_enabled && principal.can_impersonate() {
        return Ok(());
    }
    Err(EngineError::Unauthorized("cannot submit fixes for another tourist".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_verifier_parses_role_and_id() {
        let v = StaticTokenVerifier;
        let p = v.verify("tourist:t1").await.unwrap();
        assert_eq!(p.id, "t1");
        assert_eq!(p.role, Role::Tourist);
    }

    #[tokio::test]
    async fn static_verifier_rejects_malformed_token() {
        let v = StaticTokenVerifier;
        assert!(v.verify("garbage").await.is_err());
        assert!(v.verify("tourist:").await.is_err());
        assert!(v.verify("alien:t1").await.is_err());
    }

    #[test]
    fn self_ingest_is_authorized() {
        let p = Principal { id: "t1".into(), role: Role::Tourist };
        assert!(authorize_ingest(&p, "t1", false).is_ok());
    }

    #[test]
    fn cross_tourist_ingest_is_rejected_by_default() {
        let p = Principal { id: "t2".into(), role: Role::Tourist };
        assert!(authorize_ingest(&p, "t1", false).is_err());
    }

    #[test]
    fn impersonation_disabled_by_default_even_for_authority() {
        let p = Principal { id: "a1".into(), role: Role::AuthorityWithImpersonation };
        assert!(authorize_ingest(&p, "t1", false).is_err());
    }

    #[test]
    fn impersonation_allowed_when_enabled() {
        let p = Principal { id: "a1".into(), role: Role::AuthorityWithImpersonation };
        assert!(authorize_ingest(&p, "t1", true).is_ok());
    }

    #[test]
    fn plain_authority_cannot_impersonate_even_when_enabled() {
        let p = Principal { id: "a1".into(), role: Role::Authority };
        assert!(authorize_ingest(&p, "t1", true).is_err());
    }
}
