//! Canonical scope vocabularies and sensitivity classification.
//!
//! Two disjoint vocabularies exist: platform scopes (capability verbs granted
//! to mini-apps) and identity-provider scopes (federated, wildcard-friendly).
//! Both tables are static data resolved at compile time; nothing here is
//! rebuilt per request.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How much damage a scope can do in the wrong hands.
///
/// `Critical` scopes require explicit per-use confirmation and are never
/// covered by a stored grant; everything else needs session-level consent
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
    Critical,
}

/// Static description of a single platform scope.
pub struct ScopeSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub sensitivity: Sensitivity,
    /// Extra consent-screen note, where one exists.
    pub note: Option<&'static str>,
}

/// The full platform scope table.
pub const PLATFORM_SCOPES: &[ScopeSpec] = &[
    ScopeSpec {
        name: "user:read",
        description: "Access your basic profile information",
        sensitivity: Sensitivity::Low,
        note: None,
    },
    ScopeSpec {
        name: "user:read:extended",
        description: "Access your extended profile information",
        sensitivity: Sensitivity::Medium,
        note: None,
    },
    ScopeSpec {
        name: "user:read:contacts",
        description: "Access your contact list",
        sensitivity: Sensitivity::High,
        note: Some("Only contacts who have also authorized this app"),
    },
    ScopeSpec {
        name: "wallet:balance",
        description: "View your wallet balance",
        sensitivity: Sensitivity::Medium,
        note: None,
    },
    ScopeSpec {
        name: "wallet:pay",
        description: "Process payments from your wallet",
        sensitivity: Sensitivity::Critical,
        note: Some("You'll confirm each payment individually"),
    },
    ScopeSpec {
        name: "wallet:history",
        description: "View your transaction history",
        sensitivity: Sensitivity::High,
        note: None,
    },
    ScopeSpec {
        name: "wallet:request",
        description: "Request payments from other users",
        sensitivity: Sensitivity::High,
        note: None,
    },
    ScopeSpec {
        name: "messaging:send",
        description: "Send messages on your behalf",
        sensitivity: Sensitivity::High,
        note: None,
    },
    ScopeSpec {
        name: "messaging:read",
        description: "Read your message history",
        sensitivity: Sensitivity::High,
        note: None,
    },
    ScopeSpec {
        name: "storage:read",
        description: "Read data stored by this mini-app",
        sensitivity: Sensitivity::Low,
        note: None,
    },
    ScopeSpec {
        name: "storage:write",
        description: "Store data for this mini-app",
        sensitivity: Sensitivity::Low,
        note: None,
    },
    ScopeSpec {
        name: "webhook:send",
        description: "Receive webhook callbacks",
        sensitivity: Sensitivity::Low,
        note: None,
    },
    ScopeSpec {
        name: "room:create",
        description: "Create new rooms",
        sensitivity: Sensitivity::High,
        note: None,
    },
    ScopeSpec {
        name: "room:invite",
        description: "Invite users to rooms",
        sensitivity: Sensitivity::High,
        note: None,
    },
];

/// Exact identity-provider scope names accepted without pattern matching.
const IDENTITY_SCOPES: &[&str] = &["openid", "urn:idp:api:*", "urn:idp:device:*", "urn:idp:admin"];

/// Prefixes under which federated identity scopes are accepted.
const IDENTITY_SCOPE_PREFIXES: &[&str] = &["urn:idp:"];

/// Which downstream protocol domain a scope set is being projected onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDomain {
    /// Platform capability scopes, carried in capability tokens.
    Platform,
    /// Identity-provider scopes, forwarded in outbound IdP requests.
    Identity,
}

/// Per-scope outcome of validating a request against a client's manifest.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScopeDecision {
    pub scope: String,
    pub status: ScopeStatus,
    pub requires_user_consent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStatus {
    Approved,
    PendingApproval,
    Denied,
}

/// Result of [`validate`], partitioned the way the consent flow consumes it.
#[derive(Debug, Default)]
pub struct ScopeValidation {
    pub approved: Vec<ScopeDecision>,
    pub pending_approval: Vec<ScopeDecision>,
    pub denied: Vec<ScopeDecision>,
}

impl ScopeValidation {
    pub fn all_allowed(&self) -> bool {
        self.denied.is_empty()
    }
}

fn platform_spec(scope: &str) -> Option<&'static ScopeSpec> {
    PLATFORM_SCOPES.iter().find(|s| s.name == scope)
}

/// Whether `scope` belongs to the platform vocabulary.
pub fn is_platform_scope(scope: &str) -> bool {
    platform_spec(scope).is_some()
}

/// Whether `scope` belongs to the identity-provider vocabulary.
///
/// Exact names match first; otherwise any scope under a federated prefix is
/// accepted, since the IdP owns that namespace.
pub fn is_identity_scope(scope: &str) -> bool {
    if scope.is_empty() {
        return false;
    }
    IDENTITY_SCOPES.contains(&scope)
        || IDENTITY_SCOPE_PREFIXES.iter().any(|p| scope.starts_with(p))
}

/// Whether `scope` is known to either vocabulary.
pub fn is_known_scope(scope: &str) -> bool {
    is_platform_scope(scope) || is_identity_scope(scope)
}

/// Sensitivity classification for a scope.
///
/// Identity-provider scopes carry no wallet or messaging power of their own,
/// so they classify as `Low`; unknown scopes classify as `Critical` so a
/// table gap can never silently downgrade a consent prompt.
pub fn classify(scope: &str) -> Sensitivity {
    match platform_spec(scope) {
        Some(spec) => spec.sensitivity,
        None if is_identity_scope(scope) => Sensitivity::Low,
        None => Sensitivity::Critical,
    }
}

/// Human-readable description for the consent screen.
pub fn description(scope: &str) -> &str {
    platform_spec(scope).map(|s| s.description).unwrap_or(scope)
}

/// Consent-screen note for a scope, where one exists.
pub fn note(scope: &str) -> Option<&'static str> {
    platform_spec(scope).and_then(|s| s.note)
}

/// Whether a scope needs user-level consent rather than being auto-granted.
pub fn requires_user_consent(scope: &str) -> bool {
    classify(scope) >= Sensitivity::High
}

/// Splits a space-separated scope string into trimmed, non-empty scopes.
pub fn parse_scope_string(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(|s| s.to_string()).collect()
}

/// Validates requested scopes against the client's registered manifest.
///
/// A scope absent from `registered` is denied outright regardless of whether
/// it is globally well-formed: this is the escalation guard and is never
/// bypassed. Known, registered scopes partition into approved and
/// pending-approval (sensitive, needs explicit user consent).
pub fn validate(requested: &[String], registered: &[String]) -> ScopeValidation {
    let mut result = ScopeValidation::default();

    for scope in requested {
        if !registered.iter().any(|r| r == scope) {
            result.denied.push(ScopeDecision {
                scope: scope.clone(),
                status: ScopeStatus::Denied,
                requires_user_consent: false,
            });
            continue;
        }

        let consent = requires_user_consent(scope);
        let decision = ScopeDecision {
            scope: scope.clone(),
            status: if consent {
                ScopeStatus::PendingApproval
            } else {
                ScopeStatus::Approved
            },
            requires_user_consent: consent,
        };
        if consent {
            result.pending_approval.push(decision);
        } else {
            result.approved.push(decision);
        }
    }

    result
}

/// Projects a scope set down to the vocabulary of one protocol domain,
/// preserving the original order.
pub fn format_for(scopes: &[String], domain: ScopeDomain) -> String {
    let keep: fn(&str) -> bool = match domain {
        ScopeDomain::Platform => is_platform_scope,
        ScopeDomain::Identity => is_identity_scope,
    };
    scopes
        .iter()
        .filter(|s| keep(s))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(scopes: &[&str]) -> Vec<String> {
        scopes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sensitivity_table() {
        assert_eq!(classify("wallet:pay"), Sensitivity::Critical);
        assert_eq!(classify("wallet:balance"), Sensitivity::Medium);
        assert_eq!(classify("user:read:extended"), Sensitivity::Medium);
        assert_eq!(classify("wallet:history"), Sensitivity::High);
        assert_eq!(classify("user:read:contacts"), Sensitivity::High);
        assert_eq!(classify("user:read"), Sensitivity::Low);
        assert_eq!(classify("storage:write"), Sensitivity::Low);
    }

    #[test]
    fn test_unknown_scope_classifies_critical() {
        assert_eq!(classify("wallet:transfer-everything"), Sensitivity::Critical);
    }

    #[test]
    fn test_identity_scope_matching() {
        assert!(is_identity_scope("openid"));
        assert!(is_identity_scope("urn:idp:api:*"));
        // Wildcard namespace: anything under the federated prefix is the
        // IdP's business, not ours.
        assert!(is_identity_scope("urn:idp:client:device:abcd1234"));
        assert!(!is_identity_scope("wallet:pay"));
        assert!(!is_identity_scope(""));
    }

    #[test]
    fn test_vocabularies_are_disjoint() {
        for spec in PLATFORM_SCOPES {
            assert!(!is_identity_scope(spec.name), "{} in both tables", spec.name);
        }
    }

    #[test]
    fn test_unregistered_scope_denied_even_if_valid() {
        let requested = owned(&["wallet:pay", "user:read"]);
        let registered = owned(&["user:read"]);

        let result = validate(&requested, &registered);
        assert_eq!(result.denied.len(), 1);
        assert_eq!(result.denied[0].scope, "wallet:pay");
        assert_eq!(result.approved.len(), 1);
        assert!(!result.all_allowed());
    }

    #[test]
    fn test_sensitive_scopes_pend_approval() {
        let requested = owned(&["wallet:pay", "wallet:balance", "messaging:send"]);
        let registered = requested.clone();

        let result = validate(&requested, &registered);
        assert!(result.denied.is_empty());
        // wallet:pay (critical) and messaging:send (high) need consent;
        // wallet:balance (medium) rides on session consent.
        assert_eq!(result.pending_approval.len(), 2);
        assert_eq!(result.approved.len(), 1);
        assert_eq!(result.approved[0].scope, "wallet:balance");
    }

    #[test]
    fn test_parse_scope_string() {
        assert_eq!(
            parse_scope_string("  wallet:pay   user:read "),
            owned(&["wallet:pay", "user:read"])
        );
        assert!(parse_scope_string("").is_empty());
    }

    #[test]
    fn test_format_for_preserves_order() {
        let scopes = owned(&["wallet:pay", "openid", "user:read", "urn:idp:api:*"]);
        assert_eq!(format_for(&scopes, ScopeDomain::Platform), "wallet:pay user:read");
        assert_eq!(format_for(&scopes, ScopeDomain::Identity), "openid urn:idp:api:*");
    }

    #[test]
    fn test_descriptions_cover_consent_screen() {
        assert_eq!(description("wallet:pay"), "Process payments from your wallet");
        assert_eq!(note("wallet:pay"), Some("You'll confirm each payment individually"));
        assert_eq!(note("user:read"), None);
        // Unknown scopes echo themselves rather than leaking a None.
        assert_eq!(description("urn:idp:api:*"), "urn:idp:api:*");
    }
}
