//! Security evaluation right after matching.
//!
//! Targets declare a [`SecurityRequirement`]. The [`SecurityCustomizer`] places a
//! [`SecurityEvaluator`] at the very start of the post-match chain of every target with a
//! requirement, so a rejected request never reaches body reading or the operation. Resolving the
//! caller's [`Identity`] is asynchronous: the evaluator suspends the request and checks the
//! identity in the continuation.

use crate::error::{Forbidden, Unauthenticated};
use crate::handler::{HandlerOutcome, Phase, PhaseHandler, SharedHandler, Suspension};
use crate::registry::{Customizer, OperationDescriptor, OperationId};
use crate::request::RequestContext;
use crate::Failure;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Property key of the resolved [`Identity`].
pub const IDENTITY_PROPERTY: &str = "micro_rest.security.identity";

/// Property key of the set of operations whose requirement has already been checked.
pub const CHECKED_PROPERTY: &str = "micro_rest.security.checked";

/// Who may call an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityRequirement {
    PermitAll,
    DenyAll,
    Authenticated,
    RolesAllowed(Vec<String>),
}

impl SecurityRequirement {
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SecurityRequirement::RolesAllowed(roles.into_iter().map(Into::into).collect())
    }

    /// Checks `identity` against this requirement.
    pub fn check(&self, identity: &Identity, operation: &str, challenge: Option<String>) -> Result<(), Failure> {
        match self {
            SecurityRequirement::PermitAll => Ok(()),
            SecurityRequirement::DenyAll => Err(forbidden(identity, operation)),
            _ if identity.is_anonymous() => Err(Unauthenticated { challenge }.into()),
            SecurityRequirement::Authenticated => Ok(()),
            SecurityRequirement::RolesAllowed(roles) => {
                if roles.iter().any(|role| identity.has_role(role)) {
                    Ok(())
                } else {
                    Err(forbidden(identity, operation))
                }
            }
        }
    }
}

fn forbidden(identity: &Identity, operation: &str) -> Failure {
    Forbidden { principal: identity.principal().to_string(), operation: operation.to_string() }.into()
}

/// The caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    principal: String,
    roles: HashSet<String>,
    anonymous: bool,
}

impl Identity {
    pub fn new<P: Into<String>>(principal: P) -> Self {
        Self { principal: principal.into(), roles: HashSet::new(), anonymous: false }
    }

    pub fn anonymous() -> Self {
        Self { principal: String::from("anonymous"), roles: HashSet::new(), anonymous: true }
    }

    #[must_use]
    pub fn with_role<R: Into<String>>(mut self, role: R) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn roles(&self) -> &HashSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

/// Resolves the identity of the caller, typically from credentials in the request head.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, ctx: &RequestContext) -> BoxFuture<'static, Result<Identity, Failure>>;

    /// The `WWW-Authenticate` challenge sent with 401 replies.
    fn challenge(&self) -> Option<String> {
        None
    }
}

/// Contributes a [`SecurityEvaluator`] to the post-match chain of secured targets.
pub struct SecurityCustomizer {
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl SecurityCustomizer {
    pub fn new(provider: Option<Arc<dyn IdentityProvider>>) -> Self {
        Self { provider }
    }
}

impl Customizer for SecurityCustomizer {
    fn contribute(&self, phase: Phase, target: &OperationDescriptor) -> Vec<SharedHandler> {
        if phase != Phase::PostMatch {
            return vec![];
        }

        match (target.security(), &self.provider) {
            (None | Some(SecurityRequirement::PermitAll), _) => vec![],
            (Some(requirement @ SecurityRequirement::DenyAll), provider) => vec![Arc::new(SecurityEvaluator {
                operation: target.id(),
                name: target.name().to_string(),
                requirement: requirement.clone(),
                provider: provider.clone(),
            })],
            (Some(requirement), Some(provider)) => vec![Arc::new(SecurityEvaluator {
                operation: target.id(),
                name: target.name().to_string(),
                requirement: requirement.clone(),
                provider: Some(Arc::clone(provider)),
            })],
            // rejected when the pipeline is built
            (Some(_), None) => vec![],
        }
    }
}

/// Checks the caller against the requirement of one target.
pub struct SecurityEvaluator {
    operation: OperationId,
    name: String,
    requirement: SecurityRequirement,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl SecurityEvaluator {
    fn challenge(&self) -> Option<String> {
        self.provider.as_ref().and_then(|provider| provider.challenge())
    }
}

impl PhaseHandler for SecurityEvaluator {
    fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        if already_checked(ctx, self.operation) {
            trace!(request_id = ctx.id(), operation = %self.operation, "security requirement already checked");
            return HandlerOutcome::Completed;
        }

        if self.requirement == SecurityRequirement::DenyAll {
            let identity = ctx.identity().cloned().unwrap_or_else(Identity::anonymous);
            return HandlerOutcome::Failed(forbidden(&identity, &self.name));
        }

        if let Some(identity) = ctx.identity() {
            let result = self.requirement.check(identity, &self.name, self.challenge());
            if result.is_ok() {
                mark_checked(ctx, self.operation);
            }
            return result.into();
        }

        let Some(provider) = &self.provider else {
            return HandlerOutcome::Failed(Unauthenticated { challenge: None }.into());
        };

        debug!(request_id = ctx.id(), operation = %self.name, "resolve identity");
        let challenge = self.challenge();
        let requirement = self.requirement.clone();
        let name = self.name.clone();
        let operation = self.operation;

        // a failing provider means the caller could not be identified
        let resolving = provider.resolve(ctx).map({
            let challenge = challenge.clone();
            move |result| {
                result.map_err(|e| {
                    debug!(cause = %e, "identity resolution failed");
                    Failure::new(Unauthenticated { challenge }).with_cause(e)
                })
            }
        });

        Suspension::then(resolving, move |ctx, identity: Identity| {
            let result = requirement.check(&identity, &name, challenge);
            ctx.properties_mut().insert(IDENTITY_PROPERTY, identity);
            result?;
            mark_checked(ctx, operation);
            Ok(())
        })
        .into()
    }

    fn name(&self) -> &str {
        "security"
    }
}

fn already_checked(ctx: &RequestContext, operation: OperationId) -> bool {
    ctx.properties().get::<HashSet<OperationId>>(CHECKED_PROPERTY).is_some_and(|checked| checked.contains(&operation))
}

fn mark_checked(ctx: &mut RequestContext, operation: OperationId) {
    let mut checked = ctx.properties().get::<HashSet<OperationId>>(CHECKED_PROPERTY).cloned().unwrap_or_default();
    checked.insert(operation);
    ctx.properties_mut().insert(CHECKED_PROPERTY, checked);
}
