//! Phase registry: customizers contribute handlers per phase and target at build time.
//!
//! Every target-operation is resolved exactly once, when the pipeline is built. The registry asks
//! each customizer, in registration order, for its handlers of a phase and concatenates the
//! answers into an immutable [`HandlerChain`]. Requests only ever walk those frozen chains.

use crate::exception::ExceptionMappers;
use crate::handler::{HandlerChain, Phase, SharedHandler};
use crate::operation::{InvokeHandler, SharedOperation};
use crate::security::SecurityRequirement;
use http::Method;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use tracing::debug;

/// Index of a target-operation, assigned in route registration order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(usize);

impl OperationId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether the pipeline buffers the request body before the operation runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BodyMode {
    #[default]
    Ignore,
    Buffer,
}

/// The static description of a target-operation, what customizers decide on.
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    id: OperationId,
    name: String,
    method: Option<Method>,
    path: String,
    security: Option<SecurityRequirement>,
    body: BodyMode,
    attributes: HashMap<String, String>,
}

impl OperationDescriptor {
    pub fn new<N: Into<String>, P: Into<String>>(id: OperationId, name: N, path: P) -> Self {
        Self {
            id,
            name: name.into(),
            method: None,
            path: path.into(),
            security: None,
            body: BodyMode::Ignore,
            attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: Option<Method>) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_security(mut self, security: Option<SecurityRequirement>) -> Self {
        self.security = security;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: BodyMode) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` when the route accepts any method.
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn security(&self) -> Option<&SecurityRequirement> {
        self.security.as_ref()
    }

    pub fn body(&self) -> BodyMode {
        self.body
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A contributor of phase handlers.
///
/// `contribute` is called once per target for [`Phase::PostMatch`] and [`Phase::PostInvoke`],
/// `pre_match` once per pipeline. The invoke phase is owned by the pipeline.
pub trait Customizer: Send + Sync {
    fn pre_match(&self) -> Vec<SharedHandler> {
        Vec::new()
    }

    fn contribute(&self, phase: Phase, target: &OperationDescriptor) -> Vec<SharedHandler>;
}

/// The frozen handler chains of one target.
#[derive(Debug, Clone)]
pub struct PhaseChains {
    post_match: HandlerChain,
    invoke: HandlerChain,
    post_invoke: HandlerChain,
}

impl PhaseChains {
    /// The chain of `phase`, pre-match handlers are shared by every target and live in the
    /// registry instead.
    pub fn get(&self, phase: Phase) -> Option<&HandlerChain> {
        match phase {
            Phase::PreMatch => None,
            Phase::PostMatch => Some(&self.post_match),
            Phase::Invoke => Some(&self.invoke),
            Phase::PostInvoke => Some(&self.post_invoke),
        }
    }
}

/// A resolved target-operation: descriptor, operation, chains and resource-local mappers.
pub struct Target {
    descriptor: OperationDescriptor,
    operation: SharedOperation,
    chains: PhaseChains,
    mappers: ExceptionMappers,
}

impl Target {
    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    pub fn operation(&self) -> &SharedOperation {
        &self.operation
    }

    pub fn chains(&self) -> &PhaseChains {
        &self.chains
    }

    /// Mappers registered for this target only, consulted before the global ones.
    pub fn mappers(&self) -> &ExceptionMappers {
        &self.mappers
    }
}

impl Debug for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target").field("descriptor", &self.descriptor).field("chains", &self.chains).finish_non_exhaustive()
    }
}

pub struct PhaseRegistry {
    customizers: Vec<Arc<dyn Customizer>>,
    pre_match: HandlerChain,
}

impl PhaseRegistry {
    pub fn builder() -> PhaseRegistryBuilder {
        PhaseRegistryBuilder::new()
    }

    /// The global pre-match chain.
    pub fn pre_match(&self) -> &HandlerChain {
        &self.pre_match
    }

    /// Concatenates the contributions of every customizer for `phase` and `descriptor`.
    pub fn chain(&self, phase: Phase, descriptor: &OperationDescriptor) -> HandlerChain {
        let handlers = self.customizers.iter().flat_map(|customizer| customizer.contribute(phase, descriptor)).collect();
        HandlerChain::new(handlers)
    }

    /// Freezes the chains of one target.
    pub fn resolve(&self, descriptor: OperationDescriptor, operation: SharedOperation, mappers: ExceptionMappers) -> Target {
        let post_match = self.chain(Phase::PostMatch, &descriptor);
        let post_invoke = self.chain(Phase::PostInvoke, &descriptor);
        let invoke_handler: SharedHandler = Arc::new(InvokeHandler::new(Arc::clone(&operation)));
        let invoke = HandlerChain::new(vec![invoke_handler]);

        debug!(
            operation = descriptor.name(),
            post_match = ?post_match,
            post_invoke = ?post_invoke,
            "resolved handler chains"
        );

        Target { descriptor, operation, chains: PhaseChains { post_match, invoke, post_invoke }, mappers }
    }
}

impl Debug for PhaseRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseRegistry")
            .field("customizers", &self.customizers.len())
            .field("pre_match", &self.pre_match)
            .finish()
    }
}

pub struct PhaseRegistryBuilder {
    customizers: Vec<Arc<dyn Customizer>>,
}

impl PhaseRegistryBuilder {
    fn new() -> Self {
        Self { customizers: vec![] }
    }

    pub fn add_last<C: Customizer + 'static>(self, customizer: C) -> Self {
        self.add_shared_last(Arc::new(customizer))
    }

    pub fn add_first<C: Customizer + 'static>(mut self, customizer: C) -> Self {
        self.customizers.insert(0, Arc::new(customizer));
        self
    }

    pub fn add_shared_last(mut self, customizer: Arc<dyn Customizer>) -> Self {
        self.customizers.push(customizer);
        self
    }

    pub fn build(self) -> PhaseRegistry {
        let pre_match = HandlerChain::new(self.customizers.iter().flat_map(|customizer| customizer.pre_match()).collect());
        PhaseRegistry { customizers: self.customizers, pre_match }
    }
}

/// A customizer built from a closure, handy for contributions that only depend on the phase.
pub struct FnCustomizer<F> {
    f: F,
}

pub fn customizer_fn<F>(f: F) -> FnCustomizer<F>
where
    F: Fn(Phase, &OperationDescriptor) -> Vec<SharedHandler> + Send + Sync,
{
    FnCustomizer { f }
}

impl<F> Customizer for FnCustomizer<F>
where
    F: Fn(Phase, &OperationDescriptor) -> Vec<SharedHandler> + Send + Sync,
{
    fn contribute(&self, phase: Phase, target: &OperationDescriptor) -> Vec<SharedHandler> {
        (self.f)(phase, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Call;
    use crate::handler::{handler_fn, HandlerOutcome};
    use crate::operation::Invocation;
    use crate::reply::Reply;

    fn tagged(tag: &'static str) -> SharedHandler {
        handler_fn(tag, |_ctx| HandlerOutcome::Completed)
    }

    struct Tagging(&'static str);

    impl Customizer for Tagging {
        fn pre_match(&self) -> Vec<SharedHandler> {
            vec![tagged(self.0)]
        }

        fn contribute(&self, phase: Phase, _target: &OperationDescriptor) -> Vec<SharedHandler> {
            match phase {
                Phase::PostMatch => vec![tagged(self.0)],
                _ => vec![],
            }
        }
    }

    fn operation() -> SharedOperation {
        Arc::new(|_call: Call| Invocation::Ready(Ok(Reply::ok())))
    }

    #[test]
    fn contributions_follow_registration_order() {
        let registry = PhaseRegistry::builder()
            .add_last(Tagging("b"))
            .add_last(Tagging("c"))
            .add_first(Tagging("a"))
            .add_last(customizer_fn(|phase, target| match phase {
                Phase::PostInvoke if target.attribute("audit").is_some() => vec![tagged("audit")],
                _ => vec![],
            }))
            .build();

        assert_eq!(registry.pre_match().names(), vec!["a", "b", "c"]);

        let mut attributes = HashMap::new();
        attributes.insert("audit".to_string(), "yes".to_string());
        let descriptor = OperationDescriptor::new(OperationId::new(0), "list", "/items").with_attributes(attributes);
        let target = registry.resolve(descriptor, operation(), ExceptionMappers::empty());

        assert_eq!(target.chains().get(Phase::PostMatch).unwrap().names(), vec!["a", "b", "c"]);
        assert_eq!(target.chains().get(Phase::Invoke).unwrap().names(), vec!["invoke"]);
        assert_eq!(target.chains().get(Phase::PostInvoke).unwrap().names(), vec!["audit"]);
        assert!(target.chains().get(Phase::PreMatch).is_none());
    }

    #[test]
    fn descriptor_defaults() {
        let descriptor = OperationDescriptor::new(OperationId::new(3), "get", "/a/{id}");
        assert_eq!(descriptor.id().index(), 3);
        assert_eq!(descriptor.body(), BodyMode::Ignore);
        assert!(descriptor.security().is_none());
        assert!(descriptor.method().is_none());
        assert_eq!(descriptor.id().to_string(), "#3");
    }
}
