use crate::error::Unauthenticated;
use crate::properties::Properties;
use crate::request::{PathParams, RequestContext, RequestHead};
use crate::security::Identity;
use crate::Failure;
use bytes::Bytes;
use std::sync::Arc;

/// Everything an operation may read, detached from the request context.
///
/// A call owns its data so that asynchronous and blocking operations can move it off the driver
/// without borrowing the context.
#[derive(Debug, Clone)]
pub struct Call {
    head: Arc<RequestHead>,
    path_params: PathParams,
    body: Option<Bytes>,
    identity: Option<Identity>,
    properties: Properties,
}

impl Call {
    pub fn from_context(ctx: &RequestContext) -> Self {
        Self {
            head: ctx.shared_head(),
            path_params: ctx.path_params().clone(),
            body: ctx.body_bytes().cloned(),
            identity: ctx.identity().cloned(),
            properties: ctx.properties().clone(),
        }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn shared_head(&self) -> Arc<RequestHead> {
        Arc::clone(&self.head)
    }

    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    /// The buffered request body, `None` unless the operation declared it reads the body.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub(crate) fn take_body(&mut self) -> Bytes {
        self.body.take().unwrap_or_default()
    }
}

pub trait FromCall: Sized {
    fn from_call(call: &mut Call) -> Result<Self, Failure>;
}

impl<T: FromCall> FromCall for Option<T> {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(T::from_call(call).ok())
    }
}

impl<T: FromCall> FromCall for Result<T, Failure> {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(T::from_call(call))
    }
}

impl FromCall for () {
    fn from_call(_call: &mut Call) -> Result<Self, Failure> {
        Ok(())
    }
}

impl FromCall for Identity {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        call.identity.clone().ok_or_else(|| Unauthenticated { challenge: None }.into())
    }
}

impl FromCall for Properties {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(call.properties.clone())
    }
}
