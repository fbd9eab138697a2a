use crate::extract::{Call, FromCall};
use crate::request::RequestHead;
use crate::Failure;
use http::{HeaderMap, Method, Uri};
use std::sync::Arc;

impl FromCall for Method {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(call.head().method().clone())
    }
}

impl FromCall for Uri {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(call.head().uri().clone())
    }
}

impl FromCall for HeaderMap {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(call.head().headers().clone())
    }
}

impl FromCall for RequestHead {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(call.head().clone())
    }
}

impl FromCall for Arc<RequestHead> {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(call.shared_head())
    }
}
