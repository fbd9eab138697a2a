use crate::error::BodyReadError;
use crate::extract::{Call, FromCall, Json};
use crate::Failure;
use bytes::Bytes;
use serde::de::DeserializeOwned;

impl FromCall for Bytes {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(call.take_body())
    }
}

impl FromCall for String {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        let bytes = call.take_body();
        // todo: honor the charset of the content type
        String::from_utf8(bytes.into()).map_err(|_| BodyReadError::new("request body is not utf8").into())
    }
}

impl<T: DeserializeOwned> FromCall for Json<T> {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        let bytes = call.take_body();
        serde_json::from_slice::<T>(&bytes).map(Json).map_err(|e| BodyReadError::new(e).into())
    }
}
