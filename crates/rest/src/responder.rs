//! Converts operation results into replies.
//!
//! This module provides the [`Responder`] trait which defines how different types
//! can be turned into a [`Reply`]. It includes implementations for common types
//! like Result, Option, String, etc.

use crate::extract::Json;
use crate::reply::Reply;
use crate::streaming::StreamingEmitter;
use crate::Failure;
use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use std::convert::Infallible;

/// A trait for types that can be returned from an operation.
pub trait Responder {
    fn into_reply(self) -> Result<Reply, Failure>;
}

impl Responder for Reply {
    fn into_reply(self) -> Result<Reply, Failure> {
        Ok(self)
    }
}

/// The error side of a result is handed to the exception mappers.
impl<T, E> Responder for Result<T, E>
where
    T: Responder,
    E: Into<Failure>,
{
    fn into_reply(self) -> Result<Reply, Failure> {
        self.map_err(Into::into)?.into_reply()
    }
}

/// `None` answers with `204 No Content`.
impl<T: Responder> Responder for Option<T> {
    fn into_reply(self) -> Result<Reply, Failure> {
        match self {
            Some(t) => t.into_reply(),
            None => Ok(Reply::status(StatusCode::NO_CONTENT)),
        }
    }
}

impl<T: Responder> Responder for (StatusCode, T) {
    fn into_reply(self) -> Result<Reply, Failure> {
        let (status, responder) = self;
        Ok(responder.into_reply()?.with_status(status))
    }
}

impl<T: Responder> Responder for Box<T> {
    fn into_reply(self) -> Result<Reply, Failure> {
        (*self).into_reply()
    }
}

impl Responder for () {
    fn into_reply(self) -> Result<Reply, Failure> {
        Ok(Reply::ok())
    }
}

impl Responder for &'static str {
    fn into_reply(self) -> Result<Reply, Failure> {
        Ok(Reply::text(self))
    }
}

impl Responder for String {
    fn into_reply(self) -> Result<Reply, Failure> {
        Ok(Reply::text(self))
    }
}

impl Responder for Bytes {
    fn into_reply(self) -> Result<Reply, Failure> {
        Ok(Reply::bytes(self))
    }
}

impl Responder for StatusCode {
    fn into_reply(self) -> Result<Reply, Failure> {
        Ok(Reply::status(self))
    }
}

impl<T: Serialize> Responder for Json<T> {
    fn into_reply(self) -> Result<Reply, Failure> {
        Reply::json(&self.0)
    }
}

impl Responder for StreamingEmitter {
    fn into_reply(self) -> Result<Reply, Failure> {
        Ok(Reply::stream(self))
    }
}

impl Responder for Infallible {
    fn into_reply(self) -> Result<Reply, Failure> {
        match self {}
    }
}
