use crate::extract::{Call, FromCall};
use crate::Failure;

/// impl `FromCall` for tuples, arguments are extracted left to right and the first failure wins
macro_rules! impl_from_call_for_tuple {
    ($($param:ident)*) => {
        impl<$($param,)*> FromCall for ($($param,)*)
        where
            $($param: FromCall,)*
        {
            #[allow(non_snake_case)]
            fn from_call(call: &mut Call) -> Result<Self, Failure> {
                Ok(($($param::from_call(call)?,)*))
            }
        }
    }
}

impl_from_call_for_tuple! { A }
impl_from_call_for_tuple! { A B }
impl_from_call_for_tuple! { A B C }
impl_from_call_for_tuple! { A B C D }
impl_from_call_for_tuple! { A B C D E }
impl_from_call_for_tuple! { A B C D E F }
impl_from_call_for_tuple! { A B C D E F G }
impl_from_call_for_tuple! { A B C D E F G H }
impl_from_call_for_tuple! { A B C D E F G H I }
impl_from_call_for_tuple! { A B C D E F G H I J }
impl_from_call_for_tuple! { A B C D E F G H I J K }
impl_from_call_for_tuple! { A B C D E F G H I J K L }

#[cfg(test)]
mod tests {
    use crate::body::RequestBody;
    use crate::error::{BodyReadError, WebError};
    use crate::extract::{Call, FromCall, Json, Path, Query};
    use crate::request::{PathParams, RequestContext};
    use crate::worker::WorkerPool;
    use bytes::Bytes;
    use http::{Method, Request};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct UserPath {
        id: u64,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Paging {
        page: u32,
        size: Option<u32>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct NewUser {
        name: String,
    }

    fn call(uri: &str, params: PathParams, body: Option<&'static str>) -> Call {
        let request = Request::builder().method(Method::POST).uri(uri).body(RequestBody::empty()).unwrap();
        let mut ctx = RequestContext::new(request, WorkerPool::new(1));
        ctx.set_path_params(params);
        if let Some(body) = body {
            ctx.set_body_bytes(Bytes::from_static(body.as_bytes()));
        }
        Call::from_context(&ctx)
    }

    #[test]
    fn extracts_tuple_left_to_right() {
        let params: PathParams = [("id", "42")].into_iter().collect();
        let mut call = call("/users/42?page=2", params, Some(r#"{"name":"bob"}"#));

        let (Path(path), Query(paging), Json(user), method) =
            <(Path<UserPath>, Query<Paging>, Json<NewUser>, Method)>::from_call(&mut call).unwrap();

        assert_eq!(path, UserPath { id: 42 });
        assert_eq!(paging, Paging { page: 2, size: None });
        assert_eq!(user, NewUser { name: "bob".into() });
        assert_eq!(method, Method::POST);
    }

    #[test]
    fn invalid_path_is_bad_request() {
        let params: PathParams = [("id", "abc")].into_iter().collect();
        let mut call = call("/users/abc", params, None);
        let failure = Path::<UserPath>::from_call(&mut call).unwrap_err();
        assert!(failure.is::<WebError>());
    }

    #[test]
    fn invalid_json_is_body_error() {
        let mut call = call("/users", PathParams::empty(), Some("{"));
        let failure = Json::<NewUser>::from_call(&mut call).unwrap_err();
        assert!(failure.is::<BodyReadError>());
    }

    #[test]
    fn optional_argument_swallows_failure() {
        let mut call = call("/users", PathParams::empty(), None);
        let identity = Option::<crate::security::Identity>::from_call(&mut call).unwrap();
        assert!(identity.is_none());
    }
}
