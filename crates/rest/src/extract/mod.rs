//! Typed arguments for operations.
//!
//! An operation built with [`operation_fn`](crate::operation_fn) declares what it needs from the
//! request through its argument types, every argument implements [`FromCall`]. Extraction runs on
//! the driver right before the operation is invoked, after the body has been buffered.

mod extract_body;
mod extract_header;
mod extract_tuple;
mod extract_url;
mod from_call;

pub use from_call::{Call, FromCall};

/// Represented as json data
///
/// when `post` as a `application/json`, we can using this struct to inject data,
/// note: the struct must impl [`serde::Deserialize`]. Returning a `Json` from an operation
/// serializes the value as the reply body.
///
/// # Example
/// ```
/// # use serde::Deserialize;
/// # use micro_rest::extract::Json;
/// # #[allow(dead_code)]
/// #[derive(Deserialize, Debug)]
/// struct Params {
///     name: String,
///     zip: String,
/// }
///
/// pub async fn handle(Json(params) : Json<Params>) -> String {
///     format!("received params: {:?}", params)
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

/// Represented as url query data
///
/// when request with url query, we can using this struct to inject data,
/// note: the struct must impl [`serde::Deserialize`]
///
/// # Example
/// ```
/// # use serde::Deserialize;
/// # use micro_rest::extract::Query;
/// # #[allow(dead_code)]
/// #[derive(Deserialize, Debug)]
/// struct Params {
///     name: String,
///     zip: String,
/// }
///
/// pub async fn handle(Query(params) : Query<Params>) -> String {
///     format!("received params: {:?}", params)
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query<T>(pub T);

/// Path parameters bound by the router, deserialized into `T`.
///
/// # Example
/// ```
/// # use serde::Deserialize;
/// # use micro_rest::extract::Path;
/// # #[allow(dead_code)]
/// #[derive(Deserialize, Debug)]
/// struct UserPath {
///     id: u64,
/// }
///
/// pub async fn handle(Path(path) : Path<UserPath>) -> String {
///     format!("user {}", path.id)
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path<T>(pub T);
