//! URL extraction: path parameters and the query string.
//!
//! Both [`Path`] and [`Query`] are deserialized with `serde_qs`, path parameters are first laid
//! out as a query string so numbers and booleans parse the same way in both places.

use crate::error::WebError;
use crate::extract::{Call, FromCall, Path, Query};
use crate::request::PathParams;
use crate::Failure;
use serde::de::DeserializeOwned;

impl FromCall for PathParams {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        Ok(call.path_params().clone())
    }
}

impl<T: DeserializeOwned> FromCall for Path<T> {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        let encoded = encode_params(call.path_params());
        serde_qs::from_str::<T>(&encoded).map(Path).map_err(|e| WebError::bad_request(format!("invalid path: {e}")).into())
    }
}

impl<T: DeserializeOwned> FromCall for Query<T> {
    fn from_call(call: &mut Call) -> Result<Self, Failure> {
        let query = call.head().uri().query().unwrap_or_default();
        serde_qs::from_str::<T>(query).map(Query).map_err(|e| WebError::bad_request(format!("invalid query: {e}")).into())
    }
}

fn encode_params(params: &PathParams) -> String {
    let mut encoded = String::new();
    for (key, value) in params.iter() {
        if !encoded.is_empty() {
            encoded.push('&');
        }
        encoded.push_str(key);
        encoded.push('=');
        for c in value.chars() {
            match c {
                '&' => encoded.push_str("%26"),
                '=' => encoded.push_str("%3D"),
                '+' => encoded.push_str("%2B"),
                '[' => encoded.push_str("%5B"),
                ']' => encoded.push_str("%5D"),
                c => encoded.push(c),
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::encode_params;
    use crate::request::PathParams;

    #[test]
    fn reserved_characters_are_escaped() {
        let params: PathParams = [("a", "x&y=z"), ("b", "1")].into_iter().collect();
        assert_eq!(encode_params(&params), "a=x%26y%3Dz&b=1");
    }
}
