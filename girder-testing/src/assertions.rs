// Response assertions

use crate::TestResponse;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Assert the status code, printing the body on mismatch
#[track_caller]
pub fn assert_status(response: &TestResponse, expected: u16) {
    assert_eq!(
        response.status(),
        expected,
        "Expected status {}, got {}. Body: {}",
        expected,
        response.status(),
        response.text()
    );
}

#[track_caller]
pub fn assert_json<T>(response: &TestResponse, expected: &T)
where
    T: Serialize + DeserializeOwned + PartialEq + Debug,
{
    let actual: T = match response.json() {
        Ok(actual) => actual,
        Err(e) => panic!("Response body is not the expected JSON ({e}): {}", response.text()),
    };
    assert_eq!(actual, *expected, "JSON bodies do not match");
}

#[track_caller]
pub fn assert_header(response: &TestResponse, key: &str, expected: &str) {
    let actual = response.header(key).map(String::as_str);
    assert_eq!(
        actual,
        Some(expected),
        "Expected header '{}' to be '{}', got {:?}",
        key,
        expected,
        actual
    );
}

#[track_caller]
pub fn assert_body_contains(response: &TestResponse, expected: &str) {
    let body = response.text();
    assert!(
        body.contains(expected),
        "Expected body to contain '{}'. Body: {}",
        expected,
        body
    );
}

/// Assert a 2xx status
#[track_caller]
pub fn assert_success(response: &TestResponse) {
    assert!(
        response.is_success(),
        "Expected successful status (2xx), got {}. Body: {}",
        response.status(),
        response.text()
    );
}

/// Assert an error response with the given status and message
#[track_caller]
pub fn assert_error(response: &TestResponse, status: u16, message: &str) {
    assert_status(response, status);
    assert_eq!(
        response.error_message().as_deref(),
        Some(message),
        "Unexpected error message. Body: {}",
        response.text()
    );
}

/// Assert a 400 whose `errors` name exactly `fields`, in order
#[track_caller]
pub fn assert_validation_fields(response: &TestResponse, fields: &[&str]) {
    assert_status(response, 400);
    let body: serde_json::Value = response.json().unwrap_or_default();
    let actual: Vec<&str> = body["errors"]
        .as_array()
        .map(|errors| errors.iter().filter_map(|e| e["field"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(actual, fields, "Unexpected validation fields. Body: {}", response.text());
}

#[cfg(test)]
mod tests {
    use super::*;
    use girder_core::HttpResponse;
    use serde_json::json;

    fn response(status: u16, body: &str) -> TestResponse {
        TestResponse(HttpResponse::new(status).with_body(body.to_string()))
    }

    #[test]
    fn test_assert_status() {
        assert_status(&response(200, "OK"), 200);
    }

    #[test]
    #[should_panic(expected = "Expected status 201, got 200")]
    fn test_assert_status_mismatch() {
        assert_status(&response(200, "OK"), 201);
    }

    #[test]
    fn test_assert_body_contains() {
        assert_body_contains(&response(200, "Hello, World!"), "World");
    }

    #[test]
    fn test_assert_json_and_header() {
        let response = TestResponse(HttpResponse::json(&json!({"id": 1})).unwrap());
        assert_json(&response, &json!({"id": 1}));
        assert_header(&response, "Content-Type", "application/json");
    }

    #[test]
    fn test_assert_validation_fields() {
        let body = json!({
            "statusCode": 400,
            "error": "Bad Request",
            "message": "id: expected an integer",
            "errors": [{"field": "id", "message": "expected an integer"}],
        });
        let response = TestResponse(HttpResponse::new(400).with_json(&body).unwrap());
        assert_validation_fields(&response, &["id"]);
        assert_error(&response, 400, "id: expected an integer");
    }
}
