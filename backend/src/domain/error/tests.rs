//! Tests for domain error construction and serialisation.

use super::*;
use rstest::rstest;
use serde_json::json;

#[rstest]
#[case(Error::invalid_request("bad"), ErrorCode::InvalidRequest, 400)]
#[case(Error::unauthorized("nope"), ErrorCode::Unauthorized, 401)]
#[case(Error::not_found("gone"), ErrorCode::NotFound, 404)]
#[case(Error::conflict("taken"), ErrorCode::Conflict, 409)]
#[case(Error::insufficient_funds("short"), ErrorCode::InsufficientFunds, 422)]
#[case(Error::invalid_code("stale"), ErrorCode::InvalidCode, 422)]
#[case(Error::service_unavailable("down"), ErrorCode::ServiceUnavailable, 503)]
#[case(Error::internal("boom"), ErrorCode::InternalError, 500)]
fn constructors_set_code_and_status(
    #[case] error: Error,
    #[case] code: ErrorCode,
    #[case] status: u16,
) {
    assert_eq!(error.code(), code);
    assert_eq!(error.code().status_hint(), status);
}

#[rstest]
fn blank_messages_fall_back_to_code_description() {
    let error = Error::new(ErrorCode::InsufficientFunds, "   ");
    assert_eq!(error.message(), "insufficient funds");
}

#[rstest]
fn display_uses_message() {
    let error = Error::not_found("account 3 does not exist");
    assert_eq!(error.to_string(), "account 3 does not exist");
}

#[rstest]
fn serialises_code_in_snake_case_and_skips_empty_details() {
    let value = serde_json::to_value(Error::invalid_code("expired")).expect("serialise");
    assert_eq!(value, json!({ "code": "invalid_code", "message": "expired" }));
}

#[rstest]
fn details_round_trip_through_serde() {
    let error = Error::conflict("duplicate").with_details(json!({ "reason": "duplicate_email" }));
    let value = serde_json::to_value(&error).expect("serialise");
    let decoded: Error = serde_json::from_value(value).expect("deserialise");
    assert_eq!(decoded, error);
}
