//! Interpretation of device responses.
//!
//! A successful wire exchange becomes an [`OperationOutcome`] echoing the
//! parameters that produced it, so downstream consumers can correlate
//! request and response. Responses carrying a Modbus exception code get the
//! standard human-readable description attached; a response carrying nothing
//! at all is dropped without producing output.

use crate::params::RequestParams;
use crate::transport::{Payload, Response};

/// The standard description for a Modbus exception code. Codes outside the
/// table yield `None`; that is not an error.
pub fn exception_description(code: u8) -> Option<&'static str> {
    match code {
        1 => Some(
            "Function code received in the query is not recognized or allowed by slave",
        ),
        2 => Some(
            "Data address of some or all the required entities are not allowed or do not exist \
             in slave",
        ),
        3 => Some("Value is not accepted by slave"),
        4 => Some(
            "Unrecoverable error occurred while slave was attempting to perform requested action",
        ),
        5 => Some(
            "Slave has accepted request and is processing it, but a long duration of time is \
             required. This response is returned to prevent a timeout error from occurring in \
             the master. Master can next issue a Poll Program Complete message to determine if \
             processing is completed",
        ),
        6 => Some(
            "Slave is engaged in processing a long-duration command. Master should retry later",
        ),
        7 => Some(
            "Slave cannot perform the programming functions. Master should request diagnostic \
             or error information from slave",
        ),
        8 => Some(
            "Slave detected a parity error in memory. Master can retry the request, but service \
             may be required on the slave device",
        ),
        10 => Some("Specialized for Modbus gateways. Indicates a misconfigured gateway"),
        11 => Some("Specialized for Modbus gateways. Sent when slave fails to respond"),
        _ => None,
    }
}

/// One executed operation's result, emitted downstream.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct OperationOutcome {
    /// The parameters the operation ran with, echoed for correlation.
    pub params: RequestParams,
    pub payload: Payload,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub exception_code: Option<u8>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub exception_details: Option<&'static str>,
    /// Set when the engine produced an error-shaped outcome instead of
    /// executing, e.g. for admission-rejected operations.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub error: Option<String>,
}

impl OperationOutcome {
    /// An error-shaped outcome for an operation that never executed.
    pub fn skipped(params: RequestParams, error: impl Into<String>) -> Self {
        Self {
            params,
            payload: Payload::Empty,
            exception_code: None,
            exception_details: None,
            error: Some(error.into()),
        }
    }
}

/// Wraps a raw response into an outcome, or discards it.
///
/// A falsy response, one with neither data nor exception code, yields
/// `None`: the device acknowledged nothing and no output is produced.
pub fn interpret(response: Response, params: RequestParams) -> Option<OperationOutcome> {
    if response.is_empty() {
        return None;
    }
    let exception_details = response
        .exception_code
        .filter(|code| *code != 0)
        .and_then(exception_description);
    Some(OperationOutcome {
        params,
        payload: response.payload,
        exception_code: response.exception_code,
        exception_details,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DeviceKey;
    use std::collections::HashSet;

    fn params() -> RequestParams {
        RequestParams {
            device: DeviceKey::from("127.0.0.1:502"),
            address: 0,
            count: None,
            value: None,
        }
    }

    #[test]
    fn known_codes_have_distinct_descriptions() {
        let mut seen = HashSet::new();
        for code in [1, 2, 3, 4, 5, 6, 7, 8, 10, 11] {
            let description = exception_description(code)
                .unwrap_or_else(|| panic!("code {code} is missing a description"));
            assert!(!description.is_empty());
            assert!(seen.insert(description), "duplicate description for {code}");
        }
    }

    #[test]
    fn unknown_codes_have_no_description() {
        for code in [0, 9, 12, 42, 255] {
            assert_eq!(exception_description(code), None);
        }
    }

    #[test]
    fn empty_response_produces_nothing() {
        assert_eq!(
            interpret(Response::with_payload(Payload::Coils(Vec::new())), params()),
            None
        );
        assert_eq!(
            interpret(Response::with_payload(Payload::Empty), params()),
            None
        );
    }

    #[test]
    fn outcome_echoes_params() {
        let outcome = interpret(
            Response::with_payload(Payload::Coils(vec![true, false])),
            params(),
        )
        .unwrap();
        assert_eq!(outcome.params.address, 0);
        assert_eq!(outcome.payload, Payload::Coils(vec![true, false]));
        assert_eq!(outcome.exception_code, None);
        assert_eq!(outcome.exception_details, None);
        assert_eq!(outcome.error, None);
    }

    #[test]
    fn exception_codes_get_details_attached() {
        let outcome = interpret(Response::exception(2), params()).unwrap();
        assert_eq!(outcome.exception_code, Some(2));
        assert_eq!(outcome.exception_details, exception_description(2));

        // Unknown code: carried through, but no description attached.
        let outcome = interpret(Response::exception(12), params()).unwrap();
        assert_eq!(outcome.exception_code, Some(12));
        assert_eq!(outcome.exception_details, None);
    }
}
