//! Declarative classification of remote errors.
//!
//! Every call site of the poll driver uses one of the tables below, so the
//! same error code is treated the same way everywhere.

use crate::remote::RemoteError;
use crate::remote::error::{CHANGE_SET_NOT_FOUND, REQUEST_ERROR, THROTTLING, VALIDATION_ERROR};

/// Expected outcomes that the control plane reports as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Benign {
    /// The submitted template and parameters change nothing.
    NoChanges,
    /// The stack (or resource) is not there.
    Absent,
    /// The stack is in the middle of another operation.
    StackBusy,
}

/// What the poll driver does with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    Benign(Benign),
    Fatal,
}

/// One row of a classification table. `None` fields match anything.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub code: Option<&'static str>,
    pub message: Option<&'static str>,
    pub verdict: Verdict,
}

impl Rule {
    pub const fn code(code: &'static str, verdict: Verdict) -> Self {
        Self {
            code: Some(code),
            message: None,
            verdict,
        }
    }

    pub const fn message(code: &'static str, message: &'static str, verdict: Verdict) -> Self {
        Self {
            code: Some(code),
            message: Some(message),
            verdict,
        }
    }

    fn matches(&self, error: &RemoteError) -> bool {
        self.code.is_none_or(|code| code == error.code)
            && self
                .message
                .is_none_or(|needle| error.message.contains(needle))
    }
}

/// Ordered rule list; the first matching rule wins, anything else is fatal.
#[derive(Debug, Clone, Copy)]
pub struct ErrorTable {
    rules: &'static [Rule],
}

impl ErrorTable {
    pub const fn new(rules: &'static [Rule]) -> Self {
        Self { rules }
    }

    pub fn classify(&self, error: &RemoteError) -> Verdict {
        self.rules
            .iter()
            .find(|rule| rule.matches(error))
            .map(|rule| rule.verdict)
            .unwrap_or(Verdict::Fatal)
    }
}

const TRANSIENT: [Rule; 4] = [
    Rule::code(THROTTLING, Verdict::Retry),
    Rule::code(REQUEST_ERROR, Verdict::Retry),
    Rule::code(CHANGE_SET_NOT_FOUND, Verdict::Retry),
    Rule::message(VALIDATION_ERROR, "S3 error: Access Denied", Verdict::Retry),
];

const EXPECTED: [Rule; 3] = [
    Rule::message(
        VALIDATION_ERROR,
        "didn't contain changes",
        Verdict::Benign(Benign::NoChanges),
    ),
    Rule::message(
        VALIDATION_ERROR,
        "No updates are to be performed",
        Verdict::Benign(Benign::NoChanges),
    ),
    Rule::message(
        VALIDATION_ERROR,
        "IN_PROGRESS",
        Verdict::Benign(Benign::StackBusy),
    ),
];

const ABSENT: Rule = Rule::message(
    VALIDATION_ERROR,
    "does not exist",
    Verdict::Benign(Benign::Absent),
);

static STANDARD_RULES: [Rule; 7] = [
    TRANSIENT[0],
    TRANSIENT[1],
    TRANSIENT[2],
    TRANSIENT[3],
    EXPECTED[0],
    EXPECTED[1],
    EXPECTED[2],
];

static TRACKING_RULES: [Rule; 8] = [
    TRANSIENT[0],
    TRANSIENT[1],
    TRANSIENT[2],
    TRANSIENT[3],
    ABSENT,
    EXPECTED[0],
    EXPECTED[1],
    EXPECTED[2],
];

/// Rules for mutating calls, validation and changeset handling.
pub static STANDARD: ErrorTable = ErrorTable::new(&STANDARD_RULES);

/// Rules for status reads, where a missing stack is an answer, not a failure.
pub static TRACKING: ErrorTable = ErrorTable::new(&TRACKING_RULES);

#[cfg(test)]
mod tests {
    use super::*;

    fn err(code: &str, message: &str) -> RemoteError {
        RemoteError::new(code, message)
    }

    #[test]
    fn transient_codes_retry() {
        for code in [THROTTLING, REQUEST_ERROR, CHANGE_SET_NOT_FOUND] {
            assert_eq!(STANDARD.classify(&err(code, "anything")), Verdict::Retry);
            assert_eq!(TRACKING.classify(&err(code, "anything")), Verdict::Retry);
        }
    }

    #[test]
    fn object_storage_access_denied_is_transient() {
        let error = err(
            VALIDATION_ERROR,
            "Template format error: S3 error: Access Denied",
        );
        assert_eq!(STANDARD.classify(&error), Verdict::Retry);
    }

    #[test]
    fn no_changes_is_benign() {
        let error = err(
            VALIDATION_ERROR,
            "The submitted information didn't contain changes. Submit different information to create a change set.",
        );
        assert_eq!(
            STANDARD.classify(&error),
            Verdict::Benign(Benign::NoChanges)
        );
        let error = err(VALIDATION_ERROR, "No updates are to be performed.");
        assert_eq!(
            STANDARD.classify(&error),
            Verdict::Benign(Benign::NoChanges)
        );
    }

    #[test]
    fn missing_stack_only_benign_while_tracking() {
        let error = err(VALIDATION_ERROR, "Stack with id api does not exist");
        assert_eq!(TRACKING.classify(&error), Verdict::Benign(Benign::Absent));
        assert_eq!(STANDARD.classify(&error), Verdict::Fatal);
    }

    #[test]
    fn busy_stack_is_benign() {
        let error = err(
            VALIDATION_ERROR,
            "Stack:arn:aws:cloudformation:eu-west-1:1:stack/api is in UPDATE_IN_PROGRESS state and can not be updated.",
        );
        assert_eq!(
            STANDARD.classify(&error),
            Verdict::Benign(Benign::StackBusy)
        );
    }

    #[test]
    fn unknown_codes_are_fatal() {
        assert_eq!(
            STANDARD.classify(&err("AccessDenied", "not authorized")),
            Verdict::Fatal
        );
        assert_eq!(
            STANDARD.classify(&err(VALIDATION_ERROR, "Template format error")),
            Verdict::Fatal
        );
    }
}
