//! Result envelope used across every component boundary.
//!
//! A `ValidatedOutput` always carries a value, even on failure, together with
//! every error and warning collected on the way. Composite operations fold
//! their children's results in with [`ValidatedOutput::absorb`] so a single
//! invocation reports the full set of problems instead of the first one.

use serde::Serialize;

use crate::{Error, Result};

/// Success flag, value, accumulated errors and accumulated warnings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedOutput<T> {
    pub success: bool,
    pub value: T,
    pub error: Vec<String>,
    pub warning: Vec<String>,
}

impl<T> ValidatedOutput<T> {
    /// A successful result holding `value`.
    pub fn ok(value: T) -> Self {
        Self {
            success: true,
            value,
            error: Vec::new(),
            warning: Vec::new(),
        }
    }

    /// A failed result holding `value` and a single error.
    pub fn failure(value: T, msg: impl Into<String>) -> Self {
        let mut output = Self::ok(value);
        output.push_error(msg);
        output
    }

    /// Record an error; the result is no longer successful.
    pub fn push_error(&mut self, msg: impl Into<String>) -> &mut Self {
        self.success = false;
        self.error.push(msg.into());
        self
    }

    pub fn push_warning(&mut self, msg: impl Into<String>) -> &mut Self {
        self.warning.push(msg.into());
        self
    }

    /// Fold another result's success, errors and warnings into this one.
    /// The value is left untouched.
    pub fn absorb<U>(&mut self, other: &ValidatedOutput<U>) -> &mut Self {
        self.success = self.success && other.success;
        self.error.extend(other.error.iter().cloned());
        self.warning.extend(other.warning.iter().cloned());
        self
    }

    /// Like [`absorb`](Self::absorb), and additionally take over the value.
    pub fn merge(&mut self, other: ValidatedOutput<T>) -> &mut Self {
        self.absorb(&other);
        self.value = other.value;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.success
    }

    /// Transform the value, keeping status and messages.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ValidatedOutput<U> {
        ValidatedOutput {
            success: self.success,
            value: f(self.value),
            error: self.error,
            warning: self.warning,
        }
    }

    /// Replace the value, keeping status and messages.
    pub fn with_value<U>(self, value: U) -> ValidatedOutput<U> {
        self.map(|_| value)
    }

    /// Chain a dependent step. The step only runs on success; its messages
    /// are appended after the ones already collected.
    pub fn and_then<U: Default>(
        self,
        f: impl FnOnce(T) -> ValidatedOutput<U>,
    ) -> ValidatedOutput<U> {
        if !self.success {
            return self.with_value(U::default());
        }
        let ValidatedOutput {
            value,
            error,
            warning,
            ..
        } = self;
        let mut next = f(value);
        let mut errors = error;
        errors.append(&mut next.error);
        next.error = errors;
        let mut warnings = warning;
        warnings.append(&mut next.warning);
        next.warning = warnings;
        next
    }

    /// Convert to a `Result`, failing with every collected error.
    pub fn into_result(self) -> Result<T> {
        if self.success {
            Ok(self.value)
        } else {
            Err(Error::Other(self.error.join("\n")))
        }
    }
}

impl<T: Default> ValidatedOutput<T> {
    /// A failed result with a default value.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::failure(T::default(), msg)
    }

    pub fn from_error(err: Error) -> Self {
        Self::failed(err.to_string())
    }
}

impl<T: Default> Default for ValidatedOutput<T> {
    fn default() -> Self {
        Self::ok(T::default())
    }
}

impl<T: Default> From<Result<T>> for ValidatedOutput<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::from_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_error_marks_failure() {
        let mut out = ValidatedOutput::ok(1);
        out.push_error("boom");
        assert!(!out.success);
        assert_eq!(out.error, vec!["boom".to_string()]);
        assert_eq!(out.value, 1);
    }

    #[test]
    fn test_push_warning_keeps_success() {
        let mut out = ValidatedOutput::ok(());
        out.push_warning("careful");
        assert!(out.success);
        assert_eq!(out.warning.len(), 1);
    }

    #[test]
    fn test_absorb_keeps_value_and_folds_messages() {
        let mut parent = ValidatedOutput::ok("parent".to_string());
        parent.push_warning("w1");
        let mut child = ValidatedOutput::ok(42);
        child.push_error("e1").push_warning("w2");

        parent.absorb(&child);
        assert!(!parent.success);
        assert_eq!(parent.value, "parent");
        assert_eq!(parent.error, vec!["e1"]);
        assert_eq!(parent.warning, vec!["w1", "w2"]);
    }

    #[test]
    fn test_absorb_success_does_not_clear_failure() {
        let mut parent: ValidatedOutput<()> = ValidatedOutput::failed("first");
        parent.absorb(&ValidatedOutput::ok(()));
        assert!(!parent.success);
        assert_eq!(parent.error, vec!["first"]);
    }

    #[test]
    fn test_merge_replaces_value() {
        let mut parent = ValidatedOutput::ok(vec![1]);
        let mut child = ValidatedOutput::ok(vec![2, 3]);
        child.push_warning("w");
        parent.merge(child);
        assert!(parent.success);
        assert_eq!(parent.value, vec![2, 3]);
        assert_eq!(parent.warning, vec!["w"]);
    }

    #[test]
    fn test_and_then_short_circuits_on_failure() {
        let out: ValidatedOutput<i32> = ValidatedOutput::failed("nope");
        let mut ran = false;
        let next: ValidatedOutput<String> = out.and_then(|v| {
            ran = true;
            ValidatedOutput::ok(v.to_string())
        });
        assert!(!ran);
        assert!(!next.success);
        assert_eq!(next.error, vec!["nope"]);
        assert_eq!(next.value, "");
    }

    #[test]
    fn test_and_then_accumulates_messages_in_order() {
        let mut first = ValidatedOutput::ok(2);
        first.push_warning("from first");
        let next = first.and_then(|v| {
            let mut out = ValidatedOutput::ok(v * 10);
            out.push_warning("from second");
            out
        });
        assert_eq!(next.value, 20);
        assert_eq!(next.warning, vec!["from first", "from second"]);
    }

    #[test]
    fn test_into_result_joins_errors() {
        let mut out = ValidatedOutput::ok(());
        out.push_error("a").push_error("b");
        let err = out.into_result().unwrap_err();
        assert_eq!(err.to_string(), "a\nb");
    }

    #[test]
    fn test_from_result_error() {
        let res: Result<u8> = Err(Error::NotFound("thing".into()));
        let out: ValidatedOutput<u8> = res.into();
        assert!(!out.success);
        assert_eq!(out.error, vec!["Not found: thing"]);
    }
}
