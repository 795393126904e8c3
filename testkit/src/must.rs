//! Panicking unwraps for test bodies that would rather fail loudly than propagate.

use crate::error::Result;

pub trait MustSucceed<T> {
    /// Returns the value, or panics with the error's message.
    fn must_succeed(self) -> T;
}

#[allow(clippy::panic)]
impl<T> MustSucceed<T> for Result<T> {
    #[track_caller]
    fn must_succeed(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error;

    #[test]
    fn ok_values_pass_through() {
        let result: Result<u16> = Ok(61616);
        assert_eq!(result.must_succeed(), 61616);
    }

    #[test]
    #[should_panic(expected = "Timed out waiting for broker")]
    fn errors_panic_with_their_message() {
        let result: Result<()> = error::TimeoutSnafu { what: "broker" }.fail();
        result.must_succeed();
    }
}
