//! The user-presence polling loop.
//!
//! CTAP1 devices answer `SW_CONDITIONS_NOT_SATISFIED` until the user
//! touches the key; the driver turns that status into a bounded wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{ClientError, Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(250);

/// Cooperative cancellation flag shared with an enclosing scope. The
/// driver checks it at every wake.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Cancel::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Repeats `op` until it succeeds, fails with something other than a
/// user-presence status, or the budget runs out.
///
/// One attempt is always made. On `USE_NOT_SATISFIED` the driver sleeps
/// `min(delay, remaining budget)` and retries; once the deadline has
/// passed it fails with `TIMEOUT`. Every other failure propagates
/// unchanged.
pub fn call_polling<T, F>(
    timeout: Option<Duration>,
    delay: Duration,
    cancel: Option<&Cancel>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let deadline = Instant::now() + timeout.unwrap_or(DEFAULT_TIMEOUT);
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(Error::Apdu(e)) if e.is_use_not_satisfied() => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(ClientError::Timeout.into());
                }
                thread::sleep(delay.min(deadline - now));
                if cancel.map_or(false, Cancel::is_cancelled) {
                    return Err(ClientError::Timeout.into());
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApduError, SW_CONDITIONS_NOT_SATISFIED, SW_WRONG_DATA};

    fn touch_needed<T>() -> Result<T> {
        Err(ApduError::new(SW_CONDITIONS_NOT_SATISFIED).into())
    }

    #[test]
    fn test_success_on_second_attempt() {
        let mut attempts = 0;
        let result = call_polling(
            Some(Duration::from_secs(2)),
            Duration::from_millis(1),
            None,
            || {
                attempts += 1;
                if attempts < 2 {
                    touch_needed()
                } else {
                    Ok(42)
                }
            },
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_zero_timeout_single_attempt() {
        let mut attempts = 0;
        let result: Result<()> = call_polling(
            Some(Duration::ZERO),
            Duration::from_millis(250),
            None,
            || {
                attempts += 1;
                touch_needed()
            },
        );
        assert_eq!(attempts, 1);
        match result.unwrap_err() {
            Error::Client(ClientError::Timeout) => {}
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_bounds_attempts() {
        let start = Instant::now();
        let mut attempts = 0;
        let result: Result<()> = call_polling(
            Some(Duration::from_millis(100)),
            Duration::from_millis(25),
            None,
            || {
                attempts += 1;
                touch_needed()
            },
        );
        assert!(matches!(
            result.unwrap_err(),
            Error::Client(ClientError::Timeout)
        ));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(attempts <= 6);
    }

    #[test]
    fn test_other_apdu_error_propagates() {
        let result: Result<()> = call_polling(
            Some(Duration::from_secs(1)),
            Duration::from_millis(1),
            None,
            || Err(ApduError::new(SW_WRONG_DATA).into()),
        );
        match result.unwrap_err() {
            Error::Apdu(e) => assert_eq!(e.sw, SW_WRONG_DATA),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_cancel_stops_at_next_wake() {
        let cancel = Cancel::new();
        cancel.cancel();
        let mut attempts = 0;
        let result: Result<()> = call_polling(
            Some(Duration::from_secs(5)),
            Duration::from_millis(1),
            Some(&cancel),
            || {
                attempts += 1;
                touch_needed()
            },
        );
        assert_eq!(attempts, 1);
        assert!(matches!(
            result.unwrap_err(),
            Error::Client(ClientError::Timeout)
        ));
    }
}
