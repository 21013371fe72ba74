/// One-shot request flag: `Idle -> Requested -> Fulfilled`, back to `Idle` on reset.
///
/// Used so each history replay is asked for at most once per connection,
/// however often the user picks that resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestLatch {
    #[default]
    Idle,
    Requested,
    Fulfilled,
}

impl RequestLatch {
    /// Raises the request. Returns `true` only on the `Idle -> Requested` edge.
    pub fn request(&mut self) -> bool {
        if *self == RequestLatch::Idle {
            *self = RequestLatch::Requested;
            true
        } else {
            false
        }
    }

    /// Consumes a pending request. Returns `true` if one was pending.
    pub fn fulfil(&mut self) -> bool {
        if *self == RequestLatch::Requested {
            *self = RequestLatch::Fulfilled;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        *self = RequestLatch::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_until_reset() {
        let mut latch = RequestLatch::default();
        assert!(latch.request());
        assert!(!latch.request());
        assert!(latch.fulfil());
        assert!(!latch.fulfil());
        assert!(!latch.request());
        assert_eq!(latch, RequestLatch::Fulfilled);

        latch.reset();
        assert!(latch.request());
    }

    #[test]
    fn fulfil_without_request_is_noop() {
        let mut latch = RequestLatch::Idle;
        assert!(!latch.fulfil());
        assert_eq!(latch, RequestLatch::Idle);
    }
}
