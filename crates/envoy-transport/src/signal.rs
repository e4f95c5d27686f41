use tokio::sync::watch;

/// One-shot "this pipe was closed locally" flag that blocked readers can
/// wait on.
#[derive(Debug)]
pub(crate) struct CloseSignal(watch::Sender<bool>);

impl CloseSignal {
    pub(crate) fn new() -> Self {
        Self(watch::Sender::new(false))
    }

    pub(crate) fn fire(&self) {
        self.0.send_replace(true);
    }

    pub(crate) fn is_fired(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once [`fire`](Self::fire) has been called.
    pub(crate) async fn fired(&self) {
        // Subscribe before checking so a concurrent fire is never missed.
        let mut rx = self.0.subscribe();
        if *rx.borrow_and_update() {
            return;
        }
        let _ = rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fired_resolves_after_fire() {
        let signal = CloseSignal::new();
        assert!(!signal.is_fired());
        signal.fire();
        signal.fired().await;
        assert!(signal.is_fired());
    }
}
