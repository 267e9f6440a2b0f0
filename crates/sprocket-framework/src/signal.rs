//! Process shutdown signal shared between the runtime and units.

use tokio_util::sync::CancellationToken;

/// Requests a graceful shutdown of the running bot.
///
/// The runtime creates one, injects it into [`Services`](crate::state::Services),
/// and stops accepting requests once it fires.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_shared_between_clones() {
        let signal = ShutdownSignal::new();
        let other = signal.clone();
        assert!(!other.is_triggered());

        signal.trigger();
        assert!(other.is_triggered());
        tokio_test::block_on(other.triggered());
    }
}
