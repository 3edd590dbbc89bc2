//! Cooperative cancellation plumbing.
//!
//! One [`CancellationToken`] flows from the top-level request down through
//! graph stages, nodes, agent turns, provider streams and tool calls via
//! `child_token()`. Cancelling a parent cancels every descendant; a child
//! cancelled in isolation leaves its parent running. Timeouts are just
//! another cancellation source.

use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

/// Cancel `token` after `duration` has elapsed.
///
/// The countdown runs on a detached task; dropping the returned token
/// elsewhere does not stop it, but cancelling the token early makes the
/// eventual firing a no-op.
pub fn cancel_after(token: &CancellationToken, duration: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        token.cancel();
    });
}

/// A fresh token that cancels itself after `duration`.
pub fn deadline_token(duration: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    cancel_after(&token, duration);
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_token_fires() {
        let token = deadline_token(Duration::from_millis(10));
        assert!(!token.is_cancelled());
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_token_follows_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        cancel_after(&parent, Duration::from_millis(5));
        child.cancelled().await;
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_running() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
