use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::TrieError;

/// Cancellation and deadline carried through every trie operation.
///
/// Checked before each batch load and each backing store call. Cancelling the
/// token aborts the operation at its next checkpoint with [`TrieError::Canceled`].
#[derive(Debug, Clone, Default)]
pub struct TrieContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl TrieContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Uses `token` for cancellation, so the caller can cancel from elsewhere.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A context cancelled together with this one, which can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn check(&self) -> Result<(), TrieError> {
        if self.token.is_cancelled() {
            return Err(TrieError::Canceled);
        }
        if self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Err(TrieError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Runs both branches on the rayon pool under a shared child context.
///
/// The first branch to fail cancels the other one. When both fail, the error
/// that caused the cancellation is reported.
pub(crate) fn fork_join<A, B, L, R>(
    ctx: &TrieContext,
    left: L,
    right: R,
) -> Result<(A, B), TrieError>
where
    A: Send,
    B: Send,
    L: FnOnce(&TrieContext) -> Result<A, TrieError> + Send,
    R: FnOnce(&TrieContext) -> Result<B, TrieError> + Send,
{
    let branch_ctx = ctx.child();
    let (left, right) = rayon::join(
        || left(&branch_ctx).inspect_err(|_| branch_ctx.cancel()),
        || right(&branch_ctx).inspect_err(|_| branch_ctx.cancel()),
    );
    match (left, right) {
        (Ok(left), Ok(right)) => Ok((left, right)),
        (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
        (Err(left), Err(right)) if left.is_cancellation() => Err(right),
        (Err(left), Err(_)) => Err(left),
    }
}
