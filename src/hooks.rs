//! Hook runner
//!
//! Executes an ordered list of asynchronous interceptors over one argument bag.
//! Each hook takes the bag by value and hands it back to continue the chain, or
//! returns an error to abort it. The runner is generic over the bag so the same
//! machinery drives per-method hooks (over [`Params`](crate::Params)) and
//! connection middleware (over [`ConnectionContext`](crate::ConnectionContext)).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::RpcError;

/// Boxed future type for dyn-compatible async callables.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single interceptor over an argument bag of type `T`
pub type Hook<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<T, RpcError>> + Send + Sync>;

/// Wrap an async closure as a [`Hook`].
///
/// ```ignore
/// let h = hook(|mut params: Params| async move {
///     params.insert("value", 2)?;
///     Ok(params)
/// });
/// ```
pub fn hook<T, F, Fut>(f: F) -> Hook<T>
where
    T: 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RpcError>> + Send + 'static,
{
    Arc::new(move |args| -> BoxFuture<'static, Result<T, RpcError>> { Box::pin(f(args)) })
}

/// An ordered chain of hooks
pub struct HookChain<T> {
    hooks: Vec<Hook<T>>,
}

impl<T> HookChain<T> {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Append a hook to the end of the chain
    pub fn push(&mut self, hook: Hook<T>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in registration order, stopping at the first failure.
    pub async fn run(&self, args: T) -> Result<T, RpcError> {
        run_hooks(Some(self.hooks.as_slice()), args).await
    }
}

impl<T> Default for HookChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for HookChain<T> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<T> fmt::Debug for HookChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain").field("len", &self.hooks.len()).finish()
    }
}

/// Run `hooks` sequentially over `args`.
///
/// An absent or empty list succeeds immediately without suspending. Otherwise each
/// hook receives the bag the previous one returned; the first error ends the chain
/// and no later hook runs.
pub async fn run_hooks<T>(hooks: Option<&[Hook<T>]>, mut args: T) -> Result<T, RpcError> {
    let Some(hooks) = hooks else {
        return Ok(args);
    };

    for (i, hook) in hooks.iter().enumerate() {
        args = match hook(args).await {
            Ok(args) => args,
            Err(e) => {
                tracing::debug!("Hook {} of {} aborted chain: {}", i + 1, hooks.len(), e);
                return Err(e);
            }
        };
    }

    Ok(args)
}
