//! Runtime components
//!
//! The pool and connection engine are runtime-agnostic: they depend only on
//! the traits in this module. [`crate::common::exec::TokioExecutor`] is the
//! default executor; callers on another async runtime implement [`Executor`]
//! and [`Timer`] themselves.

pub mod bounds;
mod timer;

pub use timer::{Sleep, Timer};

/// An executor of futures.
///
/// This trait allows Hyper to abstract over async runtimes. Implement this trait for your own type.
///
/// # Example
///
/// ```
/// # use connectcore::rt::Executor;
/// # use std::future::Future;
/// #[derive(Clone)]
/// struct TokioExecutor;
///
/// impl<F> Executor<F> for TokioExecutor
/// where
///     F: Future + Send + 'static,
///     F::Output: Send + 'static,
/// {
///     fn execute(&self, future: F) {
///         tokio::spawn(future);
///     }
/// }
/// ```
pub trait Executor<Fut> {
    /// Place the future into the executor to be run.
    fn execute(&self, fut: Fut);
}
