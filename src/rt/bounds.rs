//! Trait aliases
//!
//! Traits in this module ease setting bounds and are usually automatically
//! implemented by implementing another trait.

use std::future::Future;

use crate::rt::Executor;

/// An executor able to drive the background task a pooled connection spawns
/// to keep its frame-reader loop running after `H2Connection::handshake`
/// hands back a request-sending handle.
///
/// This trait is implemented for any type that implements [`Executor`] for
/// any `'static` `Send` future; it exists only so call sites can bound on
/// "an executor that can run our connection driver" without naming the
/// driver's concrete future type.
pub trait ConnectionDriverExec: Clone {
    fn execute_driver<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

impl<E> ConnectionDriverExec for E
where
    E: Executor<std::pin::Pin<Box<dyn Future<Output = ()> + Send>>> + Clone,
{
    fn execute_driver<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.execute(Box::pin(fut));
    }
}
