//! Marker-based dispatch for update-block callbacks.
//!
//! A block's `Y`/`X` computation is registered as an ordinary closure,
//! with or without a [`Context`](crate::node::context::Context) parameter;
//! [`UpdateFn`] erases that difference behind one boxed signature so
//! [`super::runtime::NodeRuntime`] can store both shapes in the same map.

use crate::node::context::Context;

/// Disambiguating marker types for the two closure shapes [`UpdateFn`]
/// accepts. Never named by callers; only used as the `S` type parameter
/// inferred at the call site of [`erase`].
pub mod markers {
    /// A callback taking only `&mut M`.
    pub struct WithoutContext;
    /// A callback taking `&mut M` and a [`super::Context`].
    pub struct WithContext;
}

/// A closure usable as an update-block's `Y` or `X` computation.
///
/// Implemented for `FnMut(&mut M)` and `FnMut(&mut M, &mut Context<'_>)`
/// alike, tagged by a marker type `S` so both blanket impls can coexist.
pub trait UpdateFn<M, S>: Send + 'static {
    /// Invokes the callback.
    fn call(&mut self, model: &mut M, context: &mut Context<'_>);
}

impl<M, F> UpdateFn<M, markers::WithoutContext> for F
where
    F: FnMut(&mut M) + Send + 'static,
{
    fn call(&mut self, model: &mut M, _context: &mut Context<'_>) {
        self(model)
    }
}

impl<M, F> UpdateFn<M, markers::WithContext> for F
where
    F: for<'r> FnMut(&mut M, &mut Context<'r>) + Send + 'static,
{
    fn call(&mut self, model: &mut M, context: &mut Context<'_>) {
        self(model, context)
    }
}

/// The type-erased, boxed form stored by [`super::runtime::NodeRuntime`].
pub type UpdateCallback<M> = Box<dyn FnMut(&mut M, &mut Context<'_>) + Send>;

/// Boxes an [`UpdateFn`] into its erased form.
///
/// `S` is resolved at this call's own monomorphization, not through a
/// second blanket impl over `UpdateCallback` — a blanket
/// `impl<M, S, F: UpdateFn<M, S>> ... for F` would leave `S` unconstrained
/// by `F` and rustc would reject it. Doing the erasure inside this
/// ordinary generic function sidesteps that: here `S` is simply inferred
/// from the caller's closure shape, exactly once.
pub fn erase<M, S, F>(mut f: F) -> UpdateCallback<M>
where
    M: 'static,
    S: 'static,
    F: UpdateFn<M, S>,
{
    Box::new(move |model, context| f.call(model, context))
}
