//! Mapped Signals
//!
//! A mapped signal projects a parent signal's value into a child value. It
//! has no storage or version of its own: reads go through the parent's
//! tracked `value()`, so dependents of a mapped signal depend on the parent.
//!
//! Writable mapped signals route every write through the parent's write
//! path, using one of three strategies:
//!
//! - [`WriteBack::Rebuild`] builds a new parent from the old parent and the
//!   new child.
//! - [`WriteBack::Merge`] merges the new child into the old parent.
//! - [`WriteBack::InPlace`] mutates the parent value without replacing it.
//!   The parent's version is bumped regardless, since the parent value can
//!   compare equal to itself before and after.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::signal::{Signal, WritableSignal};
use super::source::SignalId;
use crate::operation::Operation;

type Projection<P, C> = Arc<dyn Fn(&P) -> C + Send + Sync>;

/// How a writable mapped signal writes a new child value back.
pub enum WriteBack<P, C> {
    /// `rebuild(parent, child)` returns the new parent value.
    Rebuild(Arc<dyn Fn(&P, C) -> P + Send + Sync>),
    /// `merge(parent, child)` returns the new parent value.
    Merge(Arc<dyn Fn(&P, C) -> P + Send + Sync>),
    /// `modify(parent, child)` updates the parent value in place.
    InPlace(Arc<dyn Fn(&mut P, C) + Send + Sync>),
}

impl<P, C> Clone for WriteBack<P, C> {
    fn clone(&self) -> Self {
        match self {
            WriteBack::Rebuild(f) => WriteBack::Rebuild(f.clone()),
            WriteBack::Merge(f) => WriteBack::Merge(f.clone()),
            WriteBack::InPlace(f) => WriteBack::InPlace(f.clone()),
        }
    }
}

impl<P, C> fmt::Debug for WriteBack<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategy = match self {
            WriteBack::Rebuild(_) => "Rebuild",
            WriteBack::Merge(_) => "Merge",
            WriteBack::InPlace(_) => "InPlace",
        };
        f.write_str(strategy)
    }
}

/// A read-only projection of another signal.
pub struct MappedSignal<P, C> {
    id: SignalId,
    parent: Arc<dyn Signal<P>>,
    projection: Projection<P, C>,
}

impl<P, C> MappedSignal<P, C> {
    pub(crate) fn new(parent: Arc<dyn Signal<P>>, projection: Projection<P, C>) -> Self {
        Self {
            id: SignalId::new(),
            parent,
            projection,
        }
    }
}

impl<P, C> Signal<C> for MappedSignal<P, C> {
    fn id(&self) -> SignalId {
        self.id
    }

    fn value(&self) -> C {
        (self.projection)(&self.parent.value())
    }

    fn peek(&self) -> C {
        (self.projection)(&self.parent.peek())
    }
}

impl<P, C> Clone for MappedSignal<P, C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            parent: self.parent.clone(),
            projection: self.projection.clone(),
        }
    }
}

impl<P, C> fmt::Debug for MappedSignal<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedSignal")
            .field("id", &self.id)
            .field("parent", &self.parent.id())
            .finish()
    }
}

/// A projection of a writable signal that writes back into its parent.
pub struct WritableMappedSignal<S, P, C> {
    id: SignalId,
    parent: S,
    projection: Projection<P, C>,
    write_back: WriteBack<P, C>,
    _child: PhantomData<fn() -> C>,
}

impl<S, P, C> WritableMappedSignal<S, P, C>
where
    S: WritableSignal<P>,
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(parent: S, projection: Projection<P, C>, write_back: WriteBack<P, C>) -> Self {
        Self {
            id: SignalId::new(),
            parent,
            projection,
            write_back,
            _child: PhantomData,
        }
    }

    /// The signal this projection writes into.
    pub fn parent(&self) -> &S {
        &self.parent
    }

    /// The configured write-back strategy.
    pub fn write_back(&self) -> &WriteBack<P, C> {
        &self.write_back
    }

    /// Write a new child computed by `next` from the current child.
    ///
    /// `next` returns `None` to reject. Returns the child value that was
    /// current before the write.
    fn write_child<F>(&self, mut next: F) -> Operation<C>
    where
        F: FnMut(&C) -> Option<C>,
    {
        let projection = &self.projection;
        match &self.write_back {
            WriteBack::Rebuild(combine) | WriteBack::Merge(combine) => self
                .parent
                .update_if(|parent| {
                    let child = next(&projection(parent))?;
                    Some(combine(parent, child))
                })
                .map(|previous| projection(&previous)),
            WriteBack::InPlace(modify) => {
                let pending: Cell<Option<C>> = Cell::new(None);
                let previous: Cell<Option<C>> = Cell::new(None);
                let outcome = self.parent.modify_if(
                    |parent| {
                        let current = projection(parent);
                        let Some(child) = next(&current) else {
                            return false;
                        };
                        pending.set(Some(child));
                        previous.set(Some(current));
                        true
                    },
                    |parent| {
                        if let Some(child) = pending.take() {
                            modify(parent, child);
                        }
                    },
                );
                match (outcome, previous.take()) {
                    (Operation::Applied(()), Some(previous)) => Operation::Applied(previous),
                    (Operation::Applied(()), None) => {
                        Operation::Applied(projection(&self.parent.peek()))
                    }
                    (Operation::Rejected(rejection), _) => Operation::Rejected(rejection),
                }
            }
        }
    }
}

impl<S, P, C> Signal<C> for WritableMappedSignal<S, P, C>
where
    S: WritableSignal<P>,
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SignalId {
        self.id
    }

    fn value(&self) -> C {
        (self.projection)(&self.parent.value())
    }

    fn peek(&self) -> C {
        (self.projection)(&self.parent.peek())
    }
}

impl<S, P, C> WritableSignal<C> for WritableMappedSignal<S, P, C>
where
    S: WritableSignal<P>,
    P: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn update_if<F>(&self, f: F) -> Operation<C>
    where
        F: FnMut(&C) -> Option<C>,
    {
        self.write_child(f)
    }

    fn modify_if<G, F>(&self, mut guard: G, mut modifier: F) -> Operation<()>
    where
        G: FnMut(&C) -> bool,
        F: FnMut(&mut C),
    {
        self.write_child(|current| {
            if !guard(current) {
                return None;
            }
            let mut child = current.clone();
            modifier(&mut child);
            Some(child)
        })
        .discard()
    }
}

impl<S, P, C> Clone for WritableMappedSignal<S, P, C>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            parent: self.parent.clone(),
            projection: self.projection.clone(),
            write_back: self.write_back.clone(),
            _child: PhantomData,
        }
    }
}

impl<S, P, C> fmt::Debug for WritableMappedSignal<S, P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritableMappedSignal")
            .field("id", &self.id)
            .field("write_back", &self.write_back)
            .finish()
    }
}
