use crate::adapter::{BackendAdapter, Facade};
use crate::unit_of_work::{Coordinator, Scope, UnitOfWork};
use crate::{TransactionError, TransactionResult};

/// The facade pinned as "current" by a bound view.
#[derive(Debug, Clone)]
pub enum Binding<F> {
    Session(F),
    Transaction(F),
}

impl<F> Binding<F> {
    pub fn session(&self) -> Option<&F> {
        match self {
            Binding::Session(session) => Some(session),
            Binding::Transaction(_) => None,
        }
    }

    pub fn transaction(&self) -> Option<&F> {
        match self {
            Binding::Transaction(transaction) => Some(transaction),
            Binding::Session(_) => None,
        }
    }
}

/// Classifies `facade` and checks it may be bound on top of `scope`.
///
/// A session can only be bound on an unbound scope. A transaction can be
/// bound unless one is already bound; it then replaces a bound session.
pub(crate) fn resolve<A: BackendAdapter>(
    scope: &Scope<'_, A>,
    facade: Facade<A>,
) -> TransactionResult<Binding<Facade<A>>> {
    let adapter = scope.adapter();

    if adapter.is_session(&facade) {
        if scope.binding().is_some() {
            return Err(TransactionError::BindingConflict(
                "cannot bind a session when a session or transaction is already bound",
            ));
        }
        return Ok(Binding::Session(facade));
    }

    if adapter.is_transaction(&facade) {
        if scope.current_transaction().is_some() {
            return Err(TransactionError::BindingConflict(
                "cannot bind a transaction when one is already bound",
            ));
        }
        return Ok(Binding::Transaction(facade));
    }

    Err(TransactionError::UnknownFacadeKind(
        "facade is neither a session nor a transaction",
    ))
}

/// A coordinator with a session or transaction pinned as current.
///
/// Every operation reads the binding first and falls back to the underlying
/// [`UnitOfWork`] for everything else. Nothing is copied: the view shares the
/// adapter and configuration of the coordinator it was produced from.
pub struct Bound<A: BackendAdapter> {
    unit: UnitOfWork<A>,
    binding: Binding<Facade<A>>,
}

impl<A: BackendAdapter> Bound<A> {
    pub(crate) fn new(unit: UnitOfWork<A>, binding: Binding<Facade<A>>) -> Self {
        Self { unit, binding }
    }

    /// The unbound coordinator this view reads through to.
    pub fn unit(&self) -> &UnitOfWork<A> {
        &self.unit
    }

    pub fn binding(&self) -> &Binding<Facade<A>> {
        &self.binding
    }
}

impl<A: BackendAdapter> Clone for Bound<A> {
    fn clone(&self) -> Self {
        Self {
            unit: self.unit.clone(),
            binding: self.binding.clone(),
        }
    }
}

impl<A: BackendAdapter> Coordinator for Bound<A> {
    type Adapter = A;

    fn scope(&self) -> Scope<'_, A> {
        Scope::new(&self.unit, Some(&self.binding))
    }
}
