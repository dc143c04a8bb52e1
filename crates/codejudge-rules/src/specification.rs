//! Core Specification trait and the collection combinators the registry
//! builds denylist rules from.

use std::marker::PhantomData;
use std::sync::Arc;

/// A predicate over some evaluation context.
///
/// Evaluation is pure and synchronous: specifications only look at the
/// context they are handed.
pub trait Specification<Ctx>: Send + Sync {
    /// Check if the specification is satisfied by the given context.
    fn is_satisfied_by(&self, ctx: &Ctx) -> bool;
}

/// A boxed specification for dynamic dispatch.
pub type BoxedSpec<Ctx> = Arc<dyn Specification<Ctx>>;

impl<Ctx> Specification<Ctx> for BoxedSpec<Ctx> {
    fn is_satisfied_by(&self, ctx: &Ctx) -> bool {
        self.as_ref().is_satisfied_by(ctx)
    }
}

/// NOT combinator
pub struct Not<A>(pub A);

impl<Ctx, A> Specification<Ctx> for Not<A>
where
    A: Specification<Ctx>,
{
    fn is_satisfied_by(&self, ctx: &Ctx) -> bool {
        !self.0.is_satisfied_by(ctx)
    }
}

/// All specifications in the collection must be satisfied.
pub struct AllOf<Ctx> {
    specs: Vec<BoxedSpec<Ctx>>,
    _phantom: PhantomData<fn(&Ctx)>,
}

impl<Ctx> AllOf<Ctx> {
    pub fn new(specs: Vec<BoxedSpec<Ctx>>) -> Self {
        AllOf {
            specs,
            _phantom: PhantomData,
        }
    }
}

impl<Ctx> Specification<Ctx> for AllOf<Ctx> {
    fn is_satisfied_by(&self, ctx: &Ctx) -> bool {
        self.specs.iter().all(|spec| spec.is_satisfied_by(ctx))
    }
}

/// At least one specification in the collection must be satisfied.
pub struct AnyOf<Ctx> {
    specs: Vec<BoxedSpec<Ctx>>,
    _phantom: PhantomData<fn(&Ctx)>,
}

impl<Ctx> AnyOf<Ctx> {
    pub fn new(specs: Vec<BoxedSpec<Ctx>>) -> Self {
        AnyOf {
            specs,
            _phantom: PhantomData,
        }
    }
}

impl<Ctx> Specification<Ctx> for AnyOf<Ctx> {
    fn is_satisfied_by(&self, ctx: &Ctx) -> bool {
        self.specs.iter().any(|spec| spec.is_satisfied_by(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Satisfied when the context equals the given number
    struct Is(u32);

    impl Specification<u32> for Is {
        fn is_satisfied_by(&self, ctx: &u32) -> bool {
            *ctx == self.0
        }
    }

    fn specs() -> Vec<BoxedSpec<u32>> {
        vec![Arc::new(Is(1)), Arc::new(Not(Is(2)))]
    }

    #[test]
    fn test_not() {
        assert!(Not(Is(2)).is_satisfied_by(&1));
        assert!(!Not(Is(2)).is_satisfied_by(&2));
    }

    #[test]
    fn test_all_of_any_of() {
        assert!(AllOf::new(specs()).is_satisfied_by(&1));
        assert!(!AllOf::new(specs()).is_satisfied_by(&3));
        assert!(AnyOf::new(specs()).is_satisfied_by(&3));
        assert!(!AnyOf::new(specs()).is_satisfied_by(&2));

        // Empty collections follow the iterator conventions
        assert!(AllOf::<u32>::new(Vec::new()).is_satisfied_by(&0));
        assert!(!AnyOf::<u32>::new(Vec::new()).is_satisfied_by(&0));
    }
}
