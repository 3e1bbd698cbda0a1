//! Handler tables invoked on dispatch.
//!
//! Both tables live inside the context they hand to their handlers, so a
//! dispatch temporarily moves the handlers out, runs them against the context,
//! and puts them back behind anything registered in the meantime.

use mesh_wire::Package;
use std::collections::BTreeMap;
use tracing::trace;

/// Whether a handler considers the package consumed
///
/// Reserved: every handler in the mesh reports [`HandlerFlow::Continue`] and
/// dispatch always runs all handlers for a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerFlow {
    /// Let later handlers see the package
    Continue,
    /// The package was fully handled
    Consumed,
}

/// Handler for one package type: `(context, package, link, arrival_time)`
pub type PackageHandler<C, K> = Box<dyn FnMut(&mut C, &Package, K, u32) -> HandlerFlow>;

/// Result of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers invoked
    pub invoked: usize,
    /// Handlers that reported [`HandlerFlow::Consumed`]
    pub consumed: usize,
}

/// Package-type keyed handler table
pub struct CallbackRegistry<C, K> {
    handlers: BTreeMap<u16, Vec<PackageHandler<C, K>>>,
    generation: u64,
}

impl<C, K: Copy> CallbackRegistry<C, K> {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            generation: 0,
        }
    }

    /// Append a handler for `package_type`
    pub fn register<F>(&mut self, package_type: u16, handler: F)
    where
        F: FnMut(&mut C, &Package, K, u32) -> HandlerFlow + 'static,
    {
        self.handlers
            .entry(package_type)
            .or_default()
            .push(Box::new(handler));
    }

    /// Handlers registered for `package_type`
    pub fn handler_count(&self, package_type: u16) -> usize {
        self.handlers.get(&package_type).map_or(0, Vec::len)
    }

    /// Drop every handler
    pub fn clear(&mut self) {
        self.handlers.clear();
        self.generation += 1;
    }

    /// Run every handler registered for the package's type, in registration order.
    ///
    /// `select` locates the registry inside `ctx`.
    pub fn dispatch(
        ctx: &mut C,
        select: fn(&mut C) -> &mut Self,
        package: &Package,
        link: K,
        arrival: u32,
    ) -> DispatchOutcome {
        let package_type = package.package_type();
        let registry = select(ctx);
        let generation = registry.generation;
        let Some(mut handlers) = registry.handlers.remove(&package_type) else {
            trace!(package_type, "no handlers registered");
            return DispatchOutcome::default();
        };

        let mut outcome = DispatchOutcome::default();
        for handler in handlers.iter_mut() {
            outcome.invoked += 1;
            if handler(ctx, package, link, arrival) == HandlerFlow::Consumed {
                outcome.consumed += 1;
            }
        }

        let registry = select(ctx);
        if registry.generation == generation {
            let added = registry.handlers.remove(&package_type).unwrap_or_default();
            handlers.extend(added);
            registry.handlers.insert(package_type, handlers);
        }
        outcome
    }
}

impl<C, K: Copy> Default for CallbackRegistry<C, K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener for one kind of event
pub type EventCallback<C, A> = Box<dyn FnMut(&mut C, A)>;

/// Ordered list of event listeners sharing one argument type
pub struct CallbackList<C, A> {
    callbacks: Vec<EventCallback<C, A>>,
    generation: u64,
}

impl<C, A: Clone> CallbackList<C, A> {
    /// Empty list
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
            generation: 0,
        }
    }

    /// Append a listener
    pub fn push<F>(&mut self, callback: F)
    where
        F: FnMut(&mut C, A) + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether nobody listens
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Drop every listener
    pub fn clear(&mut self) {
        self.callbacks.clear();
        self.generation += 1;
    }

    /// Call every listener with `arg`; returns how many ran
    pub fn execute(ctx: &mut C, select: fn(&mut C) -> &mut Self, arg: A) -> usize {
        let list = select(ctx);
        let generation = list.generation;
        let mut callbacks = std::mem::take(&mut list.callbacks);

        for callback in callbacks.iter_mut() {
            callback(ctx, arg.clone());
        }
        let count = callbacks.len();

        let list = select(ctx);
        if list.generation == generation {
            callbacks.append(&mut list.callbacks);
            list.callbacks = callbacks;
        }
        count
    }
}

impl<C, A: Clone> Default for CallbackList<C, A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::TYPE_USER_MIN;

    #[derive(Default)]
    struct Node {
        registry: CallbackRegistry<Node, u8>,
        events: CallbackList<Node, u32>,
        seen: Vec<(u8, u32, &'static str)>,
    }

    fn registry(node: &mut Node) -> &mut CallbackRegistry<Node, u8> {
        &mut node.registry
    }

    fn events(node: &mut Node) -> &mut CallbackList<Node, u32> {
        &mut node.events
    }

    fn package() -> Package {
        Package::broadcast(1, "hi")
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let mut node = Node::default();
        node.registry.register(8, |n: &mut Node, _: &Package, link, t| {
            n.seen.push((link, t, "first"));
            HandlerFlow::Continue
        });
        node.registry.register(8, |n: &mut Node, _: &Package, link, t| {
            n.seen.push((link, t, "second"));
            HandlerFlow::Consumed
        });

        let outcome = CallbackRegistry::dispatch(&mut node, registry, &package(), 3, 99);
        assert_eq!(outcome, DispatchOutcome { invoked: 2, consumed: 1 });
        assert_eq!(node.seen, vec![(3, 99, "first"), (3, 99, "second")]);
        assert_eq!(node.registry.handler_count(8), 2);
    }

    #[test]
    fn test_dispatch_unknown_type() {
        let mut node = Node::default();
        let pkg = Package::single(1, 2, "x");
        assert_eq!(
            CallbackRegistry::dispatch(&mut node, registry, &pkg, 0, 0).invoked,
            0
        );
        assert_eq!(node.registry.handler_count(TYPE_USER_MIN), 0);
    }

    #[test]
    fn test_handler_registered_during_dispatch_is_kept() {
        let mut node = Node::default();
        node.registry.register(8, |n: &mut Node, _: &Package, _, _| {
            n.registry.register(8, |n: &mut Node, _: &Package, _, _| {
                n.seen.push((0, 0, "late"));
                HandlerFlow::Continue
            });
            HandlerFlow::Continue
        });

        CallbackRegistry::dispatch(&mut node, registry, &package(), 0, 0);
        assert!(node.seen.is_empty());
        assert_eq!(node.registry.handler_count(8), 2);

        CallbackRegistry::dispatch(&mut node, registry, &package(), 0, 0);
        assert_eq!(node.seen.len(), 1);
    }

    #[test]
    fn test_clear_during_dispatch_wins() {
        let mut node = Node::default();
        node.registry.register(8, |n: &mut Node, _: &Package, _, _| {
            n.registry.clear();
            HandlerFlow::Continue
        });
        CallbackRegistry::dispatch(&mut node, registry, &package(), 0, 0);
        assert_eq!(node.registry.handler_count(8), 0);
    }

    #[test]
    fn test_callback_list() {
        let mut node = Node::default();
        node.events.push(|n: &mut Node, id| n.seen.push((1, id, "a")));
        node.events.push(|n: &mut Node, id| n.seen.push((2, id, "b")));
        assert_eq!(node.events.len(), 2);

        assert_eq!(CallbackList::execute(&mut node, events, 42), 2);
        assert_eq!(node.seen, vec![(1, 42, "a"), (2, 42, "b")]);
        assert_eq!(node.events.len(), 2);

        node.events.clear();
        assert!(node.events.is_empty());
        assert_eq!(CallbackList::execute(&mut node, events, 1), 0);
    }
}
