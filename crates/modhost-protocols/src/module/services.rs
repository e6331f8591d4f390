//! Typed service registration for modules.
//!
//! During load phase 1 every module may add services to a shared
//! [`ServiceCollection`]. The collection is then frozen into a
//! [`ServiceProvider`] that every module sees in phase 2.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type ServiceMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Mutable service registrations, keyed by type.
#[derive(Default)]
pub struct ServiceCollection {
    services: ServiceMap,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. A later registration of the same type wins.
    pub fn add<T: Send + Sync + 'static>(&mut self, service: Arc<T>) -> &mut Self {
        self.services.insert(TypeId::of::<T>(), service);
        self
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Freeze into a read-only provider.
    pub fn build(self) -> ServiceProvider {
        ServiceProvider {
            services: self.services,
        }
    }
}

/// Read-only service lookup.
#[derive(Default)]
pub struct ServiceProvider {
    services: ServiceMap,
}

impl ServiceProvider {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Reopen for additions, keeping every existing registration.
    pub fn to_collection(&self) -> ServiceCollection {
        ServiceCollection {
            services: self.services.clone(),
        }
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("services", &self.services.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock {
        offset: i64,
    }

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    #[test]
    fn test_add_and_get() {
        let mut services = ServiceCollection::new();
        services.add(Arc::new(Clock { offset: 5 }));
        assert!(services.contains::<Clock>());

        let provider = services.build();
        let clock = provider.get::<Clock>().unwrap();
        assert_eq!(clock.offset, 5);
        assert!(provider.get::<String>().is_none());
    }

    #[test]
    fn test_trait_object_service() {
        let mut services = ServiceCollection::new();
        let greeter: Arc<dyn Greeter> = Arc::new(English);
        services.add(Arc::new(greeter));

        let provider = services.build();
        let greeter = provider.get::<Arc<dyn Greeter>>().unwrap();
        assert_eq!(greeter.greet(), "hello");
    }

    #[test]
    fn test_later_registration_wins() {
        let mut services = ServiceCollection::new();
        services
            .add(Arc::new(Clock { offset: 1 }))
            .add(Arc::new(Clock { offset: 2 }));
        assert_eq!(services.len(), 1);
        assert_eq!(services.build().get::<Clock>().unwrap().offset, 2);
    }

    #[test]
    fn test_reopen_provider() {
        let mut services = ServiceCollection::new();
        services.add(Arc::new(Clock { offset: 3 }));
        let provider = services.build();

        let mut reopened = provider.to_collection();
        reopened.add(Arc::new(English));
        let provider = reopened.build();
        assert_eq!(provider.get::<Clock>().unwrap().offset, 3);
        assert!(provider.get::<English>().is_some());
    }

    #[test]
    fn test_empty_provider() {
        let provider = ServiceProvider::empty();
        assert!(provider.is_empty());
        assert!(provider.get::<Clock>().is_none());
    }
}
