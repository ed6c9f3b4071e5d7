//! Handler registry partitioned by platform.
//!
//! Written while platforms are constructed, then shared read-only behind an
//! `Arc` for the rest of the process.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::handler::{HandlerDescriptor, HandlerFn};
use crate::types::PlatformType;

#[derive(Debug, Default)]
pub struct HandlerRegistry {
    partitions: HashMap<PlatformType, HashMap<String, HandlerDescriptor>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any existing one under the same key.
    ///
    /// Returns the displaced descriptor. Replacement is logged because it
    /// usually means two registrations collided.
    pub fn register_handler(
        &mut self,
        platform: PlatformType,
        descriptor: HandlerDescriptor,
    ) -> Option<HandlerDescriptor> {
        let key = descriptor.key();
        debug!("Registering handler {} on {}", key, platform);
        let previous = self
            .partitions
            .entry(platform)
            .or_default()
            .insert(key.clone(), descriptor);
        if previous.is_some() {
            warn!(
                "Handler '{}' on platform {} was registered twice; the later registration wins",
                key, platform
            );
        }
        previous
    }

    pub fn register_handlers(
        &mut self,
        platform: PlatformType,
        descriptors: impl IntoIterator<Item = HandlerDescriptor>,
    ) {
        for descriptor in descriptors {
            self.register_handler(platform, descriptor);
        }
    }

    /// Register a handler, refusing to replace an existing key.
    pub fn try_register_handler(
        &mut self,
        platform: PlatformType,
        descriptor: HandlerDescriptor,
    ) -> Result<()> {
        let key = descriptor.key();
        let partition = self.partitions.entry(platform).or_default();
        if partition.contains_key(&key) {
            return Err(OrchestratorError::DuplicateHandler { platform, key });
        }
        debug!("Registering handler {} on {}", key, platform);
        partition.insert(key, descriptor);
        Ok(())
    }

    pub fn try_register_handlers(
        &mut self,
        platform: PlatformType,
        descriptors: impl IntoIterator<Item = HandlerDescriptor>,
    ) -> Result<()> {
        for descriptor in descriptors {
            self.try_register_handler(platform, descriptor)?;
        }
        Ok(())
    }

    pub fn get(&self, platform: PlatformType, operation: &str) -> Option<&HandlerFn> {
        self.get_descriptor(platform, operation).map(|d| &d.handler)
    }

    pub fn get_descriptor(
        &self,
        platform: PlatformType,
        operation: &str,
    ) -> Option<&HandlerDescriptor> {
        self.partitions.get(&platform)?.get(operation)
    }

    pub fn has(&self, platform: PlatformType, operation: &str) -> bool {
        self.get_descriptor(platform, operation).is_some()
    }

    /// Platforms with at least one handler, sorted.
    pub fn platforms(&self) -> Vec<PlatformType> {
        let mut platforms: Vec<_> = self
            .partitions
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(platform, _)| *platform)
            .collect();
        platforms.sort();
        platforms
    }

    /// Operation keys registered for `platform`, sorted.
    pub fn operations(&self, platform: PlatformType) -> Vec<String> {
        let mut operations: Vec<String> = self
            .partitions
            .get(&platform)
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default();
        operations.sort();
        operations
    }

    pub fn len(&self) -> usize {
        self.partitions.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.partitions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerOutput;
    use crate::types::ServiceType;

    fn descriptor(command: &str, service_type: ServiceType, marker: &'static str) -> HandlerDescriptor {
        HandlerDescriptor::new(command, PlatformType::Container, service_type, move |_ctx| async move {
            Ok(HandlerOutput::ok().with_metadata("marker", marker))
        })
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = HandlerRegistry::new();
        registry.register_handler(
            PlatformType::Container,
            descriptor("check", ServiceType::Database, "first"),
        );

        assert!(registry.has(PlatformType::Container, "check-database"));
        assert!(registry.get(PlatformType::Container, "check-database").is_some());
        assert!(registry.get(PlatformType::Container, "start-database").is_none());
        // Partitions are independent.
        assert!(registry.get(PlatformType::Process, "check-database").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration_last_write_wins() {
        let mut registry = HandlerRegistry::new();
        let first = registry.register_handler(
            PlatformType::Container,
            descriptor("check", ServiceType::Database, "first"),
        );
        let displaced = registry.register_handler(
            PlatformType::Container,
            descriptor("check", ServiceType::Database, "second"),
        );

        assert!(first.is_none());
        assert!(displaced.is_some());
        assert_eq!(registry.len(), 1);

        let descriptor = registry
            .get_descriptor(PlatformType::Container, "check-database")
            .expect("handler registered");
        let service = crate::service::test_support::service("database", ServiceType::Database);
        let output = (descriptor.handler)(crate::service::test_support::context(service))
            .await
            .expect("handler runs");
        assert_eq!(output.metadata["marker"], "second");
    }

    #[test]
    fn test_strict_registration_rejects_duplicates() {
        let mut registry = HandlerRegistry::new();
        registry
            .try_register_handler(
                PlatformType::Container,
                descriptor("check", ServiceType::Database, "first"),
            )
            .expect("first registration succeeds");

        let err = registry
            .try_register_handler(
                PlatformType::Container,
                descriptor("check", ServiceType::Database, "second"),
            )
            .expect_err("duplicate should be rejected");
        assert!(matches!(
            err,
            OrchestratorError::DuplicateHandler { ref key, .. } if key == "check-database"
        ));
    }

    #[test]
    fn test_introspection_is_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.register_handlers(
            PlatformType::Container,
            [
                descriptor("stop", ServiceType::Backend, "x"),
                descriptor("check", ServiceType::Backend, "x"),
            ],
        );
        registry.register_handler(
            PlatformType::ManagedCloud,
            descriptor("check", ServiceType::Frontend, "x"),
        );

        assert_eq!(
            registry.platforms(),
            vec![PlatformType::ManagedCloud, PlatformType::Container]
        );
        assert_eq!(
            registry.operations(PlatformType::Container),
            vec!["check-backend".to_string(), "stop-backend".to_string()]
        );
        assert!(registry.operations(PlatformType::Mock).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut registry = HandlerRegistry::new();
        registry.register_handler(
            PlatformType::Container,
            descriptor("check", ServiceType::Backend, "x"),
        );
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.platforms().is_empty());
    }
}
