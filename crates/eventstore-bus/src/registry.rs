//! # Handler Registry
//!
//! Closed mapping from a type tag to the function that rebuilds a domain
//! event from the positional fields of a stored payload.
//!
//! Built once before subscriptions open and shared read-only afterwards.

use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use domain_bus::{DomainEvent, SharedEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::DispatchError;

/// Rebuilds a domain event from positional payload fields.
pub type EventConstructor =
    Arc<dyn Fn(Vec<Value>) -> Result<SharedEvent, DispatchError> + Send + Sync>;

/// Type tag to constructor map.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, EventConstructor>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor. A later registration for the same tag wins.
    pub fn register<F>(&mut self, event_type: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(Vec<Value>) -> Result<SharedEvent, DispatchError> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        if self
            .handlers
            .insert(event_type.clone(), Arc::new(constructor))
            .is_some()
        {
            debug!(event_type = %event_type, "Replaced event constructor");
        }
        self
    }

    /// Register `T` under its type name, rebuilt by deserializing the
    /// positional fields in declaration order.
    pub fn register_json<T>(&mut self) -> &mut Self
    where
        T: DomainEvent + DeserializeOwned,
    {
        self.register_json_as::<T>(short_type_name::<T>())
    }

    /// Register `T` under an explicit type tag.
    pub fn register_json_as<T>(&mut self, event_type: impl Into<String>) -> &mut Self
    where
        T: DomainEvent + DeserializeOwned,
    {
        let event_type = event_type.into();
        let tag = event_type.clone();
        self.register(event_type, move |fields| {
            let event: T = serde_json::from_value(Value::Array(fields)).map_err(|e| {
                DispatchError::Reconstruction {
                    event_type: tag.clone(),
                    reason: e.to_string(),
                }
            })?;
            Ok(Arc::new(event) as SharedEvent)
        })
    }

    /// Merge another registry into this one; entries of `other` win.
    pub fn extend(&mut self, other: HandlerRegistry) -> &mut Self {
        for (event_type, constructor) in other.handlers {
            self.handlers.insert(event_type, constructor);
        }
        self
    }

    #[must_use]
    pub fn resolve(&self, event_type: &str) -> Option<&EventConstructor> {
        self.handlers.get(event_type)
    }

    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered tags, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

/// Last path segment of a type name, generics stripped.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
