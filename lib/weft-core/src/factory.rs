//! Component factory.

use std::collections::HashMap;

use snafu::Snafu;

use crate::{component::Component, error::GenericError};

type Constructor = Box<dyn Fn() -> Result<Box<dyn Component>, GenericError> + Send + Sync>;

/// A component factory error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum FactoryError {
    /// The type name is already registered.
    #[snafu(display("component type '{}' is already registered", type_name))]
    DuplicateType {
        /// The offending type name.
        type_name: String,
    },

    /// The type name is not registered.
    #[snafu(display("unknown component type '{}'", type_name))]
    UnknownType {
        /// The offending type name.
        type_name: String,
    },

    /// The registered constructor failed.
    #[snafu(display("constructor for component type '{}' failed: {}", type_name, source))]
    Construct {
        /// The type being constructed.
        type_name: String,

        /// The constructor's error.
        source: GenericError,
    },
}

/// A registry of component constructors, keyed by type name.
///
/// Component libraries conventionally register their types under namespaced
/// names (`"core/Repeat"`) via a plain function taking `&mut
/// ComponentFactory`, and the control plane instantiates nodes by those
/// names through [`Graph::add_new`][crate::graph::Graph::add_new].
#[derive(Default)]
pub struct ComponentFactory {
    constructors: HashMap<String, Constructor>,
}

impl ComponentFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under the given type name.
    ///
    /// # Errors
    ///
    /// Fails if the type name is already registered.
    pub fn register<S, F>(&mut self, type_name: S, constructor: F) -> Result<(), FactoryError>
    where
        S: Into<String>,
        F: Fn() -> Result<Box<dyn Component>, GenericError> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self.constructors.contains_key(&type_name) {
            return Err(FactoryError::DuplicateType { type_name });
        }

        self.constructors.insert(type_name, Box::new(constructor));
        Ok(())
    }

    /// Constructs a component of the given registered type.
    ///
    /// # Errors
    ///
    /// Fails if the type is not registered or its constructor fails.
    pub fn create(&self, type_name: &str) -> Result<Box<dyn Component>, FactoryError> {
        let constructor =
            self.constructors
                .get(type_name)
                .ok_or_else(|| FactoryError::UnknownType {
                    type_name: type_name.to_string(),
                })?;

        constructor().map_err(|source| FactoryError::Construct {
            type_name: type_name.to_string(),
            source,
        })
    }

    /// Returns whether the given type name is registered.
    pub fn is_registered(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }
}
