// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Component registry.
//!
//! The registry holds the canonical, ordered listing of components. Every
//! operation (install, validate, update) reads the same listing, so they all
//! see the identical set of components.
//!
//! # Ordering
//!
//! Components may declare dependencies on one another through `depends_on`.
//! The execution plan is a stable topological sort of the registry: a
//! component always comes after everything it depends on, and otherwise keeps
//! its declaration order. Registries without dependencies therefore run in
//! exactly the order they were written. Cycles and dangling dependencies are
//! rejected before any work starts.
//!
//! The registry does not deduplicate. Two entries that install the same tool
//! through different providers are both processed.

use crate::{
    component::{
        Action, ComponentDescriptor, ConfigRepoParams, CustomParams, Provider, ProviderKind,
        ScriptAction,
    },
    config::{ComponentDefinition, Config, ProviderDefinition},
};

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

/// Ordered listing of components.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    components: Vec<ComponentDescriptor>,
}

impl Registry {
    /// Construct new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build registry from component entries of configuration.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::DuplicateComponent`] if two entries share a name.
    /// - Return [`RegistryError::EmptyScript`] if a custom entry has an empty command.
    /// - Return [`RegistryError::MissingVariants`] if `{variant}` is used
    ///   without declaring variants.
    /// - Return [`RegistryError::UnknownDefaultVariant`] if default variant is
    ///   not one of the declared variants.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for definition in &config.components {
            registry.push(descriptor_from_definition(definition)?)?;
        }

        Ok(registry)
    }

    /// Append component to registry.
    ///
    /// This is the extension point for ad hoc installers defined in code.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::DuplicateComponent`] if name is taken.
    pub fn push(&mut self, descriptor: ComponentDescriptor) -> Result<()> {
        if self.get(&descriptor.name).is_some() {
            return Err(RegistryError::DuplicateComponent {
                name: descriptor.name,
            });
        }

        self.components.push(descriptor);
        Ok(())
    }

    /// List components in declaration order.
    pub fn list_components(&self) -> &[ComponentDescriptor] {
        &self.components
    }

    /// Find component by name.
    pub fn get(&self, name: &str) -> Option<&ComponentDescriptor> {
        self.components.iter().find(|component| component.name == name)
    }

    /// Check if any component uses target provider kind.
    pub fn uses(&self, kind: ProviderKind) -> bool {
        self.components
            .iter()
            .any(|component| component.provider_kind() == kind)
    }

    /// Remediation hints declared by components, keyed by component name.
    pub fn hints(&self) -> impl Iterator<Item = (&str, &str)> {
        self.components.iter().filter_map(|component| {
            component
                .hint
                .as_deref()
                .map(|hint| (component.name.as_str(), hint))
        })
    }

    /// Compute execution order.
    ///
    /// Stable topological sort using Kahn's algorithm, where ties are broken
    /// by declaration order.
    ///
    /// # Errors
    ///
    /// - Return [`RegistryError::UnknownDependency`] if a dependency names no
    ///   registered component.
    /// - Return [`RegistryError::RequiredOnOptional`] if a required component
    ///   depends on an optional one.
    /// - Return [`RegistryError::CycleDetected`] if dependencies form a cycle.
    pub fn plan(&self) -> Result<Vec<&ComponentDescriptor>> {
        let index: HashMap<&str, usize> = self
            .components
            .iter()
            .enumerate()
            .map(|(position, component)| (component.name.as_str(), position))
            .collect();

        let mut indegree = vec![0usize; self.components.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.components.len()];
        for (position, component) in self.components.iter().enumerate() {
            for dependency in &component.depends_on {
                let Some(&upstream) = index.get(dependency.as_str()) else {
                    return Err(RegistryError::UnknownDependency {
                        component: component.name.clone(),
                        dependency: dependency.clone(),
                    });
                };

                // INVARIANT: Required components only depend on required components.
                if !component.is_optional && self.components[upstream].is_optional {
                    return Err(RegistryError::RequiredOnOptional {
                        component: component.name.clone(),
                        dependency: dependency.clone(),
                    });
                }

                dependents[upstream].push(position);
                indegree[position] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(position, _)| position)
            .collect();

        let mut plan = Vec::with_capacity(self.components.len());
        while let Some(position) = ready.pop_first() {
            plan.push(&self.components[position]);
            for &dependent in &dependents[position] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if plan.len() != self.components.len() {
            let components = self
                .components
                .iter()
                .zip(indegree)
                .filter(|(_, degree)| *degree > 0)
                .map(|(component, _)| component.name.clone())
                .collect();
            return Err(RegistryError::CycleDetected { components });
        }

        Ok(plan)
    }
}

fn descriptor_from_definition(definition: &ComponentDefinition) -> Result<ComponentDescriptor> {
    let name = definition.name.clone();
    let mut templates: Vec<&str> = Vec::new();
    let provider = match &definition.provider {
        ProviderDefinition::NativePackage { package_id } => {
            templates.push(package_id);
            Provider::native(package_id)
        }
        ProviderDefinition::GalleryModule {
            module_name,
            min_version,
        } => {
            templates.push(module_name);
            Provider::gallery(module_name, min_version.clone())
        }
        ProviderDefinition::SecondaryPackage { package_id } => {
            templates.push(package_id);
            Provider::secondary(package_id)
        }
        ProviderDefinition::ConfigRepo { url, path, branch } => {
            Provider::ConfigRepo(ConfigRepoParams {
                url: url.clone(),
                path: path.clone(),
                branch: branch.clone(),
            })
        }
        ProviderDefinition::Custom {
            install,
            validate,
            update,
        } => {
            for argv in [Some(install), Some(validate), update.as_ref()].into_iter().flatten() {
                if argv.is_empty() {
                    return Err(RegistryError::EmptyScript { component: name });
                }
                templates.extend(argv.iter().map(String::as_str));
            }

            Provider::Custom(CustomParams {
                install: Arc::new(ScriptAction::new(install)),
                validate: Arc::new(ScriptAction::new(validate).reporting_version()),
                update: update
                    .as_ref()
                    .map(|argv| Arc::new(ScriptAction::new(argv)) as Arc<dyn Action>),
            })
        }
    };

    if definition.variants.is_empty() && templates.iter().any(|arg| arg.contains("{variant}")) {
        return Err(RegistryError::MissingVariants { component: name });
    }

    if let Some(default) = &definition.default_variant {
        if !definition.variants.contains(default) {
            return Err(RegistryError::UnknownDefaultVariant {
                component: name,
                variant: default.clone(),
            });
        }
    }

    let mut descriptor = ComponentDescriptor::new(name, provider)
        .depends_on(definition.depends_on.iter().cloned())
        .with_variants(definition.variants.iter().cloned(), definition.default_variant.clone());
    descriptor.is_optional = definition.optional;
    descriptor.hint = definition.hint.clone();

    Ok(descriptor)
}

/// Registry error types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two components share one name.
    #[error("component {name:?} is declared more than once")]
    DuplicateComponent { name: String },

    /// Component depends on something that is not registered.
    #[error("component {component:?} depends on unknown component {dependency:?}")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    /// Required component depends on optional component.
    #[error("required component {component:?} depends on optional component {dependency:?}")]
    RequiredOnOptional {
        component: String,
        dependency: String,
    },

    /// Dependencies form a cycle.
    #[error("dependency cycle detected involving components: {components:?}")]
    CycleDetected { components: Vec<String> },

    /// Custom component declares an empty command.
    #[error("custom component {component:?} declares an empty command")]
    EmptyScript { component: String },

    /// Template uses `{{variant}}` but no variants are declared.
    #[error("component {component:?} uses {{variant}} but declares no variants")]
    MissingVariants { component: String },

    /// Default variant is not offered.
    #[error("component {component:?} has default variant {variant:?} that is not declared")]
    UnknownDefaultVariant { component: String, variant: String },
}

/// Friendly result alias :3
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
