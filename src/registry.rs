//! Name-to-constructor registry for acquisition features.
//!
//! Acquisition sequences arrive as data (configuration files, UI state),
//! naming features rather than constructing them. The registry maps each
//! name to a builder producing a [`FeaturePair`], and compiles a whole
//! feature list into the two thread programs.

use crate::config::Settings;
use crate::container::{compile, DataProgram, SignalProgram};
use crate::error::{EngineError, EngineResult};
use crate::features::{
    Autofocus, ChangeResolution, ConstantVelocityAcquisition, Snap, WaitToContinue,
    ZStackAcquisition,
};
use crate::node::FeaturePair;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One feature reference in a configured sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    /// Registry name of the feature
    pub name: String,
    /// Feature-specific arguments, free-form TOML
    #[serde(default)]
    pub args: toml::Table,
}

impl FeatureDescriptor {
    /// A descriptor with no arguments.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: toml::Table::new(),
        }
    }
}

/// An ordered feature sequence. Features within one inner list run as a
/// sequence; the first feature of each following list nests under the
/// previous list's last feature.
pub type FeatureList = Vec<Vec<FeatureDescriptor>>;

type Builder = Box<dyn Fn(&toml::Table, &Settings) -> EngineResult<FeaturePair> + Send + Sync>;

/// Maps feature names to constructors.
pub struct FeatureRegistry {
    builders: HashMap<&'static str, Builder>,
}

impl FeatureRegistry {
    /// An empty registry (useful for embedding custom features only).
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry preloaded with every built-in feature.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("z_stack", |_, _| Ok(ZStackAcquisition::build()));
        registry.register("autofocus", |_, _| Ok(Autofocus::build()));
        registry.register("snap", |_, _| Ok(Snap::build()));
        registry.register("wait_to_continue", |_, _| Ok(WaitToContinue::build()));
        registry.register("constant_velocity_acquisition", |_, _| {
            Ok(ConstantVelocityAcquisition::build())
        });
        registry.register("change_resolution", |args, settings| {
            let resolution = str_arg(args, "resolution_mode")
                .unwrap_or(&settings.microscope.resolution_mode)
                .to_owned();
            let zoom = str_arg(args, "zoom")
                .unwrap_or(&settings.microscope.zoom)
                .to_owned();
            Ok(ChangeResolution::build(resolution, zoom))
        });
        registry
    }

    /// Register (or override) a feature constructor.
    pub fn register(
        &mut self,
        name: &'static str,
        builder: impl Fn(&toml::Table, &Settings) -> EngineResult<FeaturePair> + Send + Sync + 'static,
    ) {
        self.builders.insert(name, Box::new(builder));
    }

    fn build(&self, descriptor: &FeatureDescriptor, settings: &Settings) -> EngineResult<FeaturePair> {
        let builder = self
            .builders
            .get(descriptor.name.as_str())
            .ok_or_else(|| EngineError::UnknownFeature(descriptor.name.clone()))?;
        builder(&descriptor.args, settings)
    }

    /// Compile a feature list into the signal and data programs.
    pub fn compile(
        &self,
        list: &FeatureList,
        settings: &Settings,
    ) -> EngineResult<(SignalProgram, DataProgram)> {
        let mut pairs = Vec::with_capacity(list.len());
        for sublist in list {
            let mut compiled = Vec::with_capacity(sublist.len());
            for descriptor in sublist {
                compiled.push(self.build(descriptor, settings)?);
            }
            pairs.push(compiled);
        }
        Ok(compile(pairs, 1))
    }
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn str_arg<'a>(args: &'a toml::Table, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|value| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_feature_is_rejected_by_name() {
        let registry = FeatureRegistry::with_builtins();
        let list = vec![vec![FeatureDescriptor::named("does_not_exist")]];
        match registry.compile(&list, &Settings::default()) {
            Ok(_) => panic!("unknown feature should not compile"),
            Err(EngineError::UnknownFeature(name)) => assert_eq!(name, "does_not_exist"),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn builtins_compile() {
        let registry = FeatureRegistry::with_builtins();
        let list = vec![
            vec![FeatureDescriptor::named("autofocus")],
            vec![FeatureDescriptor::named("z_stack"), FeatureDescriptor::named("snap")],
        ];
        registry
            .compile(&list, &Settings::default())
            .expect("compile");
    }

    #[test]
    fn change_resolution_reads_args() {
        let registry = FeatureRegistry::with_builtins();
        let mut descriptor = FeatureDescriptor::named("change_resolution");
        descriptor.args.insert(
            "resolution_mode".into(),
            toml::Value::String("nanoscale".into()),
        );
        registry
            .compile(&vec![vec![descriptor]], &Settings::default())
            .expect("compile");
    }
}
