//! Built-in acquisition features.
//!
//! Each feature is a constructor producing a [`crate::node::FeaturePair`];
//! the registry in [`crate::registry`] maps configuration names to these
//! constructors.

pub mod autofocus;
pub mod common;
pub mod constant_velocity;
pub mod resolution;
pub mod zstack;

pub use autofocus::Autofocus;
pub use common::{Snap, WaitToContinue};
pub use constant_velocity::ConstantVelocityAcquisition;
pub use resolution::ChangeResolution;
pub use zstack::ZStackAcquisition;
