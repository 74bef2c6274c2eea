// Ent Framework - Type descriptors, privacy policy and mutation hooks

pub mod ent_hooks;
pub mod ent_privacy;
pub mod ent_schema;

pub use ent_hooks::{ContentTransform, EntityHooks, HookContext, HookRegistry, MutationData, MutationEvent};
pub use ent_privacy::{ListScope, PrivacyOperation, PrivacyPolicy, RouteCapabilities};
pub use ent_schema::{FieldDefinition, StaticTypeRegistry, TypeDescriptor, TypeRegistry};
