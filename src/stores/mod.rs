// Entity stores - one module per table family the engine writes to

pub mod entities;
pub mod metadata;
pub mod options;
pub mod ownership;
pub mod relationships;
pub mod revisions;

pub use entities::{EntityRow, EntityStore};
pub use metadata::{MetaMap, MetadataStore};
pub use options::OptionsStore;
pub use ownership::OwnershipStore;
pub use relationships::{normalize_term_ids, RelationshipStore, TermGroups, TermSummary};
pub use revisions::{Revision, RevisionStore};
