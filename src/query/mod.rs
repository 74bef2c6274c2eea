// Query layer - list requests and their compiled SQL plans

pub mod compiler;
pub mod request;

pub use compiler::{PlanOutput, Predicate, QueryPlan};
pub use request::{CompareOp, CoreFilter, ListRequest, MetaCondition, MetaQuery, Relation, SearchRequest, SortOrder, TaxonomyFilter};
