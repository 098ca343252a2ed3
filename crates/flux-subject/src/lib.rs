//! Flux Subject - Typed Views over Perspective Links
//!
//! A [`SubjectSchema`] declares a class: its type flag and a property name to
//! predicate map with one async resolver per property. The
//! [`SubjectRepository`] performs CRUD for one schema in one perspective and
//! registers the schema program ([`sdna`]) before first use.
//!
//! - [`models`]: the classes Flux communities use
//! - [`tree`]: depth-first loading of nested classes with bounded fan-out

#![forbid(unsafe_code)]

pub mod error;
pub mod models;
pub mod repository;
pub mod schema;
pub mod sdna;
pub mod tree;

pub use error::SubjectError;
pub use repository::{subject_data, SubjectHandle, SubjectRepository};
pub use schema::{
    link_resolver, Cardinality, PropertySpec, PropertyValue, ResolveFn, SubjectData,
    SubjectRecord, SubjectSchema, SubjectSchemaBuilder, TypeFlag, ValueKind,
};
pub use sdna::{class_atom, community_sdna, sdna};
pub use tree::{materialize_tree, TreeNode};
