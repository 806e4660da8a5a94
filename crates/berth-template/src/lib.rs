//! Template materialization for berth
//!
//! Turns a catalog template plus caller values into concrete manifests:
//!
//! 1. [`Template::parse`] reads the document stream and variable declarations
//! 2. [`Template::bind`] validates caller values against the declarations
//! 3. the [`inject`] passes decorate the documents (volumes, identity, auth,
//!    dataset marker)
//! 4. [`render`] substitutes placeholders into the final YAML stream
//!
//! Name collisions are resolved with [`naming::resolve`].

#![deny(missing_docs)]

pub mod catalog;
pub mod datasets;
pub mod inject;
pub mod model;
pub mod naming;
pub mod renderer;
pub mod storage;

pub use catalog::{CatalogListing, DirectoryCatalog, MemoryCatalog, SkippedTemplate, TemplateCatalog};
pub use inject::{AuthMode, IngressAuth};
pub use model::{Template, TemplateFlags, TemplateSummary, Values, Variable, VariableType};
pub use renderer::{render, substitute};
pub use storage::{StorageDomain, VolumeSource};
