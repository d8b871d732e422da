//! CKAN registry page: binds a page to one catalog resource and renders a filterable,
//! paginated table of its records.
//!
//! The CMS supplies a `RegistryConfig`; the public table supplies a `TableState`; this crate
//! turns both into Data Store queries and rendered filter controls.

#![forbid(unsafe_code)]

pub mod config;
pub mod locator;
pub mod page;
pub mod render;

pub use config::{ConfigError, FilterConfig, FilterKind, RegistryConfig, DEFAULT_ITEMS_PER_PAGE, DROPDOWN_VALUE_LIMIT};
pub use locator::{LocatorError, LocatorProps, ResourceLocator, ResourceLocatorField};
pub use page::{DetailView, PageView, RegistryPage, TableState};
pub use render::{render_dropdown, DropdownFilter};
