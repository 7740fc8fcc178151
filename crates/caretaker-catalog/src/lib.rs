//! Capability catalog for Caretaker.
//!
//! A capability is a declarative description of one permitted maintenance
//! operation: the command template to run, the privilege it needs, its risk
//! class, and the preflight checks that gate it. The catalog is decoded
//! from JSON, validated strictly, and then never mutated.
//!
//! ```text
//! {
//!   "version": "1",
//!   "last_updated": "2026-01-15",
//!   "capabilities": [ { "id": "diag.mem", ... } ]
//! }
//! ```

pub mod catalog;
pub mod error;
pub mod model;
pub mod template;
pub mod validation;

pub use catalog::{CapabilityCatalog, CatalogStatistics, EMBEDDED_CATALOG};
pub use error::{CatalogError, Result};
pub use model::{
    parse_byte_quantity, Capability, CatalogDocument, CheckType, DiskRequirement, OutputParser,
    PreflightCheck, PrivilegeLevel, RiskLevel,
};
pub use template::{CommandTemplate, Segment, Word};
