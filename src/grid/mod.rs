//! Gridded reanalysis access: monthly fields and the caching store.

mod field;
mod store;

pub use field::{FieldFile, GriddedField, Interpolation, VARIABLES};
pub use store::{months_for, CacheStats, DirectoryLoader, FieldLoader, GriddedFieldStore, Reservation};
