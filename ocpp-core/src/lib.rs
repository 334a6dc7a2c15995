pub mod format;
pub mod overlay;
pub mod v21;
