//! External catalog collaborators: the Lightroom reader and the
//! multi-drive copy-plan helpers.

pub mod copyplan;
pub mod lrcat;

pub use copyplan::{compute_common_roots, compute_dest_path, RootGroup};
pub use lrcat::{read_catalog, CatalogScan, CatalogStats};
