//! Consentry HTML
//!
//! Rewrites complete HTML documents so that embedded resources in consent
//! categories the visitor has not accepted cannot run.
//!
//! Rewriting is done with `lol_html`, so markup outside the elements that
//! are changed is emitted exactly as received.
//!
//! This crate provides:
//! - [`BufferTransformer`], which neutralizes scripts, inline scripts,
//!   iframes and links according to a [`consentry_rules::RuleSet`]
//! - [`Reactivator`], which undoes neutralization for accepted categories
//! - [`PlaceholderNotice`], the text shown in place of blocked iframes

pub mod escape;
pub mod notice;
pub mod restore;
pub mod transform;

pub use notice::PlaceholderNotice;
pub use restore::Reactivator;
pub use transform::{transform, BufferTransformer, TransformReport, Transformed};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::notice::PlaceholderNotice;
    pub use crate::restore::Reactivator;
    pub use crate::transform::{BufferTransformer, TransformReport};
}
