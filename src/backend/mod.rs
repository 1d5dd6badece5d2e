//! Built-in implementations of the collaborator traits in [`crate::host`].
//!
//! | Trait | Implementation |
//! |-------|----------------|
//! | [`Vault`](crate::host::Vault) | [`FsVault`]: a directory on disk |
//! | [`MarkdownRenderer`](crate::host::MarkdownRenderer) | [`ComrakRenderer`]: comrak plus host-style markup |
//! | [`MathScanner`](crate::host::MathScanner) | [`DollarMathScanner`]: `$…$` and `$$…$$` |
//! | [`MathTypesetter`](crate::host::MathTypesetter) | [`CommandTypesetter`]: an external program such as `tex2svg` |
//!
//! Embedders with their own host replace any of them.

pub mod comrak;
pub mod scan;
pub mod typeset;
pub mod vault;

pub use self::comrak::{BlockPostProcessor, ComrakRenderer};
pub use scan::DollarMathScanner;
pub use typeset::{CommandTypesetter, FormulaInput};
pub use vault::FsVault;
