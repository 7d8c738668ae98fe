//! One transform per asset kind.
//!
//! Every transform is a [`Task`](crate::Task) reading a file set from the
//! source tree and writing the result into the output tree. Behaviour that
//! differs between development and production follows the [`Mode`](crate::Mode)
//! of the invocation.

mod assets;
pub(crate) mod css;
mod images;
mod purify;
mod scripts;
mod sprite;
pub mod svg;
mod styles;
mod templates;

pub use assets::{Clean, CopyAssets};
pub use images::{Crop, OptimizeImages, optimize_all, optimize_file};
pub use purify::{MAIN_STYLESHEET, PurifyCss, PurifyScope, Purifier};
pub use scripts::Scripts;
pub use sprite::{SEPARATOR, Sprite, symbol_id};
pub use styles::{BUILD_STYLESHEET, CleanCss, ConcatCss, Styles, compile, concat};
pub use templates::{RenderReport, Templates, render};
