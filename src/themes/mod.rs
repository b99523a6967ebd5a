pub(crate) mod compiled;
pub(crate) mod font_style;
pub mod raw;

pub use compiled::{ColorMap, StyleAttributes, Theme};
pub use font_style::FontStyle;
pub use raw::RawTheme;
