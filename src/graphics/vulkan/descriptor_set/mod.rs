mod layout;
mod pool;
mod writer;

pub use layout::*;
pub use pool::*;
pub use writer::*;

use super::{Device, RenderError};
