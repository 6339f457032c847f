mod common;
mod meta;
mod nodeconfig;
mod status;
mod supportbundle;

pub use common::*;
pub use meta::*;
pub use nodeconfig::*;
pub use status::*;
pub use supportbundle::*;
