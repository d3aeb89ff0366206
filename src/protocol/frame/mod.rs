pub mod binary;
pub mod row;
pub mod tags;

pub use binary::*;
pub use row::*;
pub use tags::*;
