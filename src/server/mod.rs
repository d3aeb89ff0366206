//! Сторона производителя: кодирование графа значений в строки.

pub mod manifest;
pub mod request;

pub use manifest::*;
pub use request::*;
