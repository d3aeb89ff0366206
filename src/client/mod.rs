//! Сторона потребителя: таблица чанков и перевод ссылок на код.

pub mod chunk;
pub mod module_map;
pub mod response;

pub use chunk::*;
pub use module_map::*;
pub use response::*;
