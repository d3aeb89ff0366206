//! Модуль `protocol` содержит общие для обеих сторон части протокола Flight.
//!
//! - `frame` – строки потока и бинарный кодек типизированных массивов.
//! - `value` – граф значений.
//! - `model` – `$`-экранирование текстовой модели.
//! - `thenable` – ячейка, разрешаемая не более одного раза.

pub mod frame;
pub mod model;
pub mod thenable;
pub mod value;

pub use frame::*;
pub use model::*;
pub use thenable::*;
pub use value::*;
