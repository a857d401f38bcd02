//! Built-in stage implementations.

pub mod bin;
pub mod element;
pub mod tee;

pub use bin::BinStage;
pub use element::ElementStage;
pub use tee::TeeStage;
