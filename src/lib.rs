pub mod dim;
pub mod logging;
pub mod settings;
