pub mod webhook;

pub use webhook::{Alert, AlertManagerEvent};
