pub mod process;
pub mod provider;
pub mod sync;

pub use process::*;
pub use provider::*;
pub use sync::*;
