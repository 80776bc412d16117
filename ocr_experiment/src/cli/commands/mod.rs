pub mod aggregate;
pub mod enqueue;
pub mod evaluate;
pub mod run;

pub use aggregate::*;
pub use enqueue::*;
pub use evaluate::*;
pub use run::*;
