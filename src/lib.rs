mod capture;
mod config;
mod error;
mod hardware;
mod interrupt;
mod session;
pub mod sim;
mod trace;
mod utils;
mod writer;

pub use capture::*;
pub use config::*;
pub use error::*;
pub use hardware::*;
pub use interrupt::*;
pub use session::*;
pub use trace::*;
pub use utils::*;
pub use writer::*;
