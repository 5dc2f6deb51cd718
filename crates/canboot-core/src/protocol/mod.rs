//! Protocol module - bootloader command set and frame layout.

pub mod command;
pub mod constants;
pub mod frame;

pub use command::{Command, Reply};
pub use constants::*;
pub use frame::{Address, Frame, FrameError};
