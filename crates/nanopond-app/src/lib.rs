//! Shared application plumbing for the Nanopond shell.

use nanopond_core::World;
use std::sync::{Arc, Mutex, atomic::AtomicBool};

/// World handle shared between the simulation loop and a renderer.
pub type SharedWorld = Arc<Mutex<World>>;

/// Cooperative shutdown flag checked at tick boundaries.
pub type ExitFlag = Arc<AtomicBool>;

pub mod renderer;
pub mod terminal;
