//! Renderer abstraction over the simulation shell.

use anyhow::{Result, bail};
use std::sync::atomic::Ordering;
use tracing::info;

use crate::{ExitFlag, SharedWorld};

/// Ticks advanced per lock acquisition so a renderer (or the exit flag)
/// never waits long for the world.
const TICK_BATCH: u64 = 4_096;

/// Everything a renderer needs to drive a run.
pub struct RendererContext {
    pub world: SharedWorld,
    pub exit_now: ExitFlag,
    /// Stop after this many ticks; zero runs until interrupted.
    pub tick_limit: u64,
}

/// A frontend that owns the main loop for the duration of a run.
pub trait Renderer {
    fn name(&self) -> &'static str;

    fn run(&self, ctx: RendererContext) -> Result<()>;
}

/// Renderer that draws nothing and just drives the scheduler.
#[derive(Debug, Default)]
pub struct HeadlessRenderer;

impl Renderer for HeadlessRenderer {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn run(&self, ctx: RendererContext) -> Result<()> {
        let mut remaining = ctx.tick_limit;
        loop {
            if ctx.exit_now.load(Ordering::Relaxed) {
                break;
            }
            let batch = if ctx.tick_limit == 0 {
                TICK_BATCH
            } else {
                remaining.min(TICK_BATCH)
            };
            if ctx.tick_limit != 0 && batch == 0 {
                break;
            }
            let Ok(mut world) = ctx.world.lock() else {
                bail!("world lock poisoned");
            };
            world.run_ticks(batch);
            if ctx.tick_limit != 0 {
                remaining -= batch;
            }
        }
        let Ok(world) = ctx.world.lock() else {
            bail!("world lock poisoned");
        };
        info!(clock = world.clock(), "headless run complete");
        Ok(())
    }
}
