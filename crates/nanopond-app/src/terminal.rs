//! Ratatui terminal view of the pond.
//!
//! The grid is sampled down to the viewport, one terminal cell per
//! sample: dead slots stay dark, energized slots show dim, and viable
//! lineages each get a palette color so replicator blooms stand out.

use std::{
    env,
    io::{self, Stdout},
    sync::atomic::Ordering,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use nanopond_core::{Cell, World};
use ratatui::{
    Frame, Terminal,
    backend::{CrosstermBackend, TestBackend},
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::Color,
    text::Line,
    widgets::{Block, Borders, Paragraph, Widget},
};
use tracing::info;

use crate::renderer::{Renderer, RendererContext};

const DEFAULT_TICKS_PER_FRAME: u64 = 2_000;
const DRAW_INTERVAL_MILLIS: u64 = 100;
const KEY_POLL_MILLIS: u64 = 10;
const HEADLESS_FRAMES: usize = 12;

const LINEAGE_PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Magenta,
    Color::Yellow,
    Color::Green,
    Color::Red,
    Color::Blue,
];

pub struct TerminalRenderer {
    ticks_per_frame: u64,
    draw_interval: Duration,
    poll_interval: Duration,
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self {
            ticks_per_frame: DEFAULT_TICKS_PER_FRAME,
            draw_interval: Duration::from_millis(DRAW_INTERVAL_MILLIS),
            poll_interval: Duration::from_millis(KEY_POLL_MILLIS),
        }
    }
}

impl Renderer for TerminalRenderer {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn run(&self, ctx: RendererContext) -> Result<()> {
        if env::var_os("NANOPOND_TERMINAL_HEADLESS").is_some() {
            let frames = self.run_headless(&ctx)?;
            info!(frames, "terminal headless run complete");
            return Ok(());
        }

        enable_raw_mode().context("enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen).context("enter alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        let result = self.event_loop(&mut terminal, &ctx);
        let _ = disable_raw_mode();
        let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
        result
    }
}

impl TerminalRenderer {
    fn event_loop(
        &self,
        terminal: &mut Terminal<CrosstermBackend<Stdout>>,
        ctx: &RendererContext,
    ) -> Result<()> {
        let mut paused = false;
        let mut last_draw = Instant::now()
            .checked_sub(self.draw_interval)
            .unwrap_or_else(Instant::now);
        loop {
            if ctx.exit_now.load(Ordering::Relaxed) {
                return Ok(());
            }
            if !paused {
                let Ok(mut world) = ctx.world.lock() else {
                    bail!("world lock poisoned");
                };
                world.run_ticks(self.ticks_per_frame);
            }
            if last_draw.elapsed() >= self.draw_interval {
                let Ok(world) = ctx.world.lock() else {
                    bail!("world lock poisoned");
                };
                terminal.draw(|frame| draw(frame, &world))?;
                last_draw = Instant::now();
            }
            if event::poll(self.poll_interval)?
                && let Event::Key(key) = event::read()?
                && handle_key(key, &mut paused)
            {
                ctx.exit_now.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Render a fixed number of frames into an in-memory backend. Used
    /// by smoke tests and environments without a real terminal.
    fn run_headless(&self, ctx: &RendererContext) -> Result<usize> {
        let backend = TestBackend::new(100, 30);
        let mut terminal = Terminal::new(backend)?;
        for _ in 0..HEADLESS_FRAMES {
            {
                let Ok(mut world) = ctx.world.lock() else {
                    bail!("world lock poisoned");
                };
                world.run_ticks(self.ticks_per_frame);
            }
            let Ok(world) = ctx.world.lock() else {
                bail!("world lock poisoned");
            };
            terminal.draw(|frame| draw(frame, &world))?;
        }
        Ok(HEADLESS_FRAMES)
    }
}

/// Returns true when the key requests shutdown.
fn handle_key(key: KeyEvent, paused: &mut bool) -> bool {
    match (key.code, key.modifiers) {
        (KeyCode::Esc, _) | (KeyCode::Char('q') | KeyCode::Char('Q'), _) => true,
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => true,
        (KeyCode::Char(' '), _) => {
            *paused = !*paused;
            false
        }
        _ => false,
    }
}

fn draw(frame: &mut Frame<'_>, world: &World) {
    let [header_area, body_area] =
        Layout::vertical([Constraint::Length(3), Constraint::Min(0)]).areas(frame.area());
    let [map_area, side_area] =
        Layout::horizontal([Constraint::Min(0), Constraint::Length(36)]).areas(body_area);

    let totals = world.pond().totals();
    let header = Line::from(format!(
        "clock {}  alive {}  viable {}  max-gen {}  ids {}",
        world.clock(),
        totals.active_cells,
        totals.viable_replicators,
        totals.max_generation,
        world.cell_id_counter(),
    ));
    frame.render_widget(
        Paragraph::new(header).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Nanopond {}x{}", world.pond().width(), world.pond().height())),
        ),
        header_area,
    );

    let map_block = Block::default().borders(Borders::ALL).title("Pond");
    let map_inner = map_block.inner(map_area);
    frame.render_widget(map_block, map_area);
    frame.render_widget(PondMapWidget { world }, map_inner);

    frame.render_widget(report_panel(world), side_area);
}

fn report_panel(world: &World) -> Paragraph<'static> {
    let lines = match world.history().last() {
        Some(report) => vec![
            Line::from(format!("clock        {}", report.clock)),
            Line::from(format!("energy       {}", report.total_energy)),
            Line::from(format!("alive        {}", report.active_cells)),
            Line::from(format!("viable       {}", report.viable_replicators)),
            Line::from(format!("max gen      {}", report.max_generation)),
            Line::from(format!("replaced     {}", report.viable_replaced)),
            Line::from(format!("killed       {}", report.viable_killed)),
            Line::from(format!("shares       {}", report.viable_shares)),
            Line::from(format!("metabolism   {:.4}", report.metabolism)),
        ],
        None => vec![Line::from("no report yet")],
    };
    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Last report"))
}

struct PondMapWidget<'a> {
    world: &'a World,
}

impl Widget for PondMapWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.width == 0 || area.height == 0 {
            return;
        }
        let pond = self.world.pond();
        for row in 0..area.height {
            for col in 0..area.width {
                let sample_x = (col as usize * pond.width()) / area.width as usize;
                let sample_y = (row as usize * pond.height()) / area.height as usize;
                let cell = pond.get(
                    sample_x.min(pond.width() - 1),
                    sample_y.min(pond.height() - 1),
                );
                buf[(area.x + col, area.y + row)]
                    .set_char(' ')
                    .set_bg(cell_color(cell));
            }
        }
    }
}

fn cell_color(cell: &Cell) -> Color {
    if !cell.is_alive() {
        Color::Black
    } else if cell.is_viable() {
        LINEAGE_PALETTE[(cell.lineage % LINEAGE_PALETTE.len() as u64) as usize]
    } else {
        Color::DarkGray
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanopond_core::{Genome, PondConfig};

    fn small_world() -> World {
        let config = PondConfig {
            width: 16,
            height: 12,
            rng_seed: Some(13),
            ..PondConfig::default()
        };
        World::new(config).expect("world")
    }

    #[test]
    fn draw_renders_header_into_test_backend() {
        let world = small_world();
        let backend = TestBackend::new(80, 24);
        let mut terminal = Terminal::new(backend).expect("terminal");
        terminal.draw(|frame| draw(frame, &world)).expect("draw");
        let content: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol().chars().next().unwrap_or(' '))
            .collect();
        assert!(content.contains("Nanopond"));
        assert!(content.contains("no report yet"));
    }

    #[test]
    fn cell_colors_distinguish_population_states() {
        let dead = Cell::default();
        assert_eq!(cell_color(&dead), Color::Black);

        let energized = Cell {
            energy: 50,
            ..Cell::default()
        };
        assert_eq!(cell_color(&energized), Color::DarkGray);

        let mut viable = Cell {
            id: 9,
            parent_id: 4,
            lineage: 2,
            generation: 6,
            energy: 50,
            genome: Genome::ones(),
        };
        assert_eq!(cell_color(&viable), LINEAGE_PALETTE[2]);
        viable.lineage = 7;
        assert_eq!(cell_color(&viable), LINEAGE_PALETTE[1]);
    }

    #[test]
    fn shutdown_keys_are_recognized() {
        let mut paused = false;
        let quit = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert!(handle_key(quit, &mut paused));
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(handle_key(ctrl_c, &mut paused));
        let space = KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE);
        assert!(!handle_key(space, &mut paused));
        assert!(paused);
    }
}
