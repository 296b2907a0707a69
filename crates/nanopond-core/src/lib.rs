//! Core simulation engine for the Nanopond artificial-life substrate.
//!
//! A fixed toroidal grid of cells, each carrying a packed 4-bit-codon
//! genome, is driven by a stochastic scheduler: energy flows in through
//! periodic seeding, a tiny register VM executes randomly chosen cells,
//! and mutation plus the KILL / SHARE / replication protocol do the rest.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Genome length in 4-bit codons. Must be a multiple of 16 so the genome
/// packs evenly into 64-bit words.
pub const POND_DEPTH: usize = 1024;
/// Codons stored in one machine word.
pub const CODONS_PER_WORD: usize = (u64::BITS / 4) as usize;
/// Genome length in backing words.
pub const GENOME_WORDS: usize = POND_DEPTH / CODONS_PER_WORD;
const WORD_BITS: usize = u64::BITS as usize;

/// Word and bit at which execution starts, skipping the reserved "logo"
/// codon at the front of every genome.
pub const EXEC_START_WORD: usize = 0;
pub const EXEC_START_BIT: usize = 4;

const _: () = assert!(POND_DEPTH % 16 == 0, "POND_DEPTH must be a multiple of 16");

/// VM opcodes. One 4-bit codon each.
pub mod opcodes {
    /// Zero the register, the data pointer, and facing.
    pub const ZERO: u64 = 0x0;
    /// Advance the data pointer one codon, wrapping at the end.
    pub const FWD: u64 = 0x1;
    /// Retreat the data pointer one codon, wrapping at the start.
    pub const BACK: u64 = 0x2;
    /// Increment the register modulo 16.
    pub const INC: u64 = 0x3;
    /// Decrement the register modulo 16.
    pub const DEC: u64 = 0x4;
    /// Read the codon under the data pointer from the genome.
    pub const READG: u64 = 0x5;
    /// Write the register to the genome under the data pointer.
    pub const WRITEG: u64 = 0x6;
    /// Read the codon under the data pointer from the output buffer.
    pub const READB: u64 = 0x7;
    /// Write the register to the output buffer under the data pointer.
    pub const WRITEB: u64 = 0x8;
    /// Begin a loop, or start skipping if the register is zero.
    pub const LOOP: u64 = 0x9;
    /// Close a loop, jumping back while the register is nonzero.
    pub const REP: u64 = 0xa;
    /// Face the direction named by the register's low two bits.
    pub const TURN: u64 = 0xb;
    /// Swap the register with the next codon in the genome.
    pub const XCHG: u64 = 0xc;
    /// Blank the faced neighbor, gated by similarity.
    pub const KILL: u64 = 0xd;
    /// Equalize energy with the faced neighbor, gated by similarity.
    pub const SHARE: u64 = 0xe;
    /// End execution.
    pub const STOP: u64 = 0xf;
}

/// The xorshift128+ generator at the heart of the scheduler.
///
/// Stateful and single-owner: the scheduler is the only caller during a
/// run, so every draw has a defined position in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xorshift128Plus {
    state: [u64; 2],
}

impl Xorshift128Plus {
    /// Seed the generator: the primary word is the seed itself, the
    /// secondary word is drawn from a [`SmallRng`] seeded in lockstep.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let mut companion = SmallRng::seed_from_u64(seed);
        Self {
            state: [seed, companion.random::<u64>()],
        }
    }

    /// Construct from raw state words (used to pin streams in tests).
    #[must_use]
    pub const fn from_state(state: [u64; 2]) -> Self {
        Self { state }
    }

    /// Produce the next 64-bit word of the stream.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state[0];
        let y = self.state[1];
        self.state[0] = y;
        x ^= x << 23;
        let z = x ^ y ^ (x >> 17) ^ (y >> 26);
        self.state[1] = z;
        z.wrapping_add(y)
    }
}

/// The four grid directions a cell can face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    /// Decode a facing from the low two bits of a register value.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        match bits & 3 {
            0 => Self::Left,
            1 => Self::Right,
            2 => Self::Up,
            _ => Self::Down,
        }
    }
}

/// A fixed-length genome packed sixteen codons to the word.
///
/// Codons are addressed by `(word, shift)`: the codon at shift `s`
/// occupies bits `[s, s + 4)` of its word, and cursors advance the shift
/// by 4 until the word is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Genome {
    words: [u64; GENOME_WORDS],
}

impl Genome {
    /// All-ones genome, the blank state of every pond slot.
    #[must_use]
    pub const fn ones() -> Self {
        Self {
            words: [!0; GENOME_WORDS],
        }
    }

    /// Genome with every codon set to `codon`.
    #[must_use]
    pub fn filled(codon: u64) -> Self {
        let nibble = codon & 0xf;
        let mut word = 0u64;
        for slot in 0..CODONS_PER_WORD {
            word |= nibble << (slot * 4);
        }
        Self {
            words: [word; GENOME_WORDS],
        }
    }

    /// Read the codon at `(word, shift)`.
    #[inline]
    #[must_use]
    pub fn codon(&self, word: usize, shift: usize) -> u64 {
        (self.words[word] >> shift) & 0xf
    }

    /// Overwrite the codon at `(word, shift)`.
    #[inline]
    pub fn set_codon(&mut self, word: usize, shift: usize, value: u64) {
        self.words[word] &= !(0xf << shift);
        self.words[word] |= (value & 0xf) << shift;
    }

    /// Read the codon at a flat codon index.
    #[must_use]
    pub fn codon_at(&self, index: usize) -> u64 {
        self.codon(index / CODONS_PER_WORD, (index % CODONS_PER_WORD) * 4)
    }

    /// Overwrite the codon at a flat codon index.
    pub fn set_codon_at(&mut self, index: usize, value: u64) {
        self.set_codon(index / CODONS_PER_WORD, (index % CODONS_PER_WORD) * 4, value);
    }

    /// The first codon, used as the similarity tag by the access gate.
    #[inline]
    #[must_use]
    pub fn first_codon(&self) -> u64 {
        self.words[0] & 0xf
    }

    /// Reset every codon to ones.
    pub fn fill_ones(&mut self) {
        self.words = [!0; GENOME_WORDS];
    }

    /// Fill the genome with random words from the scheduler PRNG.
    pub fn randomize(&mut self, prng: &mut Xorshift128Plus) {
        for word in &mut self.words {
            *word = prng.next_u64();
        }
    }

    /// Raw backing words.
    #[must_use]
    pub fn words(&self) -> &[u64; GENOME_WORDS] {
        &self.words
    }
}

/// One grid slot. Slots are never removed; a dead slot is simply one
/// with zero energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// Globally unique id, reassigned whenever the slot is reinitialized.
    pub id: u64,
    /// Id of the producing cell; zero for seeded or blanked slots.
    pub parent_id: u64,
    /// Id of the first ancestor, inherited unchanged by offspring.
    pub lineage: u64,
    /// Zero for seeded slots, parent's generation plus one for offspring.
    pub generation: u64,
    /// Remaining energy; the slot is alive while this is nonzero.
    pub energy: u64,
    pub genome: Genome,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            id: 0,
            parent_id: 0,
            lineage: 0,
            generation: 0,
            energy: 0,
            genome: Genome::ones(),
        }
    }
}

impl Cell {
    /// A cell is alive while it has energy to execute.
    #[inline]
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.energy > 0
    }

    /// A cell is a viable replicator once its generation exceeds two.
    #[inline]
    #[must_use]
    pub const fn is_viable(&self) -> bool {
        self.generation > 2
    }
}

/// Aggregate totals produced by a whole-pond scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PondTotals {
    pub active_cells: u64,
    pub total_energy: u64,
    pub viable_replicators: u64,
    pub max_generation: u64,
}

impl PondTotals {
    fn absorb(mut self, cell: &Cell) -> Self {
        if cell.is_alive() {
            self.active_cells += 1;
            self.total_energy += cell.energy;
            if cell.is_viable() {
                self.viable_replicators += 1;
            }
            self.max_generation = self.max_generation.max(cell.generation);
        }
        self
    }

    fn merge(self, other: Self) -> Self {
        Self {
            active_cells: self.active_cells + other.active_cells,
            total_energy: self.total_energy + other.total_energy,
            viable_replicators: self.viable_replicators + other.viable_replicators,
            max_generation: self.max_generation.max(other.max_generation),
        }
    }
}

/// The toroidal cell grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pond {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Pond {
    /// Allocate a grid of blank slots.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::default(); width * height],
        }
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Flat index for `(x, y)`.
    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// Borrow the cell at `(x, y)`.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> &Cell {
        &self.cells[self.index(x, y)]
    }

    /// Mutably borrow the cell at `(x, y)`.
    #[must_use]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut Cell {
        let index = self.index(x, y);
        &mut self.cells[index]
    }

    /// Coordinates of the neighbor in `dir`, wrapping at every edge.
    #[must_use]
    pub fn neighbor_coords(&self, x: usize, y: usize, dir: Direction) -> (usize, usize) {
        match dir {
            Direction::Left => (if x == 0 { self.width - 1 } else { x - 1 }, y),
            Direction::Right => (if x == self.width - 1 { 0 } else { x + 1 }, y),
            Direction::Up => (x, if y == 0 { self.height - 1 } else { y - 1 }),
            Direction::Down => (x, if y == self.height - 1 { 0 } else { y + 1 }),
        }
    }

    /// All slots in row-major order.
    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Scan the whole pond once and reduce to aggregate totals.
    ///
    /// The scan runs inside the tick, so the totals are a consistent
    /// snapshot of the grid.
    #[must_use]
    pub fn totals(&self) -> PondTotals {
        self.cells
            .par_iter()
            .fold(PondTotals::default, |acc, cell| acc.absorb(cell))
            .reduce(PondTotals::default, PondTotals::merge)
    }
}

/// Per-window execution and event counters, reset after every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatCounters {
    /// Execution counts per opcode.
    pub instr: [u64; 16],
    /// Cells handed to the VM since the last report.
    pub cell_executions: u64,
    /// Viable cells overwritten by another cell's offspring.
    pub viable_replaced: u64,
    /// Viable cells blanked by a granted KILL.
    pub viable_killed: u64,
    /// Granted SHARE operations against viable cells.
    pub viable_shares: u64,
}

impl Default for StatCounters {
    fn default() -> Self {
        Self {
            instr: [0; 16],
            cell_executions: 0,
            viable_replaced: 0,
            viable_killed: 0,
            viable_shares: 0,
        }
    }
}

impl StatCounters {
    /// Zero every counter for the next reporting window.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Snapshot emitted to the report sink once per reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PondReport {
    pub clock: u64,
    pub total_energy: u64,
    pub active_cells: u64,
    pub viable_replicators: u64,
    pub max_generation: u64,
    pub viable_replaced: u64,
    pub viable_killed: u64,
    pub viable_shares: u64,
    /// Mean executions of each opcode per cell execution; all zero when
    /// no cell ran during the window.
    pub instr_frequency: [f64; 16],
    /// Mean instructions executed per cell execution ("metabolism").
    pub metabolism: f64,
}

/// Population transition observed between two consecutive reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationEvent {
    /// The viable-replicator count went from zero to positive.
    ReplicatorsEmerged,
    /// The viable-replicator count went from positive to zero.
    ReplicatorsExtinct,
}

/// Sink invoked by the scheduler at every report boundary.
pub trait ReportSink: Send {
    fn on_report(&mut self, report: &PondReport);

    /// Called after the report when the viable population appears or
    /// goes extinct.
    fn on_population_event(&mut self, _event: PopulationEvent) {}
}

/// No-op report sink.
#[derive(Debug, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn on_report(&mut self, _report: &PondReport) {}
}

/// Errors raised when validating a pond configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PondError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Tunable simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PondConfig {
    /// Grid width in cells; at least two so a cell is never its own neighbor.
    pub width: usize,
    /// Grid height in cells; at least two.
    pub height: usize,
    /// Ticks between reports.
    pub report_frequency: u64,
    /// Mutation probability numerator over 2^32.
    pub mutation_rate: u32,
    /// Ticks between seedings.
    pub inflow_frequency: u64,
    /// Base energy granted per seeding.
    pub inflow_rate_base: u64,
    /// Upper bound (exclusive) of the uniform energy bonus per seeding;
    /// zero disables the variation for a fixed inflow.
    pub inflow_rate_variation: u64,
    /// Divisor applied to the actor's energy when a KILL against a
    /// viable cell is denied.
    pub failed_kill_penalty: u64,
    /// Optional PRNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Reports retained in the in-memory history ring.
    pub history_capacity: usize,
}

impl Default for PondConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            report_frequency: 200_000,
            mutation_rate: 5_000,
            inflow_frequency: 100,
            inflow_rate_base: 600,
            inflow_rate_variation: 1_000,
            failed_kill_penalty: 3,
            rng_seed: Some(13),
            history_capacity: 256,
        }
    }
}

impl PondConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PondError> {
        if self.width < 2 || self.height < 2 {
            return Err(PondError::InvalidConfig(
                "pond dimensions must be at least 2x2",
            ));
        }
        if self.report_frequency == 0 {
            return Err(PondError::InvalidConfig(
                "report_frequency must be non-zero",
            ));
        }
        if self.inflow_frequency == 0 {
            return Err(PondError::InvalidConfig(
                "inflow_frequency must be non-zero",
            ));
        }
        if self.failed_kill_penalty == 0 {
            return Err(PondError::InvalidConfig(
                "failed_kill_penalty must be non-zero",
            ));
        }
        if self.history_capacity == 0 {
            return Err(PondError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Build the scheduler PRNG, drawing a seed from entropy if none is
    /// configured.
    fn seeded_prng(&self) -> Xorshift128Plus {
        match self.rng_seed {
            Some(seed) => Xorshift128Plus::new(seed),
            None => {
                let seed: u64 = rand::random();
                Xorshift128Plus::new(seed)
            }
        }
    }
}

/// Events emitted by one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickEvents {
    pub clock: u64,
    /// Whether this tick emitted a report.
    pub reported: bool,
    /// Slot seeded with energy and a random genome, if any.
    pub seeded: Option<(usize, usize)>,
    /// Slot handed to the VM.
    pub executed: (usize, usize),
}

/// Positive/negative sense of an access-gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sense {
    /// KILL and offspring placement: more likely the more dissimilar.
    Negative,
    /// SHARE: more likely the more similar.
    Positive,
}

/// The whole simulation: pond, PRNG, counters, scratch buffers, and the
/// report sink, driven one tick at a time.
pub struct World {
    config: PondConfig,
    clock: u64,
    pond: Pond,
    prng: Xorshift128Plus,
    cell_id_counter: u64,
    stats: StatCounters,
    output_buf: Genome,
    loop_stack: Vec<(usize, usize)>,
    last_viable: u64,
    sink: Box<dyn ReportSink>,
    history: VecDeque<PondReport>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("cell_id_counter", &self.cell_id_counter)
            .field("stats", &self.stats)
            .finish()
    }
}

impl World {
    /// Instantiate a world with a no-op report sink.
    pub fn new(config: PondConfig) -> Result<Self, PondError> {
        Self::with_sink(config, Box::new(NullSink))
    }

    /// Instantiate a world that forwards reports to `sink`.
    pub fn with_sink(config: PondConfig, sink: Box<dyn ReportSink>) -> Result<Self, PondError> {
        config.validate()?;
        let prng = config.seeded_prng();
        let history_capacity = config.history_capacity;
        Ok(Self {
            pond: Pond::new(config.width, config.height),
            config,
            clock: 0,
            prng,
            cell_id_counter: 0,
            stats: StatCounters::default(),
            output_buf: Genome::ones(),
            loop_stack: Vec::with_capacity(POND_DEPTH),
            last_viable: 0,
            sink,
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Immutable access to the configuration.
    #[must_use]
    pub fn config(&self) -> &PondConfig {
        &self.config
    }

    /// Current scheduler clock.
    #[must_use]
    pub const fn clock(&self) -> u64 {
        self.clock
    }

    /// Next id the world will hand out.
    #[must_use]
    pub const fn cell_id_counter(&self) -> u64 {
        self.cell_id_counter
    }

    /// Read-only access to the grid.
    #[must_use]
    pub fn pond(&self) -> &Pond {
        &self.pond
    }

    /// Mutable access to the grid (used by tests and tooling).
    #[must_use]
    pub fn pond_mut(&mut self) -> &mut Pond {
        &mut self.pond
    }

    /// Counters for the current reporting window.
    #[must_use]
    pub fn stats(&self) -> &StatCounters {
        &self.stats
    }

    /// Borrow the scheduler PRNG mutably, e.g. to pin its state.
    #[must_use]
    pub fn prng_mut(&mut self) -> &mut Xorshift128Plus {
        &mut self.prng
    }

    /// Replace the report sink.
    pub fn set_sink(&mut self, sink: Box<dyn ReportSink>) {
        self.sink = sink;
    }

    /// Iterate over retained reports, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PondReport> {
        self.history.iter()
    }

    /// Run one scheduler tick: report and seed on their cadences, then
    /// execute one randomly chosen cell.
    pub fn tick(&mut self) -> TickEvents {
        self.clock += 1;
        let mut events = TickEvents {
            clock: self.clock,
            ..TickEvents::default()
        };

        if self.clock.is_multiple_of(self.config.report_frequency) {
            self.emit_report();
            events.reported = true;
        }

        if self.clock.is_multiple_of(self.config.inflow_frequency) {
            events.seeded = Some(self.seed_random_slot());
        }

        let draw = self.prng.next_u64();
        let x = (draw % self.pond.width as u64) as usize;
        let y = (((draw / self.pond.width as u64) >> 1) % self.pond.height as u64) as usize;
        self.execute_cell(x, y);
        events.executed = (x, y);
        events
    }

    /// Tick `count` times.
    pub fn run_ticks(&mut self, count: u64) {
        for _ in 0..count {
            self.tick();
        }
    }

    /// Tick until `exit_now` is raised. Checked at the tick boundary, so
    /// shutdown is cooperative and the pond is never left mid-tick.
    pub fn run(&mut self, exit_now: &AtomicBool) {
        while !exit_now.load(Ordering::Relaxed) {
            self.tick();
        }
    }

    /// Reinitialize a random slot with a fresh identity, inflow energy,
    /// and a random genome. The energy is added to whatever the slot
    /// already held.
    fn seed_random_slot(&mut self) -> (usize, usize) {
        let x = (self.prng.next_u64() % self.pond.width as u64) as usize;
        let y = (self.prng.next_u64() % self.pond.height as u64) as usize;
        let id = self.cell_id_counter;
        self.cell_id_counter += 1;
        let mut inflow = self.config.inflow_rate_base;
        if self.config.inflow_rate_variation > 0 {
            inflow += self.prng.next_u64() % self.config.inflow_rate_variation;
        }
        let index = self.pond.index(x, y);
        let cell = &mut self.pond.cells[index];
        cell.id = id;
        cell.parent_id = 0;
        cell.lineage = id;
        cell.generation = 0;
        cell.energy += inflow;
        self.pond.cells[index].genome.randomize(&mut self.prng);
        (x, y)
    }

    /// Scan the pond, hand the report to the sink, surface population
    /// transitions, and reset the window counters.
    fn emit_report(&mut self) {
        let totals = self.pond.totals();
        let executions = self.stats.cell_executions;
        let mut instr_frequency = [0.0f64; 16];
        let mut metabolism = 0.0f64;
        if executions > 0 {
            let denominator = executions as f64;
            let mut total_instructions = 0u64;
            for (frequency, &count) in instr_frequency.iter_mut().zip(&self.stats.instr) {
                *frequency = count as f64 / denominator;
                total_instructions += count;
            }
            metabolism = total_instructions as f64 / denominator;
        }

        let report = PondReport {
            clock: self.clock,
            total_energy: totals.total_energy,
            active_cells: totals.active_cells,
            viable_replicators: totals.viable_replicators,
            max_generation: totals.max_generation,
            viable_replaced: self.stats.viable_replaced,
            viable_killed: self.stats.viable_killed,
            viable_shares: self.stats.viable_shares,
            instr_frequency,
            metabolism,
        };

        self.sink.on_report(&report);
        if self.last_viable == 0 && totals.viable_replicators > 0 {
            self.sink.on_population_event(PopulationEvent::ReplicatorsEmerged);
        } else if self.last_viable > 0 && totals.viable_replicators == 0 {
            self.sink.on_population_event(PopulationEvent::ReplicatorsExtinct);
        }
        self.last_viable = totals.viable_replicators;

        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(report);
        self.stats.reset();
    }

    /// Similarity-gated access check for inter-cell interactions.
    ///
    /// Draws exactly one PRNG word per call; slots with no parent are
    /// always open.
    fn access_allowed(&mut self, target: usize, guess: u64, sense: Sense) -> bool {
        let target_cell = &self.pond.cells[target];
        let distance =
            u64::from((target_cell.genome.first_codon() ^ (guess & 0xf)).count_ones());
        let open = target_cell.parent_id == 0;
        let roll = self.prng.next_u64() & 0xf;
        match sense {
            Sense::Negative => roll <= distance || open,
            Sense::Positive => roll >= distance || open,
        }
    }

    /// Execute the VM for the cell at `(x, y)` until its energy or a
    /// STOP ends the run, then try to commit the output buffer as
    /// offspring into the faced neighbor.
    ///
    /// Normally invoked by [`World::tick`]; exposed so a specific slot
    /// can be driven directly.
    pub fn execute_cell(&mut self, x: usize, y: usize) {
        let actor = self.pond.index(x, y);

        self.output_buf.fill_ones();
        self.loop_stack.clear();
        let mut ptr_word = 0usize;
        let mut ptr_shift = 0usize;
        let mut reg = 0u64;
        let mut exec_word = EXEC_START_WORD;
        let mut exec_shift = EXEC_START_BIT;
        let mut facing = Direction::Left;
        let mut false_loop_depth = 0usize;
        let mut stop = false;

        // Current execution word, cached to spare a load per fetch.
        // Refreshed whenever the genome word under the cursor may have
        // changed: WRITEG, XCHG, and word advances.
        let mut current_word = self.pond.cells[actor].genome.words[EXEC_START_WORD];

        self.stats.cell_executions += 1;

        while self.pond.cells[actor].energy > 0 && !stop {
            let mut codon = (current_word >> exec_shift) & 0xf;

            // Frob either the fetched codon or the register. Mutating VM
            // state rather than the genome lets one event turn into
            // insertions, deletions, or duplications downstream.
            if (self.prng.next_u64() & 0xffff_ffff) < u64::from(self.config.mutation_rate) {
                let roll = self.prng.next_u64();
                if roll & 0x80 != 0 {
                    codon = roll & 0xf;
                } else {
                    reg = roll & 0xf;
                }
            }

            self.pond.cells[actor].energy -= 1;

            if false_loop_depth > 0 {
                // Skipping a false LOOP body; only track nesting.
                match codon {
                    opcodes::LOOP => false_loop_depth += 1,
                    opcodes::REP => false_loop_depth -= 1,
                    _ => {}
                }
            } else {
                self.stats.instr[codon as usize] += 1;
                match codon {
                    opcodes::ZERO => {
                        reg = 0;
                        ptr_word = 0;
                        ptr_shift = 0;
                        facing = Direction::Left;
                    }
                    opcodes::FWD => {
                        ptr_shift += 4;
                        if ptr_shift >= WORD_BITS {
                            ptr_word += 1;
                            if ptr_word >= GENOME_WORDS {
                                ptr_word = 0;
                            }
                            ptr_shift = 0;
                        }
                    }
                    opcodes::BACK => {
                        if ptr_shift > 0 {
                            ptr_shift -= 4;
                        } else {
                            ptr_word = if ptr_word > 0 {
                                ptr_word - 1
                            } else {
                                GENOME_WORDS - 1
                            };
                            ptr_shift = WORD_BITS - 4;
                        }
                    }
                    opcodes::INC => reg = (reg + 1) & 0xf,
                    opcodes::DEC => reg = reg.wrapping_sub(1) & 0xf,
                    opcodes::READG => {
                        reg = self.pond.cells[actor].genome.codon(ptr_word, ptr_shift);
                    }
                    opcodes::WRITEG => {
                        let genome = &mut self.pond.cells[actor].genome;
                        genome.set_codon(ptr_word, ptr_shift, reg);
                        current_word = genome.words[exec_word];
                    }
                    opcodes::READB => reg = self.output_buf.codon(ptr_word, ptr_shift),
                    opcodes::WRITEB => self.output_buf.set_codon(ptr_word, ptr_shift, reg),
                    opcodes::LOOP => {
                        if reg != 0 {
                            if self.loop_stack.len() >= POND_DEPTH {
                                stop = true;
                            } else {
                                self.loop_stack.push((exec_word, exec_shift));
                            }
                        } else {
                            false_loop_depth = 1;
                        }
                    }
                    opcodes::REP => {
                        if let Some((word, shift)) = self.loop_stack.pop() {
                            if reg != 0 {
                                exec_word = word;
                                exec_shift = shift;
                                current_word = self.pond.cells[actor].genome.words[exec_word];
                                // Rerun the LOOP itself: skip the cursor advance.
                                continue;
                            }
                        }
                    }
                    opcodes::TURN => facing = Direction::from_bits(reg),
                    opcodes::XCHG => {
                        exec_shift += 4;
                        if exec_shift >= WORD_BITS {
                            exec_word += 1;
                            if exec_word >= GENOME_WORDS {
                                exec_word = EXEC_START_WORD;
                                exec_shift = EXEC_START_BIT;
                            } else {
                                exec_shift = 0;
                            }
                        }
                        let genome = &mut self.pond.cells[actor].genome;
                        let swapped = genome.codon(exec_word, exec_shift);
                        genome.set_codon(exec_word, exec_shift, reg);
                        reg = swapped;
                        current_word = genome.words[exec_word];
                    }
                    opcodes::KILL => {
                        let (nx, ny) = self.pond.neighbor_coords(x, y, facing);
                        let target = self.pond.index(nx, ny);
                        if self.access_allowed(target, reg, Sense::Negative) {
                            if self.pond.cells[target].is_viable() {
                                self.stats.viable_killed += 1;
                            }
                            let id = self.cell_id_counter;
                            self.cell_id_counter += 1;
                            let victim = &mut self.pond.cells[target];
                            // Blanking the first two words is enough to
                            // erase the program prefix.
                            victim.genome.words[0] = !0;
                            victim.genome.words[1] = !0;
                            victim.id = id;
                            victim.parent_id = 0;
                            victim.lineage = id;
                            victim.generation = 0;
                        } else if self.pond.cells[target].is_viable() {
                            let attacker = &mut self.pond.cells[actor];
                            let toll = attacker.energy / self.config.failed_kill_penalty;
                            attacker.energy -= toll;
                        }
                    }
                    opcodes::SHARE => {
                        let (nx, ny) = self.pond.neighbor_coords(x, y, facing);
                        let target = self.pond.index(nx, ny);
                        if self.access_allowed(target, reg, Sense::Positive) {
                            if self.pond.cells[target].is_viable() {
                                self.stats.viable_shares += 1;
                            }
                            let total =
                                self.pond.cells[actor].energy + self.pond.cells[target].energy;
                            self.pond.cells[target].energy = total / 2;
                            self.pond.cells[actor].energy = total - total / 2;
                        }
                    }
                    opcodes::STOP => stop = true,
                    _ => unreachable!("codon is masked to four bits"),
                }
            }

            exec_shift += 4;
            if exec_shift >= WORD_BITS {
                exec_word += 1;
                if exec_word >= GENOME_WORDS {
                    exec_word = EXEC_START_WORD;
                    exec_shift = EXEC_START_BIT;
                } else {
                    exec_shift = 0;
                }
                current_word = self.pond.cells[actor].genome.words[exec_word];
            }
        }

        // Commit the output buffer into the faced neighbor, but only if
        // the cell actually emitted something (first two codons differ
        // from the blank pattern), the neighbor has energy to execute
        // anything at all, and the access gate agrees.
        if self.output_buf.words[0] & 0xff != 0xff {
            let (nx, ny) = self.pond.neighbor_coords(x, y, facing);
            let target = self.pond.index(nx, ny);
            if self.pond.cells[target].is_alive()
                && self.access_allowed(target, reg, Sense::Negative)
            {
                if self.pond.cells[target].is_viable() {
                    self.stats.viable_replaced += 1;
                }
                self.cell_id_counter += 1;
                let (parent_id, parent_lineage, parent_generation) = {
                    let parent = &self.pond.cells[actor];
                    (parent.id, parent.lineage, parent.generation)
                };
                let child = &mut self.pond.cells[target];
                child.id = self.cell_id_counter;
                child.parent_id = parent_id;
                child.lineage = parent_lineage;
                child.generation = parent_generation + 1;
                child.genome = self.output_buf;
            }
        }
    }
}
