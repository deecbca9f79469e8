//! `arbiters` runs automated matches between two chess engines that speak the
//! Universal Chess Interface. It launches the engines as subprocesses, drives
//! them through games under configurable time and search limits, adjudicates
//! the results, and records the outcome as PGN and optionally as training
//! samples.
//!
//! The [`play`] module contains the match machinery, [`cli`] the command line
//! parser. The chess rules themselves (move generation, FEN parsing, position
//! hashing) come from the `shakmaty` crate.

/// Parsing the cutechess-style command line.
pub mod cli;
/// Everything needed to actually play games: engine processes, the game state
/// machine, openings, adjudication, and the PGN/sample writers.
pub mod play;

pub type Res<T> = anyhow::Result<T>;

pub fn run_program() -> Res<()> {
    let settings = cli::parse_cli(std::env::args().skip(1))?;
    play::tournament::run(settings)
}
