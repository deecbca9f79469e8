/// Score-based draw and resignation adjudication.
pub mod adjudication;
/// Engine subprocesses and the driver's view of a player.
pub mod engine;
/// The game state machine: one full game between two engines.
pub mod game;
/// A shared, optionally shuffled cursor over a file of starting positions.
pub mod openings;
/// Serializing a finished game as PGN text.
pub mod pgn;
/// Collecting and serializing training samples.
pub mod sample;
/// The worker pool that plays the scheduled games.
pub mod tournament;
/// Building UCI commands and parsing engine `info` output.
pub mod uci;
