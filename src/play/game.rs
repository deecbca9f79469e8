use anyhow::{anyhow, bail};
use itertools::Itertools;
use rand::Rng;
use shakmaty::fen::Fen;
use shakmaty::uci::UciMove;
use shakmaty::zobrist::{Zobrist64, ZobristHash};
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, MoveList, Position};

use crate::play::adjudication::{AdjudicationRule, DrawAdjudicator, ResignAdjudicator};
use crate::play::engine::Engine;
use crate::play::sample::{Sample, SampleParams};
use crate::play::tournament::Worker;
use crate::play::uci::{self, is_mate_score, ScoreT, SearchInfo, SearchLimits};
use crate::Res;

pub const WHITE: usize = 0;
pub const BLACK: usize = 1;

pub fn color_idx(color: Color) -> usize {
    match color {
        Color::White => WHITE,
        Color::Black => BLACK,
    }
}

/// Placeholder clock value when an engine only plays under node or depth
/// limits; large enough that time loss detection never fires.
const NO_CLOCK: i64 = i64::MAX / 2;

/// Result of a game from one player's perspective.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[must_use]
pub enum PlayerResult {
    Win,
    Lose,
    Draw,
}

impl PlayerResult {
    pub fn flip(self) -> Self {
        match self {
            PlayerResult::Win => PlayerResult::Lose,
            PlayerResult::Lose => PlayerResult::Win,
            PlayerResult::Draw => PlayerResult::Draw,
        }
    }
}

/// Why a game ended. `None` only while the game is in progress.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[must_use]
pub enum Termination {
    #[default]
    None,
    Checkmate,
    Stalemate,
    Threefold,
    FiftyMoves,
    InsufficientMaterial,
    IllegalMove,
    TimeLoss,
    DrawAdjudication,
    Resign,
}

impl Termination {
    /// Decisive terminations are lost by the side to move in the final
    /// position; everything else is a draw.
    pub fn is_decisive(self) -> bool {
        matches!(
            self,
            Termination::Checkmate | Termination::IllegalMove | Termination::TimeLoss | Termination::Resign
        )
    }
}

/// Match-wide options the driver needs for a single game.
#[derive(Debug, Default, Clone)]
pub struct GameOptions {
    pub draw: Option<AdjudicationRule>,
    pub resign: Option<AdjudicationRule>,
    pub sample: Option<SampleParams>,
}

/// The record of a single game: the full position history (which doubles as
/// the repetition table and the PGN movetext source), per-ply engine
/// telemetry, and any training samples taken along the way.
pub struct Game {
    pub round: usize,
    pub game: usize,
    /// Display names, indexed by color.
    pub names: [String; 2],
    /// `pos[i]` is the position after `i` plies; `pos[0]` is the opening.
    pub pos: Vec<Chess>,
    /// `moves[i]` turned `pos[i]` into `pos[i + 1]`.
    pub moves: Vec<Move>,
    /// Position keys parallel to `pos`, for repetition detection.
    pub keys: Vec<Zobrist64>,
    pub info: Vec<SearchInfo>,
    pub samples: Vec<Sample>,
    pub state: Termination,
    pub chess960: bool,
}

impl Game {
    pub fn new(round: usize, game: usize, fen: &str) -> Res<Self> {
        let parsed =
            Fen::from_ascii(fen.trim().as_bytes()).map_err(|err| anyhow!("Invalid FEN '{fen}': {err}"))?;
        // A FEN whose castling rights only make sense with the rooks away
        // from their classical squares starts a Chess960 game.
        let (pos, chess960) = match parsed.clone().into_position::<Chess>(CastlingMode::Standard) {
            Ok(pos) => (pos, false),
            Err(_) => (
                parsed
                    .into_position(CastlingMode::Chess960)
                    .map_err(|err| anyhow!("Unplayable starting position '{fen}': {err}"))?,
                true,
            ),
        };
        let key = pos.zobrist_hash(EnPassantMode::Legal);
        Ok(Self {
            round,
            game,
            names: [String::new(), String::new()],
            pos: vec![pos],
            moves: vec![],
            keys: vec![key],
            info: vec![],
            samples: vec![],
            state: Termination::None,
            chess960,
        })
    }

    /// Number of plies played so far.
    pub fn ply(&self) -> usize {
        self.moves.len()
    }

    pub fn current(&self) -> &Chess {
        &self.pos[self.moves.len()]
    }

    pub fn castling_mode(&self) -> CastlingMode {
        if self.chess960 {
            CastlingMode::Chess960
        } else {
            CastlingMode::Standard
        }
    }

    pub fn fen_at(&self, ply: usize) -> String {
        Fen::from_position(self.pos[ply].clone(), EnPassantMode::Legal).to_string()
    }

    /// The move played at `ply`, in long algebraic notation.
    pub fn lan(&self, ply: usize) -> String {
        self.moves[ply].to_uci(self.castling_mode()).to_string()
    }

    /// Checks the current position against the rules of chess. Returns the
    /// legal moves either way so the driver doesn't generate them twice.
    fn evaluate_rules(&self) -> (Termination, MoveList) {
        let pos = self.current();
        let legal = pos.legal_moves();
        if legal.is_empty() {
            let state = if pos.is_check() { Termination::Checkmate } else { Termination::Stalemate };
            return (state, legal);
        }
        if pos.halfmoves() >= 100 {
            return (Termination::FiftyMoves, legal);
        }
        if pos.is_insufficient_material() {
            return (Termination::InsufficientMaterial, legal);
        }
        // Only positions with the same side to move can repeat, and nothing
        // before the last irreversible move can, so the scan is bounded by
        // the halfmove clock.
        let ply = self.ply();
        let rule50 = pos.halfmoves() as usize;
        let mut count = 1;
        let mut back = 4;
        while back <= rule50 && back <= ply {
            if self.keys[ply - back] == self.keys[ply] {
                count += 1;
                if count == 3 {
                    return (Termination::Threefold, legal);
                }
            }
            back += 2;
        }
        (Termination::None, legal)
    }

    /// Follows the tactical prefix of the engine's PV from the current
    /// position and returns the deepest quiet, non-check position along it.
    /// A bad PV is worth a warning but never ends the game. Two positions
    /// rotate as working buffers so the walk doesn't allocate per move.
    fn resolve_pv(&self, worker: &mut Worker, engine_name: &str, pv: &str) -> Chess {
        let tokens: Vec<&str> = pv.split_whitespace().collect();
        let mut cur = self.current().clone();
        let mut next = cur.clone();
        let mut resolved = cur.clone();
        for (i, token) in tokens.iter().enumerate() {
            let mov = UciMove::from_ascii(token.as_bytes())
                .ok()
                .and_then(|uci| uci.to_move(&cur).ok());
            let Some(mov) = mov else {
                worker.warn(&format!(
                    "Illegal move in the PV of {engine_name}: {}",
                    tokens[i..].iter().join(" ")
                ));
                break;
            };
            if !(mov.is_capture() || mov.is_promotion()) {
                break;
            }
            next.clone_from(&cur);
            next.play_unchecked(&mov);
            std::mem::swap(&mut cur, &mut next);
            if !cur.is_check() {
                resolved.clone_from(&cur);
            }
        }
        resolved
    }

    fn maybe_sample(&mut self, worker: &mut Worker, params: &SampleParams, resolved: &Chess, score: ScoreT) {
        if params.resolve && is_mate_score(score) {
            return;
        }
        let rule50 = f64::from(self.current().halfmoves());
        if worker.rng.random::<f64>() >= params.freq * (-params.decay * rule50).exp() {
            return;
        }
        let pos = if params.resolve { resolved.clone() } else { self.current().clone() };
        if params.resolve && pos.is_check() {
            return;
        }
        let score = if pos.turn() != self.current().turn() { -score } else { score };
        self.samples.push(Sample {
            pos,
            score: score.clamp(ScoreT::from(i16::MIN), ScoreT::from(i16::MAX)) as i16,
            result: None,
        });
    }

    /// The final result from White's point of view. Only meaningful once the
    /// game is over.
    pub fn white_pov_result(&self) -> PlayerResult {
        if self.state.is_decisive() {
            // the side to move in the final position lost
            if self.current().turn() == Color::White {
                PlayerResult::Lose
            } else {
                PlayerResult::Win
            }
        } else {
            PlayerResult::Draw
        }
    }

    /// Plays the game out and returns the result from `engines[0]`'s point
    /// of view. `reverse` makes `engines[1]` move first from the opening.
    pub fn play(
        &mut self,
        worker: &mut Worker,
        engines: &mut [&mut dyn Engine; 2],
        limits: &[SearchLimits; 2],
        options: &GameOptions,
        reverse: bool,
    ) -> Res<PlayerResult> {
        // `names` is indexed by color, independent of which engine started
        let start_turn = color_idx(self.pos[0].turn());
        for color in [WHITE, BLACK] {
            self.names[color] = engines[color ^ start_turn ^ usize::from(reverse)].name().to_string();
        }
        for engine in engines.iter_mut() {
            if self.chess960 {
                if !engine.supports_chess960() {
                    bail!(
                        "Worker {}: engine '{}' does not support Chess960, which the starting position requires",
                        worker.id,
                        engine.name()
                    );
                }
                engine.writeln(worker, "setoption name UCI_Chess960 value true")?;
            }
            engine.writeln(worker, "ucinewgame")?;
            engine.sync(worker)?;
        }

        let mut draw = DrawAdjudicator::new(options.draw);
        let mut resign = ResignAdjudicator::new(options.resign);
        let mut time_left = [limits[0].time.unwrap_or(0), limits[1].time.unwrap_or(0)];
        let mut ei = usize::from(reverse);
        let mut played: Option<Move> = None;

        loop {
            if let Some(mov) = played.take() {
                let mut next = self.current().clone();
                next.play_unchecked(&mov);
                self.keys.push(next.zobrist_hash(EnPassantMode::Legal));
                self.pos.push(next);
                self.moves.push(mov);
            }
            let (state, legal) = self.evaluate_rules();
            if state != Termination::None {
                self.state = state;
                break;
            }

            engines[ei].writeln(worker, &uci::position_command(self))?;
            engines[ei].sync(worker)?;

            // Clock policy for the side about to move. A fixed move time
            // overrides the clock; otherwise the increment is granted up
            // front, plus the periodic refill under a movestogo control.
            let lim = &limits[ei];
            if let Some(movetime) = lim.movetime {
                time_left[ei] = movetime;
            } else if lim.time.is_some() || lim.increment.is_some() {
                time_left[ei] += lim.increment.unwrap_or(0);
                if let Some(movestogo) = lim.movestogo {
                    let ply = self.ply();
                    if ply > 1 && (ply as u32 / 2) % movestogo == 0 {
                        time_left[ei] += lim.time.unwrap_or(0);
                    }
                }
            } else {
                time_left[ei] = NO_CLOCK;
            }

            engines[ei].writeln(worker, &uci::go_command(self, limits, ei, &time_left))?;
            let reply = engines[ei].bestmove(worker, &mut time_left[ei])?;
            self.info.push(reply.info);
            let resolved = self.resolve_pv(worker, engines[ei].name(), &reply.pv);

            let Some(best) = reply.best else {
                self.state = Termination::TimeLoss;
                break;
            };
            let mov = UciMove::from_ascii(best.as_bytes())
                .ok()
                .and_then(|uci| uci.to_move(self.current()).ok())
                .filter(|mov| legal.contains(mov));
            let Some(mov) = mov else {
                worker.warn(&format!("Engine '{}' played the illegal move '{best}'", engines[ei].name()));
                self.state = Termination::IllegalMove;
                break;
            };
            if lim.is_clocked() && time_left[ei] < 0 {
                self.state = Termination::TimeLoss;
                break;
            }
            let score = reply.info.score;
            if draw.update(self.ply(), score) {
                self.state = Termination::DrawAdjudication;
                break;
            }
            if resign.update(ei, self.ply(), score) {
                self.state = Termination::Resign;
                break;
            }
            if let Some(params) = options.sample {
                self.maybe_sample(worker, &params, &resolved, score);
            }

            played = Some(mov);
            ei ^= 1;
        }

        // A game that ends on the engine's reply rather than on the board
        // has one reply too many recorded for it.
        self.info.truncate(self.ply());

        let wpov = self.white_pov_result();
        for sample in &mut self.samples {
            sample.result =
                Some(if sample.pos.turn() == Color::White { wpov } else { wpov.flip() });
        }
        Ok(if self.state.is_decisive() {
            if ei == 0 {
                PlayerResult::Lose
            } else {
                PlayerResult::Win
            }
        } else {
            PlayerResult::Draw
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_from(fen: &str) -> Game {
        Game::new(0, 0, fen).unwrap()
    }

    fn push_lan(game: &mut Game, lan: &str) {
        let uci = UciMove::from_ascii(lan.as_bytes()).unwrap();
        let mov = uci.to_move(game.current()).unwrap();
        let mut next = game.current().clone();
        next.play_unchecked(&mov);
        game.keys.push(next.zobrist_hash(EnPassantMode::Legal));
        game.pos.push(next);
        game.moves.push(mov);
    }

    #[test]
    fn detects_checkmate_and_stalemate() {
        let mut game = game_from(crate::play::openings::STARTPOS_FEN);
        for lan in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            push_lan(&mut game, lan);
        }
        assert_eq!(game.evaluate_rules().0, Termination::Checkmate);

        let stalemate = game_from("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1");
        assert_eq!(stalemate.evaluate_rules().0, Termination::Stalemate);
    }

    #[test]
    fn detects_fifty_move_rule() {
        let mut game = game_from("8/8/8/8/8/4k3/8/4K2R w - - 99 80");
        assert_eq!(game.evaluate_rules().0, Termination::None);
        push_lan(&mut game, "h1h2");
        assert_eq!(game.current().halfmoves(), 100);
        assert_eq!(game.evaluate_rules().0, Termination::FiftyMoves);
    }

    #[test]
    fn detects_insufficient_material() {
        let game = game_from("8/8/8/8/8/4k3/8/4KN2 w - - 10 60");
        assert_eq!(game.evaluate_rules().0, Termination::InsufficientMaterial);
    }

    #[test]
    fn detects_threefold_repetition() {
        let mut game = game_from(crate::play::openings::STARTPOS_FEN);
        let shuffle = ["g1f3", "g8f6", "f3g1", "f6g8"];
        for lan in shuffle.iter().chain(shuffle.iter()) {
            push_lan(&mut game, lan);
        }
        assert_eq!(game.ply(), 8);
        assert_eq!(game.evaluate_rules().0, Termination::Threefold);
        // the second occurrence alone isn't enough
        let mut game = game_from(crate::play::openings::STARTPOS_FEN);
        for lan in shuffle {
            push_lan(&mut game, lan);
        }
        assert_eq!(game.evaluate_rules().0, Termination::None);
    }

    #[test]
    fn repetition_scan_respects_rule50_reset() {
        // the same key can't count across an irreversible move
        let mut game = game_from(crate::play::openings::STARTPOS_FEN);
        for lan in ["g1f3", "g8f6", "f3g1", "f6g8", "e2e4", "e7e5", "g1f3", "g8f6", "f3g1", "f6g8"] {
            push_lan(&mut game, lan);
        }
        assert_eq!(game.evaluate_rules().0, Termination::None);
    }

    #[test]
    fn position_command_truncates_at_rule50_reset() {
        let mut game = game_from(crate::play::openings::STARTPOS_FEN);
        for lan in ["g1f3", "g8f6", "e2e4"] {
            push_lan(&mut game, lan);
        }
        // the pawn push just reset the clock, so no moves are sent
        assert_eq!(uci::position_command(&game), format!("position fen {}", game.fen_at(3)));
        push_lan(&mut game, "f6g8");
        let cmd = uci::position_command(&game);
        assert_eq!(cmd, format!("position fen {} moves f6g8", game.fen_at(3)));
        // replaying the truncated command reproduces the current position
        let mut replayed: Chess = game
            .fen_at(3)
            .parse::<Fen>()
            .unwrap()
            .into_position(CastlingMode::Standard)
            .unwrap();
        let mov = UciMove::from_ascii(b"f6g8").unwrap().to_move(&replayed).unwrap();
        replayed.play_unchecked(&mov);
        let key: Zobrist64 = replayed.zobrist_hash(EnPassantMode::Legal);
        assert_eq!(key, game.keys[4]);
    }

    #[test]
    fn white_pov_result_decoding() {
        let mut game = game_from(crate::play::openings::STARTPOS_FEN);
        game.state = Termination::Checkmate;
        // White to move in the final position means White lost
        assert_eq!(game.white_pov_result(), PlayerResult::Lose);
        game.state = Termination::Threefold;
        assert_eq!(game.white_pov_result(), PlayerResult::Draw);
    }

    #[test]
    fn pv_resolution_stops_at_quiet_moves() {
        let mut worker = Worker::new(0, 0, false).unwrap();
        // Scandinavian: after e4 d5, exd5 is tactical, then Qxd5 recaptures
        let mut game = game_from(crate::play::openings::STARTPOS_FEN);
        for lan in ["e2e4", "d7d5"] {
            push_lan(&mut game, lan);
        }
        let resolved = game.resolve_pv(&mut worker, "test", "e4d5 d8d5 b1c3");
        let expected = game_after(&game, &["e4d5", "d8d5"]);
        assert_eq!(fen_of(&resolved), fen_of(&expected));
        // a quiet first move resolves to the current position
        let resolved = game.resolve_pv(&mut worker, "test", "g1f3 g8f6");
        assert_eq!(fen_of(&resolved), fen_of(game.current()));
        // an illegal continuation stops the walk without ending the game
        let resolved = game.resolve_pv(&mut worker, "test", "e4d5 a1a8");
        let expected = game_after(&game, &["e4d5"]);
        assert_eq!(fen_of(&resolved), fen_of(&expected));
    }

    fn fen_of(pos: &Chess) -> String {
        Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
    }

    fn game_after(game: &Game, lans: &[&str]) -> Chess {
        let mut pos = game.current().clone();
        for lan in lans {
            let mov = UciMove::from_ascii(lan.as_bytes()).unwrap().to_move(&pos).unwrap();
            pos.play_unchecked(&mov);
        }
        pos
    }
}
