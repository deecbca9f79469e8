//! <See https://ia902908.us.archive.org/26/items/pgn-standard-1994-03-12/PGN_standard_1994-03-12.txt>

use std::fmt::Write;

use shakmaty::san::SanPlus;
use shakmaty::{Color, Position};

use crate::play::game::{Game, PlayerResult, Termination, BLACK, WHITE};
use crate::play::uci::format_score;

/// The PGN result token of a finished (or unfinished) game.
pub fn result_token(game: &Game) -> &'static str {
    if game.state == Termination::None {
        return "*";
    }
    match game.white_pov_result() {
        PlayerResult::Win => "1-0",
        PlayerResult::Lose => "0-1",
        PlayerResult::Draw => "1/2-1/2",
    }
}

/// The value of the PGN `Termination` tag.
pub fn termination_str(game: &Game) -> &'static str {
    match game.state {
        Termination::None => "unterminated",
        Termination::Checkmate => "checkmate",
        Termination::Stalemate => "stalemate",
        Termination::Threefold => "3-fold repetition",
        Termination::FiftyMoves => "50 moves rule",
        Termination::InsufficientMaterial => "insufficient material",
        Termination::IllegalMove => "rules infraction",
        Termination::DrawAdjudication | Termination::Resign => "adjudication",
        Termination::TimeLoss => "time forfeit",
    }
}

/// Serializes one game as a PGN record, ending with the result token and a
/// blank line. Verbosity 0 omits the movetext, 1 is plain SAN, 2 adds
/// `{score/depth}` comments, 3 additionally the per-move search time.
pub fn game_to_pgn(game: &Game, verbosity: u32, event: &str, site: &str) -> String {
    let result = result_token(game);
    let mut res = format!(
        "[Event \"{event}\"]\n\
         [Site \"{site}\"]\n\
         [Date \"{date}\"]\n\
         [Round \"{round}.{game_nr}\"]\n\
         [White \"{white}\"]\n\
         [Black \"{black}\"]\n\
         [Result \"{result}\"]\n\
         [Termination \"{termination}\"]\n\
         [FEN \"{fen}\"]\n\
         [PlyCount \"{plies}\"]\n",
        date = chrono::Utc::now().format("%Y.%m.%d"),
        round = game.round + 1,
        game_nr = game.game + 1,
        white = game.names[WHITE],
        black = game.names[BLACK],
        termination = termination_str(game),
        fen = game.fen_at(0),
        plies = game.ply(),
    );
    if game.chess960 {
        res.push_str("[Variant \"Chess960\"]\n");
    }
    res.push('\n');
    if verbosity >= 1 {
        let plies_per_line = match verbosity {
            2 => 6,
            3 => 5,
            _ => 16,
        };
        let mut pos = game.pos[0].clone();
        let mut line_plies = 0;
        for (ply, mov) in game.moves.iter().enumerate() {
            let move_number = pos.fullmoves();
            let white_to_move = pos.turn() == Color::White;
            let san = SanPlus::from_move_and_play_unchecked(&mut pos, mov);
            if white_to_move {
                _ = write!(res, "{move_number}. ");
            } else if ply == 0 {
                // only the leading Black move carries its number
                _ = write!(res, "{move_number}... ");
            }
            _ = write!(res, "{san}");
            if verbosity >= 2 {
                let info = &game.info[ply];
                if verbosity >= 3 {
                    _ = write!(res, " {{{}/{} {}ms}}", format_score(info.score), info.depth, info.time);
                } else {
                    _ = write!(res, " {{{}/{}}}", format_score(info.score), info.depth);
                }
            }
            line_plies += 1;
            if ply + 1 < game.ply() {
                if line_plies == plies_per_line {
                    res.push('\n');
                    line_plies = 0;
                } else {
                    res.push(' ');
                }
            }
        }
        if game.ply() > 0 {
            res.push(' ');
        }
    }
    res.push_str(result);
    res.push_str("\n\n");
    res
}

#[cfg(test)]
mod tests {
    use shakmaty::uci::UciMove;
    use shakmaty::zobrist::ZobristHash;
    use shakmaty::{EnPassantMode, Position};

    use super::*;
    use crate::play::openings::STARTPOS_FEN;
    use crate::play::uci::SearchInfo;

    fn fools_mate() -> Game {
        let mut game = Game::new(2, 1, STARTPOS_FEN).unwrap();
        game.names = ["alpha".to_string(), "beta".to_string()];
        for lan in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            let uci = UciMove::from_ascii(lan.as_bytes()).unwrap();
            let mov = uci.to_move(game.current()).unwrap();
            let mut next = game.current().clone();
            next.play_unchecked(&mov);
            game.keys.push(next.zobrist_hash(EnPassantMode::Legal));
            game.pos.push(next);
            game.moves.push(mov);
            game.info.push(SearchInfo { depth: 3, score: 50, time: 12 });
        }
        game.state = Termination::Checkmate;
        game
    }

    #[test]
    fn tags_and_movetext() {
        let game = fools_mate();
        let pgn = game_to_pgn(&game, 1, "test event", "?");
        assert!(pgn.contains("[Event \"test event\"]"));
        assert!(pgn.contains("[Round \"3.2\"]"));
        assert!(pgn.contains("[White \"alpha\"]"));
        assert!(pgn.contains("[Black \"beta\"]"));
        assert!(pgn.contains("[Result \"0-1\"]"));
        assert!(pgn.contains("[Termination \"checkmate\"]"));
        assert!(pgn.contains(&format!("[FEN \"{STARTPOS_FEN}\"]")));
        assert!(pgn.contains("[PlyCount \"4\"]"));
        assert!(!pgn.contains("Variant"));
        assert!(pgn.contains("1. f3 e5 2. g4 Qh4# 0-1"));
        assert!(pgn.ends_with("0-1\n\n"));
    }

    #[test]
    fn verbosity_zero_has_no_movetext() {
        let pgn = game_to_pgn(&fools_mate(), 0, "?", "?");
        assert!(!pgn.contains("1. f3"));
        assert!(pgn.ends_with("\n0-1\n\n"));
    }

    #[test]
    fn comments_carry_score_depth_and_time() {
        let pgn = game_to_pgn(&fools_mate(), 2, "?", "?");
        assert!(pgn.contains("f3 {50/3}"));
        assert!(!pgn.contains("ms}"));
        let pgn = game_to_pgn(&fools_mate(), 3, "?", "?");
        assert!(pgn.contains("f3 {50/3 12ms}"));
    }

    #[test]
    fn black_starts_with_its_move_number() {
        let mut game =
            Game::new(0, 0, "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1").unwrap();
        game.names = ["w".to_string(), "b".to_string()];
        for lan in ["e7e5", "g1f3"] {
            let uci = UciMove::from_ascii(lan.as_bytes()).unwrap();
            let mov = uci.to_move(game.current()).unwrap();
            let mut next = game.current().clone();
            next.play_unchecked(&mov);
            game.keys.push(next.zobrist_hash(EnPassantMode::Legal));
            game.pos.push(next);
            game.moves.push(mov);
        }
        let pgn = game_to_pgn(&game, 1, "?", "?");
        assert!(pgn.contains("1... e5 2. Nf3 *"));
        assert!(pgn.contains("[Result \"*\"]"));
        assert!(pgn.contains("[Termination \"unterminated\"]"));
    }

    #[test]
    fn draws_and_forfeits_map_to_the_right_tags() {
        let mut game = fools_mate();
        game.state = Termination::FiftyMoves;
        let pgn = game_to_pgn(&game, 0, "?", "?");
        assert!(pgn.contains("[Result \"1/2-1/2\"]"));
        assert!(pgn.contains("[Termination \"50 moves rule\"]"));
        // Black delivered the final position, so White is to move and loses
        game.state = Termination::TimeLoss;
        let pgn = game_to_pgn(&game, 0, "?", "?");
        assert!(pgn.contains("[Result \"0-1\"]"));
        assert!(pgn.contains("[Termination \"time forfeit\"]"));
    }

    #[test]
    fn long_games_wrap_lines() {
        let mut game = Game::new(0, 0, STARTPOS_FEN).unwrap();
        game.names = ["w".to_string(), "b".to_string()];
        let shuffle = ["g1f3", "g8f6", "f3g1", "f6g8"];
        for lan in shuffle.iter().cycle().take(20) {
            let uci = UciMove::from_ascii(lan.as_bytes()).unwrap();
            let mov = uci.to_move(game.current()).unwrap();
            let mut next = game.current().clone();
            next.play_unchecked(&mov);
            game.keys.push(next.zobrist_hash(EnPassantMode::Legal));
            game.pos.push(next);
            game.moves.push(mov);
        }
        game.state = Termination::Threefold;
        let pgn = game_to_pgn(&game, 1, "?", "?");
        let movetext: Vec<&str> = pgn.split("\n\n").nth(1).unwrap().lines().collect();
        assert_eq!(movetext.len(), 2);
    }
}
