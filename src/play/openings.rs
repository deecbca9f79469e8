use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::Res;

/// FEN of the standard starting position, substituted for the `startpos`
/// token in openings files.
pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

struct Cursor {
    reader: BufReader<File>,
    next: usize,
}

/// A cycling cursor over a file of starting positions, one FEN per line.
/// Shared between all workers so that no opening is skipped or handed out
/// twice within one pass through the file.
pub struct OpeningBook {
    index: Vec<u64>,
    cursor: Mutex<Cursor>,
}

impl OpeningBook {
    /// Scans the file once, recording the byte offset of each line. With
    /// `random`, the offsets are shuffled by a PRNG seeded from `seed`, so
    /// the same seed reproduces the same order.
    pub fn open(path: &Path, random: bool, seed: u64) -> Res<Self> {
        let file = File::open(path)
            .with_context(|| format!("Couldn't open the openings file '{}'", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut index = vec![];
        let mut offset = 0u64;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .with_context(|| format!("Couldn't read the openings file '{}'", path.display()))?;
            if read == 0 {
                break;
            }
            index.push(offset);
            offset += read as u64;
        }
        if index.is_empty() {
            bail!("The openings file '{}' is empty", path.display());
        }
        if random {
            index.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        Ok(Self { index, cursor: Mutex::new(Cursor { reader, next: 0 }) })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        // an empty file is rejected at construction
        false
    }

    /// Returns the next starting FEN, wrapping around at the end of the file.
    pub fn next(&self) -> Res<String> {
        let mut cursor = self.cursor.lock().unwrap();
        let offset = self.index[cursor.next];
        cursor.next = (cursor.next + 1) % self.index.len();
        cursor.reader.seek(SeekFrom::Start(offset)).context("Couldn't seek in the openings file")?;
        let mut line = String::new();
        cursor.reader.read_line(&mut line).context("Couldn't read from the openings file")?;
        let fen = line.trim_end();
        Ok(if fen == "startpos" { STARTPOS_FEN.to_string() } else { fen.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const FENS: [&str; 3] = [
        "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
        "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR b KQkq - 0 1",
        "rnbqkbnr/pppppppp/8/8/2P5/8/PP1PPPPP/RNBQKBNR b KQkq - 0 1",
    ];

    fn book_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn cycles_through_all_entries() {
        let file = book_file(&FENS);
        let book = OpeningBook::open(file.path(), false, 0).unwrap();
        assert_eq!(book.len(), 3);
        for _ in 0..2 {
            for fen in FENS {
                assert_eq!(book.next().unwrap(), fen);
            }
        }
    }

    #[test]
    fn substitutes_startpos() {
        let file = book_file(&["startpos"]);
        let book = OpeningBook::open(file.path(), false, 0).unwrap();
        assert_eq!(book.next().unwrap(), STARTPOS_FEN);
    }

    #[test]
    fn shuffle_is_reproducible_and_complete() {
        let file = book_file(&FENS);
        let first: Vec<String> = {
            let book = OpeningBook::open(file.path(), true, 42).unwrap();
            (0..3).map(|_| book.next().unwrap()).collect()
        };
        let second: Vec<String> = {
            let book = OpeningBook::open(file.path(), true, 42).unwrap();
            (0..3).map(|_| book.next().unwrap()).collect()
        };
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort();
        let mut expected: Vec<String> = FENS.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn empty_file_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        assert!(OpeningBook::open(file.path(), false, 0).is_err());
    }

    #[test]
    fn missing_file_is_rejected() {
        assert!(OpeningBook::open(Path::new("does/not/exist.epd"), false, 0).is_err());
    }
}
