use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{sleep, Builder};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use itertools::Itertools;

use crate::play::tournament::Worker;
use crate::play::uci::{self, SearchInfo};
use crate::Res;

/// How long an engine may overshoot its clock before the driver stops
/// waiting for `bestmove` and forfeits the game for it.
#[derive(Debug, Copy, Clone)]
pub struct TimeMargin(pub Duration);

impl Default for TimeMargin {
    fn default() -> Self {
        Self(Duration::from_millis(100))
    }
}

/// Grace period for the initial handshake and for `isready` round trips.
const SYNC_GRACE: Duration = Duration::from_millis(5000);

/// The outcome of one search turn. `best` is `None` when no `bestmove`
/// arrived within the clock plus margin, which loses the game on time but
/// is not an error; errors mean the engine process itself is gone.
#[derive(Debug, Default, Clone)]
pub struct SearchReply {
    pub best: Option<String>,
    pub pv: String,
    pub info: SearchInfo,
}

/// The driver's view of a player. Implemented by [`UciEngine`] for real
/// subprocesses; tests script opponents through the same trait.
pub trait Engine {
    fn name(&self) -> &str;
    fn supports_chess960(&self) -> bool;
    fn writeln(&mut self, worker: &mut Worker, line: &str) -> Res<()>;
    /// Blocking `isready`/`readyok` round trip.
    fn sync(&mut self, worker: &mut Worker) -> Res<()>;
    /// Waits for `bestmove`, folding `info` lines into the reply on the way,
    /// and charges the elapsed wall time against `time_left`.
    fn bestmove(&mut self, worker: &mut Worker, time_left: &mut i64) -> Res<SearchReply>;
}

/// A running engine subprocess. A dedicated thread drains its stdout into a
/// channel so the driver can wait for replies with a deadline.
pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    name: String,
    /// Names of the options the engine advertised during the handshake.
    options: Vec<String>,
    time_margin: TimeMargin,
}

impl UciEngine {
    /// Spawns the process, performs the `uci` handshake, and applies any
    /// user-supplied options. The display name defaults to the engine's
    /// `id name` reply, falling back to the command itself.
    pub fn start(
        worker: &mut Worker,
        cmd: &str,
        args: &[String],
        name: Option<&str>,
        custom_options: &[(String, String)],
        time_margin: TimeMargin,
    ) -> Res<Self> {
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Worker {}: couldn't start engine '{cmd}'", worker.id))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("Engine '{cmd}' has no stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("Engine '{cmd}' has no stdout"))?;
        let (sender, lines) = unbounded();
        Builder::new().name(format!("UCI input from engine {cmd}")).spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {
                        if sender.send(line.trim_end().to_string()).is_err() {
                            return;
                        }
                    }
                }
            }
        })?;
        let mut engine = Self {
            child,
            stdin,
            lines,
            name: name.unwrap_or(cmd).to_string(),
            options: vec![],
            time_margin,
        };
        engine.handshake(worker, name.is_none())?;
        for (option, value) in custom_options {
            engine.writeln(worker, &format!("setoption name {option} value {value}"))?;
        }
        Ok(engine)
    }

    fn handshake(&mut self, worker: &mut Worker, take_id_name: bool) -> Res<()> {
        self.writeln(worker, "uci")?;
        let deadline = Instant::now() + SYNC_GRACE;
        loop {
            let line = self.recv(worker, deadline).map_err(|_| {
                anyhow!("Engine '{}' didn't answer 'uci' with 'uciok' in time", self.name)
            })?;
            let mut words = line.split_whitespace();
            match words.next() {
                Some("uciok") => return Ok(()),
                Some("id") => {
                    if words.next() == Some("name") && take_id_name {
                        let id_name = words.join(" ");
                        if !id_name.is_empty() {
                            self.name = id_name;
                        }
                    }
                }
                Some("option") => {
                    if words.next() == Some("name") {
                        let option: Vec<&str> = words.take_while(|w| *w != "type").collect();
                        self.options.push(option.join(" "));
                    }
                }
                _ => {}
            }
        }
    }

    fn recv(&self, worker: &mut Worker, deadline: Instant) -> Result<String, RecvTimeoutError> {
        let line = self.lines.recv_deadline(deadline)?;
        worker.log_line(&self.name, '>', &line);
        Ok(line)
    }
}

impl Engine for UciEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_chess960(&self) -> bool {
        self.options.iter().any(|option| option == "UCI_Chess960")
    }

    fn writeln(&mut self, worker: &mut Worker, line: &str) -> Res<()> {
        worker.log_line(&self.name, '<', line);
        writeln!(self.stdin, "{line}")
            .with_context(|| format!("Couldn't write to engine '{}' (did it crash?)", self.name))?;
        Ok(())
    }

    fn sync(&mut self, worker: &mut Worker) -> Res<()> {
        self.writeln(worker, "isready")?;
        let deadline = Instant::now() + SYNC_GRACE;
        loop {
            match self.recv(worker, deadline) {
                Ok(line) => {
                    if line.trim() == "readyok" {
                        return Ok(());
                    }
                }
                Err(_) => {
                    bail!("Engine '{}' didn't answer 'isready' with 'readyok' in time", self.name)
                }
            }
        }
    }

    fn bestmove(&mut self, worker: &mut Worker, time_left: &mut i64) -> Res<SearchReply> {
        let start = Instant::now();
        let budget =
            Duration::from_millis((*time_left).max(0) as u64).saturating_add(self.time_margin.0);
        // under pure node/depth limits the clock is a huge placeholder that
        // doesn't fit into an Instant, so wait without a deadline
        let deadline = start.checked_add(budget);
        let mut reply = SearchReply::default();
        loop {
            let received = match deadline {
                Some(deadline) => self.recv(worker, deadline),
                None => self.lines.recv().map_err(|_| RecvTimeoutError::Disconnected).inspect(|line| {
                    worker.log_line(&self.name, '>', line);
                }),
            };
            match received {
                Ok(line) => {
                    let mut words = line.split_whitespace();
                    match words.next() {
                        Some("info") => {
                            if let Err(err) = uci::parse_info(&line, &mut reply.info, &mut reply.pv) {
                                worker.warn(&format!(
                                    "Ignoring a malformed info line from '{}': {err}",
                                    self.name
                                ));
                            }
                        }
                        Some("bestmove") => {
                            reply.best = Some(words.next().unwrap_or_default().to_string());
                            break;
                        }
                        _ => {}
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // The engine blew through its clock and the margin. Stop
                    // the search and swallow the late bestmove so it cannot
                    // leak into the next turn.
                    _ = self.writeln(worker, "stop");
                    let grace = Instant::now() + Duration::from_millis(1000);
                    while let Ok(line) = self.recv(worker, grace) {
                        if line.starts_with("bestmove") {
                            break;
                        }
                    }
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("Lost the connection to engine '{}' (did it crash?)", self.name)
                }
            }
        }
        *time_left -= start.elapsed().as_millis() as i64;
        Ok(reply)
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        _ = writeln!(self.stdin, "quit");
        let start = Instant::now();
        // grant a grace period before resorting to kill
        while start.elapsed() < SYNC_GRACE {
            sleep(Duration::from_millis(50));
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
        }
        _ = self.child.kill();
        _ = self.child.wait();
    }
}
