use std::collections::HashMap;
use std::path::{Path, PathBuf};

use meval::Expr;

use crate::network::{NetworkBuilder, ReactionNetwork};
use crate::scheduler::Perturbation;
use crate::simulation::{RunOptions, Simulation};
use crate::{Result, SimError};

const SUFFIX: &str = ".gil";
const MAX_INCLUDE_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledPerturbation {
    pub time: f64,
    pub perturbation: Perturbation,
    pub comment: String,
}

/// A verified network plus everything else a description file asked for.
#[derive(Clone, Debug)]
pub struct LoadedModel {
    pub network: ReactionNetwork,
    pub perturbations: Vec<ScheduledPerturbation>,
    pub run_idle: bool,
    pub idle_tick: f64,
}

impl LoadedModel {
    /// Schedules the perturbations on a fresh simulation and returns it with
    /// run options seeded from the file's `runIdle`/`idleTick` settings.
    pub fn into_simulation(self) -> Result<(Simulation, RunOptions)> {
        let options = RunOptions {
            run_idle: self.run_idle,
            idle_tick: self.idle_tick,
            ..RunOptions::default()
        };
        let mut sim = Simulation::new(self.network);
        for p in self.perturbations {
            sim.schedule(p.time, p.perturbation)?;
        }
        Ok((sim, options))
    }
}

/// Reads a network description file. If `path` does not exist and has no
/// `.gil` suffix, the suffix is appended and the read retried.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<LoadedModel> {
    let mut loader = Loader::default();
    let path = resolve_suffix(path.as_ref());
    let lines = loader.read_file(&path, 0)?;
    loader.finish(&path.display().to_string(), lines)
}

/// Reads a network description from memory. `include` paths are resolved
/// against the current directory.
pub fn load_str(name: &str, source: &str) -> Result<LoadedModel> {
    let mut loader = Loader::default();
    let lines = loader.read_source(name, None, source, 0)?;
    loader.finish(name, lines)
}

fn resolve_suffix(path: &Path) -> PathBuf {
    if !path.exists() && !path.to_string_lossy().ends_with(SUFFIX) {
        let mut with_suffix = path.as_os_str().to_owned();
        with_suffix.push(SUFFIX);
        let with_suffix = PathBuf::from(with_suffix);
        if with_suffix.exists() {
            return with_suffix;
        }
    }
    path.to_path_buf()
}

fn parse_error(file: &str, line: usize, message: impl Into<String>) -> SimError {
    SimError::Parse {
        file: file.to_string(),
        line,
        message: message.into(),
    }
}

struct Loader {
    builder: NetworkBuilder,
    defines: HashMap<String, String>,
    run_idle: bool,
    idle_tick: f64,
    perturbations: Vec<ScheduledPerturbation>,
}

impl Default for Loader {
    fn default() -> Self {
        Self {
            builder: NetworkBuilder::new(),
            defines: HashMap::new(),
            run_idle: true,
            idle_tick: 0.3,
            perturbations: Vec::new(),
        }
    }
}

struct Line<'a> {
    file: &'a str,
    number: usize,
}

impl Line<'_> {
    fn error(&self, message: impl Into<String>) -> SimError {
        parse_error(self.file, self.number, message)
    }

    fn check_params(&self, directive: &str, tokens: &[String], min: usize, max: usize) -> Result<()> {
        let n = tokens.len();
        if n < min || n > max {
            return Err(self.error(format!(
                "\"{directive}\" requires min {min}, max {max} parameters, found {n}"
            )));
        }
        Ok(())
    }

    fn float(&self, token: &str) -> Result<f64> {
        token
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid number: {token}")))
    }

    fn fire_time(&self, token: &str) -> Result<f64> {
        match self.float(token)? {
            t if t.is_finite() => Ok(t),
            _ => Err(self.error(format!("invalid event time: {token}"))),
        }
    }

    fn count(&self, token: &str) -> Result<u32> {
        if let Ok(value) = token.parse::<u32>() {
            return Ok(value);
        }
        match token.parse::<f64>() {
            Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => Ok(v as u32),
            _ => Err(self.error(format!("invalid count: {token}"))),
        }
    }

    fn boolean(&self, token: &str) -> Result<bool> {
        match token.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(self.error(format!("invalid boolean value: {token}"))),
        }
    }

    fn wrap(&self, err: SimError) -> SimError {
        self.error(err.to_string())
    }
}

impl Loader {
    fn read_file(&mut self, path: &Path, depth: usize) -> Result<usize> {
        let source = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("reading {}", path.display());
        self.read_source(&path.display().to_string(), path.parent(), &source, depth)
    }

    fn read_source(
        &mut self,
        file: &str,
        dir: Option<&Path>,
        source: &str,
        depth: usize,
    ) -> Result<usize> {
        let mut lines = 0;
        for (idx, raw) in source.lines().enumerate() {
            lines = idx + 1;
            let line = Line { file, number: lines };
            let text = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            if text.trim().is_empty() {
                continue;
            }
            let (directive, rest) = text
                .split_once(':')
                .ok_or_else(|| line.error("bad directive (no colon)"))?;
            let tokens = tokenize(rest.trim()).map_err(|msg| line.error(msg))?;
            self.directive(&line, directive.trim(), tokens, dir, depth)?;
        }
        Ok(lines)
    }

    fn directive(
        &mut self,
        line: &Line<'_>,
        directive: &str,
        mut tokens: Vec<String>,
        dir: Option<&Path>,
        depth: usize,
    ) -> Result<()> {
        match directive.to_ascii_lowercase().as_str() {
            "include" => {
                line.check_params("include", &tokens, 1, 1)?;
                if depth >= MAX_INCLUDE_DEPTH {
                    return Err(line.error("includes nested too deeply"));
                }
                let target = Path::new(&tokens[0]);
                let target = match dir {
                    Some(dir) if target.is_relative() => dir.join(target),
                    _ => target.to_path_buf(),
                };
                let target = resolve_suffix(&target);
                self.read_file(&target, depth + 1)?;
            }
            "define" => {
                self.substitute(&mut tokens, 1);
                line.check_params("define", &tokens, 2, 2)?;
                if self.defines.contains_key(&tokens[0]) {
                    return Err(line.error(format!("redefinition: {}", tokens[0])));
                }
                let value = self.evaluate(line, &tokens[1])?;
                self.defines.insert(tokens[0].clone(), value);
            }
            "volume" => {
                self.substitute(&mut tokens, 0);
                line.check_params("volume", &tokens, 1, 1)?;
                self.builder.volume(line.float(&tokens[0])?);
            }
            "runidle" => {
                self.substitute(&mut tokens, 0);
                line.check_params("runIdle", &tokens, 1, 1)?;
                self.run_idle = line.boolean(&tokens[0])?;
            }
            "idletick" => {
                self.substitute(&mut tokens, 0);
                line.check_params("idleTick", &tokens, 1, 1)?;
                self.idle_tick = line.float(&tokens[0])?;
            }
            "allowoverride" => {
                self.substitute(&mut tokens, 0);
                line.check_params("allowOverride", &tokens, 1, 1)?;
                self.builder.allow_override(line.boolean(&tokens[0])?);
            }
            "molecule" => {
                self.substitute(&mut tokens, 1);
                line.check_params("molecule", &tokens, 2, 3)?;
                let count = line.count(&tokens[1])?;
                let description = tokens.get(2).map(String::as_str).unwrap_or("");
                self.builder
                    .add_molecule(&tokens[0], count, description)
                    .map_err(|e| line.wrap(e))?;
            }
            "reaction" => {
                self.substitute(&mut tokens, 1);
                line.check_params("reaction", &tokens, 3, 4)?;
                let k = line.float(&tokens[2])?;
                let description = tokens.get(3).map(String::as_str).unwrap_or("");
                self.builder
                    .add_reaction(&tokens[0], &tokens[1], k, description)
                    .map_err(|e| line.wrap(e))?;
            }
            "setcount" => {
                self.substitute(&mut tokens, 1);
                line.check_params("setCount", &tokens, 3, 4)?;
                let molecule = self
                    .builder
                    .molecule_index(&tokens[0])
                    .ok_or_else(|| line.error(format!("unknown molecule: {}", tokens[0])))?;
                let time = line.fire_time(&tokens[1])?;
                let count = line.count(&tokens[2])?;
                self.perturbations.push(ScheduledPerturbation {
                    time,
                    perturbation: Perturbation::SetCount { molecule, count },
                    comment: tokens.get(3).cloned().unwrap_or_default(),
                });
            }
            "setinhib" => {
                self.substitute(&mut tokens, 1);
                line.check_params("setInhib", &tokens, 3, 4)?;
                let reaction = self
                    .builder
                    .reaction_index(&tokens[0])
                    .ok_or_else(|| line.error(format!("unknown reaction: {}", tokens[0])))?;
                let time = line.fire_time(&tokens[1])?;
                let level = line.float(&tokens[2])?;
                if !(0.0..=1.0).contains(&level) {
                    return Err(line.error(format!(
                        "invalid inhibition level ({}), must be between 0.0 and 1.0",
                        tokens[2]
                    )));
                }
                self.perturbations.push(ScheduledPerturbation {
                    time,
                    perturbation: Perturbation::SetInhibition { reaction, level },
                    comment: tokens.get(3).cloned().unwrap_or_default(),
                });
            }
            _ => return Err(line.error(format!("unknown directive: {directive}"))),
        }
        Ok(())
    }

    fn substitute(&self, tokens: &mut [String], first: usize) {
        for token in tokens.iter_mut().skip(first) {
            if let Some(value) = self.defines.get(token.as_str()) {
                *token = value.clone();
            }
        }
    }

    /// Substitutes defined symbols in a define's value and, if the result
    /// is an arithmetic expression, replaces it with its value. Text that
    /// does not parse or evaluate (a molecule name, say) is kept verbatim;
    /// an expression evaluating to NaN or infinity is an error.
    fn evaluate(&self, line: &Line<'_>, text: &str) -> Result<String> {
        let mut parts: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        self.substitute(&mut parts, 0);
        let joined = parts.join(" ");
        let value = match joined.parse::<Expr>().and_then(|expr| expr.eval()) {
            Ok(value) => value,
            Err(err) => {
                log::debug!("{}:{}: keeping '{}' ({})", line.file, line.number, joined, err);
                return Ok(joined);
            }
        };
        if !value.is_finite() {
            return Err(line.error(format!("'{joined}' evaluates to {value}")));
        }
        Ok(value.to_string())
    }

    fn finish(self, file: &str, lines: usize) -> Result<LoadedModel> {
        let network = self
            .builder
            .build()
            .map_err(|e| parse_error(file, lines, e.to_string()))?;
        log::info!(
            "loaded {} molecules, {} reactions, {} scheduled perturbations",
            network.molecules().len(),
            network.reactions().len(),
            self.perturbations.len()
        );
        Ok(LoadedModel {
            network,
            perturbations: self.perturbations,
            run_idle: self.run_idle,
            idle_tick: self.idle_tick,
        })
    }
}

/// Splits on blanks and tabs; single or double quotes group a token.
fn tokenize(text: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    for ch in text.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                in_token = true;
            }
            None if ch == ' ' || ch == '\t' => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(ch);
                in_token = true;
            }
        }
    }
    if let Some(q) = quote {
        return Err(format!("unterminated {q} quote"));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
