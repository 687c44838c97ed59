use std::collections::HashMap;
use std::fmt::Write as _;

use crate::combinatorics::{MAX_MULTIPLICITY, factorial};
use crate::{Result, SimError};

/// A count above this after a reaction fires means the network is diverging.
pub const COUNT_SANITY_LIMIT: u32 = 1_000_000;

const ARROW: &str = "--->";

#[derive(Clone, Debug)]
pub struct Molecule {
    id: String,
    description: String,
    count: u32,
    // Reactions in which this molecule is a reactant.
    downstream: Vec<usize>,
}

impl Molecule {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn downstream_reactions(&self) -> &[usize] {
        &self.downstream
    }
}

#[derive(Clone, Debug)]
pub struct Reaction {
    id: String,
    formula: String,
    description: String,
    k: f64,
    c: f64,
    inhibition: f64,
    left: Vec<u32>,
    right: Vec<u32>,
    pub(crate) h: f64,
    pub(crate) a: f64,
    pub(crate) dirty: bool,
    pub(crate) recalculated: bool,
}

impl Reaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Deterministic (concentration based) rate constant.
    pub fn rate(&self) -> f64 {
        self.k
    }

    /// Stochastic rate constant derived from `k`, the reactant
    /// multiplicities and the network volume.
    pub fn stochastic_rate(&self) -> f64 {
        self.c
    }

    pub fn inhibition(&self) -> f64 {
        self.inhibition
    }

    pub fn left(&self) -> &[u32] {
        &self.left
    }

    pub fn right(&self) -> &[u32] {
        &self.right
    }

    /// Number of distinct reactant combinations as of the last refresh.
    pub fn combinations(&self) -> f64 {
        self.h
    }

    pub fn propensity(&self) -> f64 {
        self.a
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the last propensity refresh recomputed this reaction.
    pub fn was_recalculated(&self) -> bool {
        self.recalculated
    }
}

/// Molecules and reactions of a verified network, plus the mutable counts
/// and propensity caches the simulation works on.
///
/// Every count write goes through [`ReactionNetwork::set_count`], which marks
/// the molecule's downstream reactions dirty. Writing counts any other way
/// would leave stale propensities behind.
#[derive(Clone, Debug)]
pub struct ReactionNetwork {
    volume: f64,
    molecules: Vec<Molecule>,
    reactions: Vec<Reaction>,
    max_multiplicity: u32,
}

impl ReactionNetwork {
    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn molecules(&self) -> &[Molecule] {
        &self.molecules
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub(crate) fn reactions_mut(&mut self) -> &mut [Reaction] {
        &mut self.reactions
    }

    pub fn molecule(&self, index: usize) -> &Molecule {
        &self.molecules[index]
    }

    pub fn reaction(&self, index: usize) -> &Reaction {
        &self.reactions[index]
    }

    /// Largest number of copies of a single molecule any reaction consumes.
    pub fn max_multiplicity(&self) -> u32 {
        self.max_multiplicity
    }

    pub fn molecule_index(&self, id: &str) -> Option<usize> {
        self.molecules
            .iter()
            .position(|m| m.id.eq_ignore_ascii_case(id))
    }

    pub fn reaction_index(&self, id: &str) -> Option<usize> {
        self.reactions
            .iter()
            .position(|r| r.id.eq_ignore_ascii_case(id))
    }

    pub fn count(&self, molecule: usize) -> u32 {
        self.molecules[molecule].count
    }

    pub fn counts(&self) -> Vec<u32> {
        self.molecules.iter().map(|m| m.count).collect()
    }

    pub fn copy_counts_into(&self, out: &mut [u32]) {
        for (dst, molecule) in out.iter_mut().zip(&self.molecules) {
            *dst = molecule.count;
        }
    }

    pub fn set_count(&mut self, molecule: usize, value: u32) -> Result<()> {
        let n_molecules = self.molecules.len();
        let entry = self
            .molecules
            .get_mut(molecule)
            .ok_or(SimError::MoleculeIndex {
                index: molecule,
                count: n_molecules,
            })?;
        entry.count = value;
        for &r in &entry.downstream {
            self.reactions[r].dirty = true;
        }
        Ok(())
    }

    pub fn set_inhibition(&mut self, reaction: usize, level: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&level) {
            return Err(SimError::InhibitionLevel(level));
        }
        let n_reactions = self.reactions.len();
        let entry = self
            .reactions
            .get_mut(reaction)
            .ok_or(SimError::ReactionIndex {
                index: reaction,
                count: n_reactions,
            })?;
        entry.inhibition = level;
        entry.dirty = true;
        Ok(())
    }

    /// Whether there are enough molecules for the reaction to happen.
    pub fn is_feasible(&self, reaction: usize) -> bool {
        self.reactions[reaction]
            .left
            .iter()
            .zip(&self.molecules)
            .all(|(&need, m)| m.count >= need)
    }

    /// Applies the net stoichiometry of a reaction that the caller has
    /// already established to be feasible.
    pub fn fire(&mut self, reaction: usize, time: f64) -> Result<()> {
        for m in 0..self.molecules.len() {
            let r = &self.reactions[reaction];
            let delta = r.right[m] as i64 - r.left[m] as i64;
            if delta == 0 {
                continue;
            }
            let updated = self.molecules[m].count as i64 + delta;
            debug_assert!(updated >= 0, "infeasible reaction {} fired", r.id);
            if updated > COUNT_SANITY_LIMIT as i64 {
                return Err(SimError::Runaway {
                    time,
                    reaction: r.id.clone(),
                    molecule: self.molecules[m].id.clone(),
                    count: updated,
                });
            }
            self.set_count(m, updated as u32)?;
        }
        Ok(())
    }

    pub fn molecule_table(&self) -> String {
        let mut out =
            String::from("Molecule Count Description                               Reactions\n");
        for m in &self.molecules {
            let _ = write!(
                out,
                "{:9}{:7} {:40}{:3}: ",
                m.id,
                m.count,
                m.description,
                m.downstream.len()
            );
            for &r in &m.downstream {
                let _ = write!(out, "{} ", self.reactions[r].id);
            }
            out.push('\n');
        }
        out
    }

    pub fn reaction_table(&self) -> String {
        let width = self.id_width();
        let mut out = format!(
            "{:width$.width$} Formula                      k     Description\n",
            "Reaction"
        );
        for r in &self.reactions {
            let _ = writeln!(
                out,
                "{:w$}{:25} {:8.3} {}",
                r.id,
                r.formula,
                r.k,
                r.description,
                w = width + 1
            );
        }
        out
    }

    /// Width of the longest reaction id.
    pub fn id_width(&self) -> usize {
        self.reactions.iter().map(|r| r.id.len()).max().unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
struct MoleculeSpec {
    id: String,
    count: u32,
    description: String,
}

#[derive(Clone, Debug)]
struct ReactionSpec {
    id: String,
    formula: Option<String>,
    left: Vec<u32>,
    right: Vec<u32>,
    k: f64,
    description: String,
}

/// Collects molecules and reactions and verifies them into a
/// [`ReactionNetwork`].
#[derive(Clone, Debug, Default)]
pub struct NetworkBuilder {
    volume: Option<f64>,
    allow_override: bool,
    molecules: Vec<MoleculeSpec>,
    reactions: Vec<ReactionSpec>,
    wildcard_counters: HashMap<String, u32>,
}

impl NetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume(&mut self, volume: f64) -> &mut Self {
        self.volume = Some(volume);
        self
    }

    /// When set, redefining an existing molecule or reaction id replaces
    /// the earlier definition instead of failing.
    pub fn allow_override(&mut self, allow: bool) -> &mut Self {
        self.allow_override = allow;
        self
    }

    pub fn molecule_count(&self) -> usize {
        self.molecules.len()
    }

    pub fn molecule_index(&self, id: &str) -> Option<usize> {
        self.molecules
            .iter()
            .position(|m| m.id.eq_ignore_ascii_case(id))
    }

    pub fn reaction_index(&self, id: &str) -> Option<usize> {
        self.reactions
            .iter()
            .position(|r| r.id.eq_ignore_ascii_case(id))
    }

    pub fn add_molecule(&mut self, id: &str, count: u32, description: &str) -> Result<usize> {
        let spec = MoleculeSpec {
            id: id.to_string(),
            count,
            description: description.to_string(),
        };
        match self.molecule_index(id) {
            Some(pos) if self.allow_override => {
                log::warn!("molecule {} redefined", id);
                self.molecules[pos] = spec;
                Ok(pos)
            }
            Some(_) => Err(SimError::DuplicateMolecule(id.to_string())),
            None => {
                self.molecules.push(spec);
                Ok(self.molecules.len() - 1)
            }
        }
    }

    /// Adds a reaction written as `[n] A + [n] B ---> [n] C`, where a lone
    /// `0` stands for "nothing". Molecules must already be defined. A `*` in
    /// the id is replaced with the first unused counter for that pattern.
    pub fn add_reaction(
        &mut self,
        id: &str,
        formula: &str,
        k: f64,
        description: &str,
    ) -> Result<usize> {
        let (left, right) = self.parse_formula(formula)?;
        let id = self.expand_wildcard(id);
        self.push_reaction(ReactionSpec {
            id,
            formula: Some(formula.to_string()),
            left,
            right,
            k,
            description: description.to_string(),
        })
    }

    /// Adds a reaction from stoichiometry vectors indexed like the
    /// molecules added so far.
    pub fn add_reaction_stoich(
        &mut self,
        id: &str,
        left: Vec<u32>,
        right: Vec<u32>,
        k: f64,
        description: &str,
    ) -> Result<usize> {
        let n = self.molecules.len();
        if left.len() > n || right.len() > n {
            return Err(SimError::InvalidArgument(format!(
                "reaction {} stoichiometry refers to {} molecules, only {} defined",
                id,
                left.len().max(right.len()),
                n
            )));
        }
        let id = self.expand_wildcard(id);
        self.push_reaction(ReactionSpec {
            id,
            formula: None,
            left,
            right,
            k,
            description: description.to_string(),
        })
    }

    fn push_reaction(&mut self, spec: ReactionSpec) -> Result<usize> {
        match self.reaction_index(&spec.id) {
            Some(pos) if self.allow_override => {
                log::warn!("reaction {} redefined", spec.id);
                self.reactions[pos] = spec;
                Ok(pos)
            }
            Some(_) => Err(SimError::DuplicateReaction(spec.id)),
            None => {
                self.reactions.push(spec);
                Ok(self.reactions.len() - 1)
            }
        }
    }

    pub fn expand_wildcard(&mut self, id: &str) -> String {
        let Some(pos) = id.find('*') else {
            return id.to_string();
        };
        loop {
            let counter = self.wildcard_counters.entry(id.to_string()).or_insert(0);
            let n = *counter;
            *counter += 1;
            let candidate = format!("{}{}{}", &id[..pos], n, &id[pos + 1..]);
            if self.reaction_index(&candidate).is_none() {
                return candidate;
            }
        }
    }

    fn parse_formula(&self, formula: &str) -> Result<(Vec<u32>, Vec<u32>)> {
        #[derive(PartialEq)]
        enum Expect {
            Count,
            Molecule,
            Operator,
        }

        let fail = |reason: String| SimError::Formula {
            formula: formula.to_string(),
            reason,
        };

        let n = self.molecules.len();
        let mut left = vec![0u32; n];
        let mut right = vec![0u32; n];
        let mut on_right = false;
        let mut expect = Expect::Count;
        let mut count = 0u32;

        for token in formula.split_whitespace() {
            if expect == Expect::Count {
                if token.bytes().all(|b| b.is_ascii_digit()) {
                    count = token
                        .parse()
                        .map_err(|_| fail(format!("bad count '{token}'")))?;
                    // a lone 0 means "nothing"
                    expect = if count == 0 {
                        Expect::Operator
                    } else {
                        Expect::Molecule
                    };
                    continue;
                }
                count = 1;
                expect = Expect::Molecule;
            }
            match expect {
                Expect::Molecule => {
                    let m = self
                        .molecule_index(token)
                        .ok_or_else(|| fail(format!("unknown molecule: {token}")))?;
                    let side = if on_right { &mut right } else { &mut left };
                    side[m] = count;
                    expect = Expect::Operator;
                }
                Expect::Operator => {
                    if !on_right && token == ARROW {
                        on_right = true;
                    } else if token != "+" {
                        return Err(fail(format!("expected operator, got '{token}'")));
                    }
                    expect = Expect::Count;
                }
                Expect::Count => unreachable!(),
            }
        }

        if !on_right || expect != Expect::Operator {
            return Err(fail("incomplete reaction formula".to_string()));
        }
        Ok((left, right))
    }

    /// Verifies the collected definitions and derives the stochastic rate
    /// constants and the molecule to reaction dependency lists.
    pub fn build(self) -> Result<ReactionNetwork> {
        if self.molecules.is_empty() {
            return Err(SimError::NoMolecules);
        }
        if self.reactions.is_empty() {
            return Err(SimError::NoReactions);
        }
        let volume = match self.volume {
            Some(v) if v.is_finite() && v > 0.0 => v,
            Some(v) => {
                return Err(SimError::InvalidArgument(format!(
                    "volume must be positive, got {v}"
                )));
            }
            None => return Err(SimError::MissingVolume),
        };

        let n_molecules = self.molecules.len();
        let mut max_multiplicity = 0;
        let mut reactions = Vec::with_capacity(self.reactions.len());
        for spec in self.reactions {
            let mut left = spec.left;
            let mut right = spec.right;
            left.resize(n_molecules, 0);
            right.resize(n_molecules, 0);

            let multiplicity = left.iter().copied().max().unwrap_or(0);
            if multiplicity > MAX_MULTIPLICITY {
                return Err(SimError::Multiplicity {
                    reaction: spec.id,
                    multiplicity,
                    limit: MAX_MULTIPLICITY,
                });
            }
            max_multiplicity = max_multiplicity.max(multiplicity);

            // c = k * prod(m_j!) / v^(n - 1): each reactant concentration
            // contributes a 1/v, k is per unit volume, and the factorials
            // undo the symmetry of drawing identical reactants.
            let n: u32 = left.iter().sum();
            let p: f64 = left.iter().map(|&m| factorial(m) as f64).product();
            let c = p * spec.k / volume.powi(n as i32 - 1);

            let formula = match spec.formula {
                Some(f) => f,
                None => render_formula(&self.molecules, &left, &right),
            };
            reactions.push(Reaction {
                id: spec.id,
                formula,
                description: spec.description,
                k: spec.k,
                c,
                inhibition: 0.0,
                left,
                right,
                h: 0.0,
                a: 0.0,
                dirty: true,
                recalculated: false,
            });
        }

        let mut molecules: Vec<Molecule> = self
            .molecules
            .into_iter()
            .map(|spec| Molecule {
                id: spec.id,
                description: spec.description,
                count: spec.count,
                downstream: Vec::new(),
            })
            .collect();
        for (r, reaction) in reactions.iter().enumerate() {
            for (m, &need) in reaction.left.iter().enumerate() {
                if need != 0 {
                    molecules[m].downstream.push(r);
                }
            }
        }

        Ok(ReactionNetwork {
            volume,
            molecules,
            reactions,
            max_multiplicity,
        })
    }
}

fn render_formula(molecules: &[MoleculeSpec], left: &[u32], right: &[u32]) -> String {
    let side = |stoich: &[u32]| {
        let terms: Vec<String> = stoich
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n != 0)
            .map(|(m, &n)| {
                if n > 1 {
                    format!("{} {}", n, molecules[m].id)
                } else {
                    molecules[m].id.clone()
                }
            })
            .collect();
        if terms.is_empty() {
            "0".to_string()
        } else {
            terms.join(" + ")
        }
    };
    format!("{} {} {}", side(left), ARROW, side(right))
}
