use crate::combinatorics::BinomialTable;
use crate::network::ReactionNetwork;

/// Incremental propensity computation over a [`ReactionNetwork`].
///
/// Only reactions flagged dirty are recomputed; the flags are set by the
/// network's count and inhibition setters, so a reaction is revisited only
/// when one of its own reactants (or its inhibition) changed.
#[derive(Clone, Debug)]
pub struct PropensityEngine {
    binomials: BinomialTable,
}

impl PropensityEngine {
    pub fn new(network: &ReactionNetwork) -> Self {
        Self {
            binomials: BinomialTable::new(network.max_multiplicity()),
        }
    }

    pub fn binomials(&self) -> &BinomialTable {
        &self.binomials
    }

    /// Recomputes the dirty reactions and returns the total propensity a0.
    pub fn refresh(&mut self, network: &mut ReactionNetwork) -> f64 {
        let mut a0 = 0.0;
        for r in 0..network.reactions().len() {
            if network.reaction(r).dirty {
                let (h, feasible) = self.reactant_combinations(network, r);
                let reaction = &mut network.reactions_mut()[r];
                reaction.h = h;
                reaction.a = if feasible {
                    h * reaction.stochastic_rate() * (1.0 - reaction.inhibition())
                } else {
                    0.0
                };
                reaction.dirty = false;
                reaction.recalculated = true;
            } else {
                network.reactions_mut()[r].recalculated = false;
            }
            a0 += network.reaction(r).a;
        }
        a0
    }

    fn reactant_combinations(&mut self, network: &ReactionNetwork, r: usize) -> (f64, bool) {
        let mut h = 1.0;
        let mut feasible = true;
        for (&need, molecule) in network.reaction(r).left().iter().zip(network.molecules()) {
            if need == 0 {
                continue;
            }
            let count = molecule.count();
            if count >= need {
                h *= self.binomials.combinations(count as u64, need);
            } else {
                feasible = false;
            }
        }
        (h, feasible)
    }
}
