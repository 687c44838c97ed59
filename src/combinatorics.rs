/// Reactant multiplicities above this are rejected when a network is built:
/// `k!` for the stochastic rate constant must stay exact in a `u64`.
pub const MAX_MULTIPLICITY: u32 = 20;

/// Binomial coefficients C(n, k) for 2 <= k <= max_k, filled lazily.
///
/// The table only ever grows. When a lookup asks for an `n` beyond the
/// current bound, the table is rebuilt to cover `10 * n` so that a
/// population drifting upwards triggers only a handful of rebuilds.
#[derive(Clone, Debug, Default)]
pub struct BinomialTable {
    max_k: u32,
    max_n: u64,
    // columns[k - 2][n] == C(n, k)
    columns: Vec<Vec<f64>>,
}

impl BinomialTable {
    pub fn new(max_k: u32) -> Self {
        Self {
            max_k,
            max_n: 0,
            columns: Vec::new(),
        }
    }

    pub fn max_k(&self) -> u32 {
        self.max_k
    }

    /// Largest `n` the table currently covers.
    pub fn bound(&self) -> u64 {
        self.max_n
    }

    pub fn combinations(&mut self, n: u64, k: u32) -> f64 {
        match k {
            0 => 1.0,
            1 => n as f64,
            _ if n < k as u64 => 0.0,
            _ => {
                if k > self.max_k {
                    return falling_factorial(n, k) / factorial(k) as f64;
                }
                if n > self.max_n {
                    self.grow(10 * n);
                }
                self.columns[(k - 2) as usize][n as usize]
            }
        }
    }

    fn grow(&mut self, max_n: u64) {
        log::debug!(
            "growing binomial table from n <= {} to n <= {} (k <= {})",
            self.max_n,
            max_n,
            self.max_k
        );
        let len = max_n as usize + 1;
        let mut columns: Vec<Vec<f64>> =
            Vec::with_capacity(self.max_k.saturating_sub(1) as usize);
        for k in 2..=self.max_k as usize {
            let mut column = vec![0.0; len];
            // C(n, k) = C(n - 1, k) + C(n - 1, k - 1)
            for n in k..len {
                let below = match columns.last() {
                    Some(previous) => previous[n - 1],
                    None => (n - 1) as f64,
                };
                column[n] = column[n - 1] + below;
            }
            columns.push(column);
        }
        self.columns = columns;
        self.max_n = max_n;
    }
}

pub fn factorial(n: u32) -> u64 {
    (1..=n as u64).product()
}

#[inline]
fn falling_factorial(value: u64, count: u32) -> f64 {
    let mut acc = 1.0;
    for i in 0..count as u64 {
        acc *= (value - i) as f64;
    }
    acc
}
