use crate::attack::{unblind, Attack, AttackOptions, Outcome, Partial};
use crate::error::{Error, Result};
use crate::key::KeyContext;
use crate::math::inv_egcd;
use crate::oracle::Oracle;
use crate::pool::{OraclePool, PoolOptions};
use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, instrument, warn};

/// Partial ranges at most this wide are searched value by value.
const ENUMERATION_LIMIT: u32 = 1 << 16;

/// Lattice basis reduction (LLL or stronger), supplied by the caller.
pub trait LatticeReducer {
    /// Returns a reduced basis of the lattice spanned by the rows of `basis`.
    fn reduce(&self, basis: &[Vec<BigInt>]) -> Vec<Vec<BigInt>>;
}

impl<F: Fn(&[Vec<BigInt>]) -> Vec<Vec<BigInt>>> LatticeReducer for F {
    fn reduce(&self, basis: &[Vec<BigInt>]) -> Vec<Vec<BigInt>> {
        self(basis)
    }
}

/// Hidden-number lattice for several partial results on the same ciphertext.
///
/// Attacker `i` knows `m * s0_i mod n` up to an error `e_i` around the center
/// `c_i` of its range. With `t_i = s0_i / s0_1` and `u_i = c_1 t_i - c_i` the
/// errors satisfy `e_i = t_i e_1 + u_i (mod n)`, so `(e_1, .., e_k, W)` is a
/// short vector of the lattice spanned by
///
/// ```text
/// [ 1  t_2 .. t_k  0 ]
/// [ 0  n   .. 0    0 ]
/// [ ..             ..]
/// [ 0  0   .. n    0 ]
/// [ 0  u_2 .. u_k  W ]
/// ```
///
/// with column `i` scaled by `max_w / w_i` so every error has about the same
/// size.
#[derive(Debug, Clone)]
pub struct HiddenNumberLattice {
    n: BigUint,
    basis: Vec<Vec<BigInt>>,
    centers: Vec<BigUint>,
    scales: Vec<BigInt>,
    embed: BigInt,
    inv_s0: BigUint,
}

impl HiddenNumberLattice {
    pub fn new(key: &KeyContext, partials: &[&Partial]) -> Result<Self> {
        let n = &key.n;
        let first = partials.first().ok_or(Error::SearchExhausted)?;
        let inv_s0 = inv_egcd(&first.s0, n).ok_or(Error::NotInvertible)?;

        let widths: Vec<BigUint> = partials
            .iter()
            .map(|p| p.range.len().max(BigUint::one()))
            .collect();
        let max_w = widths.iter().max().cloned().unwrap_or_else(BigUint::one);
        let scales: Vec<BigInt> = widths.iter().map(|w| BigInt::from(&max_w / w)).collect();
        let centers: Vec<BigUint> = partials
            .iter()
            .map(|p| {
                let last = p.range.last().max(p.range.start.clone());
                (&p.range.start + &last) / 2u8
            })
            .collect();
        let embed = BigInt::from((&max_w / 2u8).max(BigUint::one()));

        let k = partials.len();
        let n_int = BigInt::from(n.clone());
        let mut top = vec![BigInt::zero(); k + 1];
        let mut bottom = vec![BigInt::zero(); k + 1];
        top[0] = scales[0].clone();
        bottom[k] = embed.clone();
        for i in 1..k {
            let t = &partials[i].s0 * &inv_s0 % n;
            let u = (&centers[0] * &t % n + n - &centers[i]) % n;
            top[i] = BigInt::from(t) * &scales[i];
            bottom[i] = BigInt::from(u) * &scales[i];
        }

        let mut basis = Vec::with_capacity(k + 1);
        basis.push(top);
        for i in 1..k {
            let mut row = vec![BigInt::zero(); k + 1];
            row[i] = &n_int * &scales[i];
            basis.push(row);
        }
        basis.push(bottom);

        Ok(HiddenNumberLattice {
            n: n.clone(),
            basis,
            centers,
            scales,
            embed,
            inv_s0,
        })
    }

    pub fn basis(&self) -> &[Vec<BigInt>] {
        &self.basis
    }

    /// Plaintext candidate from a reduced row carrying `±W` in the last
    /// coordinate.
    pub fn decode(&self, row: &[BigInt]) -> Option<BigUint> {
        let last = row.last()?;
        let e1 = if *last == self.embed {
            row[0].clone()
        } else if *last == -&self.embed {
            -&row[0]
        } else {
            return None;
        };
        if !(&e1 % &self.scales[0]).is_zero() {
            return None;
        }
        let e1 = e1 / &self.scales[0];
        let n = BigInt::from(self.n.clone());
        let m0 = ((BigInt::from(self.centers[0].clone()) + e1) % &n + &n) % &n;
        let m0 = m0.to_biguint()?;
        Some(m0 * &self.inv_s0 % &self.n)
    }
}

/// Combines best-effort results from independent attacks on `ct` into the
/// plaintext. Every candidate is checked against `ct` before it is returned.
pub fn reconcile<L>(key: &KeyContext, ct: &BigUint, partials: &[Partial], reducer: &L) -> Result<BigUint>
where
    L: LatticeReducer + ?Sized,
{
    let ct = ct % &key.n;
    let verifies = |m: &BigUint| key.encrypt(m) == ct;

    for p in partials.iter().filter(|p| p.range.len() <= BigUint::from(ENUMERATION_LIMIT)) {
        let mut m0 = p.range.start.clone();
        while m0 < p.range.stop {
            let m = unblind(key, &m0, &p.s0)?;
            if verifies(&m) {
                info!(range = %p.range, "plaintext found by enumeration");
                return Ok(m);
            }
            m0 += 1u8;
        }
    }

    let usable: Vec<&Partial> = partials.iter().filter(|p| !p.range.is_empty()).collect();
    if usable.len() < 2 {
        return Err(Error::SearchExhausted);
    }
    let lattice = HiddenNumberLattice::new(key, &usable)?;
    let reduced = reducer.reduce(lattice.basis());
    debug!(dimension = lattice.basis().len(), rows = reduced.len(), "lattice reduced");
    for row in &reduced {
        if let Some(m) = lattice.decode(row) {
            if verifies(&m) {
                info!(partials = usable.len(), "plaintext found by lattice reduction");
                return Ok(m);
            }
        }
    }
    Err(Error::SearchExhausted)
}

/// Runs several independent attacks, each on its own group of oracle
/// connections, and merges what they find.
#[derive(Debug, Clone)]
pub struct Coordinator {
    key: KeyContext,
    ct: BigUint,
    options: AttackOptions,
    pool_options: PoolOptions,
}

impl Coordinator {
    pub fn new(key: KeyContext, ct: BigUint, options: AttackOptions, pool_options: PoolOptions) -> Self {
        Coordinator {
            key,
            ct,
            options,
            pool_options,
        }
    }

    /// One attacker thread per port group. Attackers always blind randomly,
    /// from `StdRng` seeded with `seed + i`, so their multipliers differ.
    /// The first attacker to recover the plaintext stops the others, and every
    /// thread is joined before returning.
    #[instrument(skip_all, fields(attackers = groups.len()))]
    pub fn run<O, L>(&self, groups: Vec<Vec<O>>, reducer: &L, seed: u64) -> Result<BigUint>
    where
        O: Oracle + Send + 'static,
        L: LatticeReducer + ?Sized,
    {
        if groups.is_empty() {
            return Err(Error::Config("no attackers configured".to_string()));
        }
        let options = AttackOptions {
            random_blinding: true,
            ..self.options
        };
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(groups.len());
        for (i, ports) in groups.into_iter().enumerate() {
            let (key, ct, pool_options) = (self.key.clone(), self.ct.clone(), self.pool_options);
            let stop = Arc::clone(&stop);
            let worker = thread::Builder::new()
                .name(format!("attacker-{}", i))
                .spawn(move || {
                    let pool = OraclePool::new(ports, pool_options)?;
                    let mut attack = Attack::new(key, ct, pool, options).with_stop(Arc::clone(&stop));
                    let outcome = attack.run(&mut StdRng::seed_from_u64(seed.wrapping_add(i as u64)));
                    if let Ok(Outcome::Recovered(_)) = outcome {
                        stop.store(true, Ordering::Relaxed);
                    }
                    outcome
                })?;
            workers.push(worker);
        }

        let mut recovered = None;
        let mut partials = vec![];
        let mut failure = None;
        for (i, worker) in workers.into_iter().enumerate() {
            let outcome = worker.join().map_err(|_| {
                Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!("attacker {} panicked", i),
                ))
            })?;
            match outcome {
                Ok(Outcome::Recovered(m)) => {
                    info!(attacker = i, "attacker recovered the plaintext");
                    recovered.get_or_insert(m);
                }
                Ok(Outcome::Partial(p)) => {
                    debug!(attacker = i, range = %p.range, "partial result");
                    partials.push(p);
                }
                Err(e) => {
                    warn!(attacker = i, error = %e, "attacker failed");
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(m) = recovered {
            return Ok(m);
        }
        match (partials.is_empty(), failure) {
            (true, Some(e)) => Err(e),
            _ => reconcile(&self.key, &self.ct, &partials, reducer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;
    use crate::key::fixtures::{ct64, key64, oracle64, M64};
    use crate::oracle::{OracleResult, PrivateKeyOracle};
    use rand::Rng;
    use std::sync::atomic::AtomicU64;
    use std::cell::Cell;

    fn no_reduction(_: &[Vec<BigInt>]) -> Vec<Vec<BigInt>> {
        panic!("lattice reduction not expected");
    }

    /// Partial result for multiplier `s0` whose range has `m * s0` at `offset`
    /// from its start.
    fn partial(key: &KeyContext, s0: u64, offset: u64, width: u64) -> Partial {
        let m0 = BigUint::from(M64) * s0 % &key.n;
        let start = m0 - offset;
        Partial {
            range: Interval::new(start.clone(), start + width),
            s0: s0.into(),
            s_last: s0.into(),
            iterations: 5,
        }
    }

    /// `(e_1, .., e_k, W)` for the known plaintext, in lattice coordinates.
    fn planted(lattice: &HiddenNumberLattice, partials: &[&Partial]) -> Vec<BigInt> {
        let mut target: Vec<BigInt> = partials
            .iter()
            .zip(&lattice.centers)
            .zip(&lattice.scales)
            .map(|((p, c), scale)| {
                let m0 = BigUint::from(M64) * &p.s0 % &lattice.n;
                (BigInt::from(m0) - BigInt::from(c.clone())) * scale
            })
            .collect();
        target.push(lattice.embed.clone());
        target
    }

    #[test]
    fn hidden_number_lattice_works() {
        let key = key64();
        let mut rng = rand::thread_rng();
        let ps: Vec<Partial> = [3u64, 5, 11, 1 << 20]
            .iter()
            .map(|s0| {
                let width = rng.gen_range(1u64 << 30..1 << 40);
                partial(&key, *s0, rng.gen_range(0..width), width)
            })
            .collect();
        let refs: Vec<&Partial> = ps.iter().collect();
        let lattice = HiddenNumberLattice::new(&key, &refs).expect("lattice");
        let basis = lattice.basis();
        assert_eq!(basis.len(), 5);
        assert!(basis.iter().all(|row| row.len() == 5));

        // target - e_1 * top - bottom must be a combination of the n rows
        let target = planted(&lattice, &refs);
        let e1 = &target[0] / &basis[0][0];
        for i in 1..4 {
            let rest = &target[i] - &e1 * &basis[0][i] - &basis[4][i];
            assert!((rest % &basis[i][i]).is_zero(), "column {}", i);
        }
        assert_eq!(lattice.decode(&target), Some(M64.into()));
        let negated: Vec<BigInt> = target.iter().map(|x| -x).collect();
        assert_eq!(lattice.decode(&negated), Some(M64.into()));
        assert_eq!(lattice.decode(&basis[0]), None);
    }

    #[test]
    fn reconcile_works() {
        let key = key64();
        let ps = vec![
            partial(&key, 7, 1 << 35, 1 << 36),
            partial(&key, 13, 12345, 1 << 33),
        ];
        let refs: Vec<&Partial> = ps.iter().collect();
        let target = planted(&HiddenNumberLattice::new(&key, &refs).expect("lattice"), &refs);
        let reducer = move |basis: &[Vec<BigInt>]| {
            let mut rows = basis.to_vec();
            rows.insert(1, target.iter().map(|x| -x).collect());
            rows
        };
        let m = reconcile(&key, &ct64(), &ps, &reducer).expect("plaintext");
        assert_eq!(m, M64.into());

        let decoy = |basis: &[Vec<BigInt>]| basis.to_vec();
        assert!(matches!(
            reconcile(&key, &ct64(), &ps, &decoy),
            Err(Error::SearchExhausted)
        ));
    }

    #[test]
    fn reconcile_enumeration_works() {
        let key = key64();
        let ps = vec![partial(&key, 9, 1 << 34, 1 << 35), partial(&key, 17, 700, 1000)];
        let m = reconcile(&key, &ct64(), &ps, &no_reduction).expect("plaintext");
        assert_eq!(m, M64.into());

        let exact = vec![partial(&key, 1, 0, 1)];
        assert_eq!(reconcile(&key, &ct64(), &exact, &no_reduction).expect("plaintext"), M64.into());

        let wide = vec![partial(&key, 1, 0, 1 << 40)];
        assert!(matches!(
            reconcile(&key, &ct64(), &wide, &no_reduction),
            Err(Error::SearchExhausted)
        ));
    }

    #[test]
    fn coordinator_works() {
        let key = key64();
        let coordinator = Coordinator::new(key, ct64(), AttackOptions::default(), PoolOptions::default());
        let groups = (0..2).map(|_| vec![oracle64(), oracle64()]).collect();
        let m = coordinator.run(groups, &no_reduction, 42).expect("plaintext");
        assert_eq!(m, M64.into());
    }

    /// Honest oracle that counts its queries.
    struct Counted {
        inner: PrivateKeyOracle,
        sent: Arc<AtomicU64>,
    }

    impl Oracle for Counted {
        fn query(&mut self, ciphertext: &BigUint) -> OracleResult {
            self.sent.fetch_add(1, Ordering::Relaxed);
            self.inner.query(ciphertext)
        }
    }

    #[test]
    fn coordinator_joins_attackers_works() {
        let coordinator = Coordinator::new(key64(), ct64(), AttackOptions::default(), PoolOptions::default());
        let sent = Arc::new(AtomicU64::new(0));
        let counted = |_| Counted {
            inner: oracle64(),
            sent: Arc::clone(&sent),
        };
        let groups = vec![(0..3).map(counted).collect(), (0..1).map(counted).collect()];
        let m = coordinator.run(groups, &no_reduction, 99).expect("plaintext");
        assert_eq!(m, M64.into());
        // every attacker has returned, so no query is still on its way
        let after = sent.load(Ordering::Relaxed);
        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(sent.load(Ordering::Relaxed), after);
    }

    #[test]
    fn coordinator_reconcile_works() {
        let key = key64();
        let options = AttackOptions {
            random_blinding: false,
            max_iterations: Some(2),
        };
        let coordinator = Coordinator::new(key.clone(), ct64(), options, PoolOptions::default());
        let groups = (0..3).map(|_| vec![oracle64()]).collect();

        let dimension = Cell::new(0);
        let reducer = |basis: &[Vec<BigInt>]| {
            dimension.set(basis.len());
            basis.to_vec()
        };
        // two iterations cannot pin down a 64-bit plaintext
        assert!(matches!(
            coordinator.run(groups, &reducer, 7),
            Err(Error::SearchExhausted)
        ));
        assert_eq!(dimension.get(), 4);
    }

    #[test]
    fn empty_coordinator_works() {
        let coordinator = Coordinator::new(key64(), ct64(), AttackOptions::default(), PoolOptions::default());
        let groups: Vec<Vec<PrivateKeyOracle>> = vec![];
        assert!(matches!(
            coordinator.run(groups, &no_reduction, 0),
            Err(Error::Config(_))
        ));
    }
}
