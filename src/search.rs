use crate::error::{Error, Result};
use crate::interval::{Interval, IntervalSet};
use crate::key::KeyContext;
use crate::math::{div_ceil, saturating_sub};
use crate::oracle::Oracle;
use crate::pool::OraclePool;
use num_bigint::BigUint;
use std::cmp::{max, min};
use std::iter;
use tracing::{debug, warn};

/// Which multiplier search runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Step 2a: first search after blinding.
    Start,
    /// Step 2b: several intervals left, linear scan.
    FanOut,
    /// Step 2c: one interval left, bounded `(r, s)` search.
    Converging,
}

impl Phase {
    pub fn select(iteration: usize, intervals: usize) -> Phase {
        if iteration <= 1 {
            Phase::Start
        } else if intervals > 1 {
            Phase::FanOut
        } else {
            Phase::Converging
        }
    }
}

/// `start, start + 1, ...` up to but excluding `end`.
pub fn scan_from(start: BigUint, end: &BigUint) -> impl Iterator<Item = BigUint> {
    let end = end.clone();
    iter::successors(Some(start), |s| Some(s + 1u8)).take_while(move |s| s < &end)
}

/// One full pass over the residues mod `n`, starting at `start`.
fn scan_residues(start: BigUint, n: &BigUint) -> impl Iterator<Item = BigUint> {
    let end = &start + n;
    scan_from(start, &end)
}

/// Candidates for step 2c over `[a, b]`.
///
/// The regular search takes `r` from `2 * ceil((b * s_prev - 2B) / n)` and
/// tries the single `s = ceil((2B + r n) / b)` per `r`, skipping it unless
/// `s * a < 3B + r n`. The widened search takes `r` from 0 and tries every
/// `s` with `ceil((2B + r n) / b) <= s` and `s * a < 3B + r n`.
#[derive(Debug, Clone)]
pub struct SingleIntervalCandidates {
    n: BigUint,
    two_b: BigUint,
    three_b: BigUint,
    a: BigUint,
    b: BigUint,
    r: BigUint,
    every_s: bool,
    s: BigUint,
    s_end: BigUint,
}

impl SingleIntervalCandidates {
    pub fn new(key: &KeyContext, interval: &Interval, s_prev: &BigUint) -> Self {
        let b = interval.last();
        let r = 2u8 * div_ceil(&saturating_sub(&(&b * s_prev), &key.two_b()), &key.n);
        Self::starting_at(key, interval, r, false)
    }

    pub fn widened(key: &KeyContext, interval: &Interval) -> Self {
        Self::starting_at(key, interval, BigUint::from(0u8), true)
    }

    fn starting_at(key: &KeyContext, interval: &Interval, r: BigUint, every_s: bool) -> Self {
        let a = max(interval.start.clone(), BigUint::from(1u8));
        let b = max(interval.last(), a.clone());
        let mut candidates = SingleIntervalCandidates {
            n: key.n.clone(),
            two_b: key.two_b(),
            three_b: key.three_b(),
            a,
            b,
            r,
            every_s,
            s: BigUint::from(0u8),
            s_end: BigUint::from(0u8),
        };
        candidates.reset_s();
        candidates
    }

    fn reset_s(&mut self) {
        let rn = &self.r * &self.n;
        self.s = div_ceil(&(&self.two_b + &rn), &self.b);
        let bound = &self.three_b + &rn;
        self.s_end = if self.every_s {
            div_ceil(&bound, &self.a)
        } else if &self.s * &self.a < bound {
            &self.s + 1u8
        } else {
            self.s.clone()
        };
    }

    pub fn r(&self) -> &BigUint {
        &self.r
    }
}

impl Iterator for SingleIntervalCandidates {
    type Item = BigUint;

    fn next(&mut self) -> Option<BigUint> {
        while self.s >= self.s_end {
            self.r += 1u8;
            if self.r >= self.n {
                return None;
            }
            self.reset_s();
        }
        let s = self.s.clone();
        self.s += 1u8;
        Some(s)
    }
}

/// Step 3: keep the part of every interval consistent with `s * m` being
/// conforming. Fails when nothing survives.
pub fn update_intervals(key: &KeyContext, m: &IntervalSet, s: &BigUint) -> Result<IntervalSet> {
    let n = &key.n;
    let two_b = key.two_b();
    let three_b = key.three_b();
    let three_b_1 = &three_b - 1u8;
    let mut narrowed = IntervalSet::new();
    for interval in m.iter() {
        if interval.is_empty() {
            continue;
        }
        let a = &interval.start;
        let b = interval.last();
        let bs = &b * s;
        if bs < two_b {
            continue;
        }
        let mut r = div_ceil(&saturating_sub(&(a * s + 1u8), &three_b), n);
        let r_last = (bs - &two_b) / n;
        while r <= r_last {
            let rn = &r * n;
            let lo = max(a.clone(), div_ceil(&(&two_b + &rn), s));
            let hi = min(b.clone(), (&three_b_1 + &rn) / s);
            narrowed.add(lo, hi + 1u8);
            r += 1u8;
        }
    }
    if narrowed.is_empty() {
        return Err(Error::EmptyIntervalSet);
    }
    Ok(narrowed)
}

/// Multiplier searches of steps 2a, 2b and 2c, run through an oracle pool.
pub struct SearchEngine<'a, O> {
    key: &'a KeyContext,
    pool: &'a OraclePool<O>,
}

impl<'a, O: Oracle + Send> SearchEngine<'a, O> {
    pub fn new(key: &'a KeyContext, pool: &'a OraclePool<O>) -> Self {
        SearchEngine { key, pool }
    }

    /// First candidate `s` for which `c * s^e` is conforming.
    pub fn find_conforming<I>(&self, c: &BigUint, candidates: I, concurrent: bool) -> Result<BigUint>
    where
        I: IntoIterator<Item = BigUint>,
    {
        let key = self.key;
        self.pool
            .find_first(candidates, |s| key.blind(c, s), concurrent)
    }

    pub fn search_start(&self, c: &BigUint, concurrent: bool) -> Result<BigUint> {
        let start = &self.key.n / self.key.three_b() + 1u8;
        self.find_conforming(c, scan_residues(start, &self.key.n), concurrent)
    }

    pub fn search_multiple_intervals(
        &self,
        c: &BigUint,
        s_prev: &BigUint,
        concurrent: bool,
    ) -> Result<BigUint> {
        self.find_conforming(c, scan_residues(s_prev + 1u8, &self.key.n), concurrent)
    }

    pub fn search_single_interval(
        &self,
        c: &BigUint,
        interval: &Interval,
        s_prev: &BigUint,
        concurrent: bool,
    ) -> Result<BigUint> {
        let candidates = SingleIntervalCandidates::new(self.key, interval, s_prev);
        debug!(r = %candidates.r(), "searching single interval");
        self.find_conforming(c, candidates, concurrent)
    }

    /// Runs the search selected by `(iteration, |m|)`.
    pub fn search(
        &self,
        c: &BigUint,
        m: &IntervalSet,
        s_prev: &BigUint,
        iteration: usize,
    ) -> Result<BigUint> {
        let concurrent = iteration <= self.pool.options().parallel_iterations;
        match Phase::select(iteration, m.count()) {
            Phase::Start => self.search_start(c, concurrent),
            Phase::FanOut => self.search_multiple_intervals(c, s_prev, concurrent),
            Phase::Converging => {
                let interval = m.single().ok_or(Error::EmptyIntervalSet)?;
                match self.search_single_interval(c, interval, s_prev, concurrent) {
                    Err(Error::SearchExhausted) => {
                        warn!(iteration, interval = %interval, "single interval search exhausted, widening r");
                        let candidates = SingleIntervalCandidates::widened(self.key, interval);
                        self.find_conforming(c, candidates, concurrent)
                    }
                    res => res,
                }
            }
        }
    }
}
