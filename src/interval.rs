use crate::error::{Error, Result};
use num_bigint::BigUint;
use num_traits::Zero;
use std::fmt;
use std::str::FromStr;

/// Half-open range `[start, stop)` of candidate plaintexts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub start: BigUint,
    pub stop: BigUint,
}

impl Interval {
    pub fn new(start: BigUint, stop: BigUint) -> Self {
        Interval { start, stop }
    }

    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    pub fn len(&self) -> BigUint {
        if self.is_empty() {
            BigUint::zero()
        } else {
            &self.stop - &self.start
        }
    }

    /// Inclusive upper bound. Only meaningful for a non-empty interval.
    pub fn last(&self) -> BigUint {
        &self.stop - 1u8
    }

    pub fn contains(&self, x: &BigUint) -> bool {
        &self.start <= x && x < &self.stop
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.start, self.stop)
    }
}

/// Disjoint union of intervals, kept sorted with no two ranges overlapping or
/// sharing an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<Interval>,
}

impl IntervalSet {
    pub fn new() -> Self {
        IntervalSet { ranges: vec![] }
    }

    /// Inserts `[start, stop)`, absorbing every range it overlaps or touches.
    pub fn add(&mut self, start: BigUint, stop: BigUint) {
        if stop <= start {
            return;
        }
        let lo = self.ranges.partition_point(|r| r.stop < start);
        let hi = self.ranges.partition_point(|r| r.start <= stop);
        let mut merged = Interval::new(start, stop);
        if lo < hi {
            if self.ranges[lo].start < merged.start {
                merged.start = self.ranges[lo].start.clone();
            }
            if self.ranges[hi - 1].stop > merged.stop {
                merged.stop = self.ranges[hi - 1].stop.clone();
            }
        }
        self.ranges.drain(lo..hi);
        self.ranges.insert(lo, merged);
    }

    pub fn add_interval(&mut self, interval: Interval) {
        self.add(interval.start, interval.stop)
    }

    /// Number of candidate values over all ranges.
    pub fn size(&self) -> BigUint {
        self.ranges.iter().map(Interval::len).sum()
    }

    /// Number of disjoint ranges.
    pub fn count(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.ranges.iter()
    }

    /// The sole range, if exactly one is left.
    pub fn single(&self) -> Option<&Interval> {
        match self.ranges.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// One range spanning every range in the set.
    pub fn smallest_inclusive(&self) -> Option<Interval> {
        let first = self.ranges.first()?;
        let last = self.ranges.last()?;
        Some(Interval::new(first.start.clone(), last.stop.clone()))
    }

    pub fn contains(&self, x: &BigUint) -> bool {
        let i = self.ranges.partition_point(|r| &r.stop <= x);
        self.ranges.get(i).map_or(false, |r| r.contains(x))
    }
}

impl FromIterator<Interval> for IntervalSet {
    fn from_iter<T: IntoIterator<Item = Interval>>(iter: T) -> Self {
        let mut set = IntervalSet::new();
        for interval in iter {
            set.add_interval(interval);
        }
        set
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

fn parse_bound(s: &str) -> Result<BigUint> {
    s.trim()
        .parse::<BigUint>()
        .map_err(|e| Error::Format(format!("bad interval bound {:?}: {}", s, e)))
}

impl FromStr for IntervalSet {
    type Err = Error;

    /// Parses the `(start,stop),(start,stop)` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self> {
        let mut set = IntervalSet::new();
        let mut rest = s.trim();
        while !rest.is_empty() {
            let body = rest
                .strip_prefix('(')
                .ok_or_else(|| Error::Format(format!("expected '(' at {:?}", rest)))?;
            let close = body
                .find(')')
                .ok_or_else(|| Error::Format("unterminated interval".to_string()))?;
            let (start, stop) = body[..close]
                .split_once(',')
                .ok_or_else(|| Error::Format(format!("expected 'start,stop' in {:?}", body)))?;
            let (start, stop) = (parse_bound(start)?, parse_bound(stop)?);
            if stop <= start {
                return Err(Error::Format(format!("empty interval ({},{})", start, stop)));
            }
            set.add(start, stop);

            rest = body[close + 1..].trim_start();
            if let Some(next) = rest.strip_prefix(',') {
                rest = next.trim_start();
                if rest.is_empty() {
                    return Err(Error::Format("trailing ','".to_string()));
                }
            } else if !rest.is_empty() {
                return Err(Error::Format(format!("expected ',' at {:?}", rest)));
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn set_of(v: &[(u32, u32)]) -> IntervalSet {
        v.iter()
            .map(|&(a, b)| Interval::new(a.into(), b.into()))
            .collect()
    }

    fn bounds(set: &IntervalSet) -> Vec<(BigUint, BigUint)> {
        set.iter().map(|r| (r.start.clone(), r.stop.clone())).collect()
    }

    #[test]
    fn add_merge_works() {
        let set = set_of(&[(19, 20), (1, 5), (17, 18), (2, 3), (3, 17), (0, 1)]);
        assert_eq!(set, set_of(&[(0, 18), (19, 20)]));
        assert_eq!(set.count(), 2);
        assert_eq!(set.size(), 19u8.into());
    }

    #[test]
    fn add_spanning_range_works() {
        let mut set = set_of(&[(10, 12), (14, 16), (20, 30), (40, 41)]);
        set.add(11u8.into(), 25u8.into());
        assert_eq!(set, set_of(&[(10, 30), (40, 41)]));
        set.add(0u8.into(), 100u8.into());
        assert_eq!(set, set_of(&[(0, 100)]));
    }

    #[test]
    fn add_empty_range_works() {
        let mut set = IntervalSet::new();
        set.add(5u8.into(), 5u8.into());
        set.add(7u8.into(), 3u8.into());
        assert!(set.is_empty());
        assert_eq!(set.size(), 0u8.into());
        assert_eq!(set.smallest_inclusive(), None);
    }

    #[test]
    fn random_inserts_works() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let mut set = IntervalSet::new();
            let mut covered = [false; 128];
            for _ in 0..rng.gen_range(1..12) {
                let a: u32 = rng.gen_range(0..120);
                let b: u32 = a + rng.gen_range(0..8);
                set.add(a.into(), b.into());
                for x in a..b {
                    covered[x as usize] = true;
                }
            }
            let rs = bounds(&set);
            for w in rs.windows(2) {
                assert!(w[0].0 < w[0].1);
                assert!(w[0].1 < w[1].0, "ranges overlap or touch: {:?}", rs);
            }
            for x in 0..128u32 {
                let holders = set.iter().filter(|r| r.contains(&x.into())).count();
                assert_eq!(holders, covered[x as usize] as usize);
                assert_eq!(set.contains(&x.into()), covered[x as usize]);
            }
        }
    }

    #[test]
    fn smallest_inclusive_works() {
        let set = set_of(&[(4, 6), (10, 11), (20, 25)]);
        assert_eq!(
            set.smallest_inclusive(),
            Some(Interval::new(4u8.into(), 25u8.into()))
        );
        assert_eq!(set.single(), None);
        let set = set_of(&[(4, 6)]);
        assert_eq!(set.single(), Some(&Interval::new(4u8.into(), 6u8.into())));
    }

    #[test]
    fn text_form_works() {
        let set = set_of(&[(4, 6), (10, 11), (20, 25)]);
        let text = set.to_string();
        assert_eq!(text, "(4,6),(10,11),(20,25)");
        assert_eq!(text.parse::<IntervalSet>().expect("canonical form"), set);
        assert_eq!(" (4, 6) , (10,11),(20,25) ".parse::<IntervalSet>().ok(), Some(set));

        let big: BigUint = BigUint::from(1u8) << 1000u32;
        let mut set = IntervalSet::new();
        set.add(big.clone(), &big + 3u8);
        set.add(2u8 * &big, 3u8 * &big);
        let parsed: IntervalSet = set.to_string().parse().expect("canonical form");
        assert_eq!(parsed, set);

        assert_eq!("".parse::<IntervalSet>().ok(), Some(IntervalSet::new()));
    }

    #[test]
    fn malformed_text_works() {
        for bad in ["(1,2", "1,2)", "(1;2)", "(a,2)", "(1,2),", "(1,2)(3,4)", "(5,5)", "(-1,2)"] {
            assert!(
                matches!(bad.parse::<IntervalSet>(), Err(Error::Format(_))),
                "accepted {:?}",
                bad
            );
        }
    }
}
