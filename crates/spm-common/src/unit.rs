//! Physical unit descriptors.
//!
//! A [`Unit`] records the dimension of a measured quantity as a map from
//! base symbols (`m`, `s`, `V`, ...) to integer powers. The engine only
//! needs equality and power arithmetic; rendering to a string is cosmetic
//! and deliberately minimal.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Dimension of a measured quantity as symbol -> power.
///
/// The empty map is dimensionless. Powers are never stored as zero;
/// cancelled dimensions are removed so equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Unit {
    powers: BTreeMap<String, i32>,
}

impl Unit {
    /// The dimensionless unit.
    pub fn none() -> Self {
        Self::default()
    }

    /// A unit of a single base symbol to the first power, e.g. `Unit::base("m")`.
    pub fn base(symbol: &str) -> Self {
        let mut powers = BTreeMap::new();
        powers.insert(symbol.to_owned(), 1);
        Self { powers }
    }

    /// Build from explicit symbol/power pairs; zero powers are dropped.
    pub fn from_powers(pairs: &[(&str, i32)]) -> Self {
        let mut powers = BTreeMap::new();
        for &(symbol, p) in pairs {
            if p != 0 {
                *powers.entry(symbol.to_owned()).or_insert(0) += p;
            }
        }
        powers.retain(|_, p| *p != 0);
        Self { powers }
    }

    /// Whether the unit is dimensionless.
    pub fn is_none(&self) -> bool {
        self.powers.is_empty()
    }

    /// Two descriptors are equal iff they denote the same physical dimension.
    pub fn equal(&self, other: &Unit) -> bool {
        self.powers == other.powers
    }

    /// Raise this unit to an integer power.
    pub fn power(&self, p: i32) -> Unit {
        if p == 0 {
            return Unit::none();
        }
        let powers = self
            .powers
            .iter()
            .map(|(s, q)| (s.clone(), q * p))
            .collect();
        Unit { powers }
    }

    /// Compute `a^pa * b^pb`, cancelling dimensions that sum to zero.
    pub fn power_multiply(a: &Unit, pa: i32, b: &Unit, pb: i32) -> Unit {
        let mut powers = BTreeMap::new();
        for (s, q) in &a.powers {
            let p = q * pa;
            if p != 0 {
                *powers.entry(s.clone()).or_insert(0) += p;
            }
        }
        for (s, q) in &b.powers {
            *powers.entry(s.clone()).or_insert(0) += q * pb;
        }
        powers.retain(|_, p| *p != 0);
        Unit { powers }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.powers.is_empty() {
            return write!(f, "1");
        }
        let mut first = true;
        for (symbol, p) in &self.powers {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            if *p == 1 {
                write!(f, "{symbol}")?;
            } else {
                write!(f, "{symbol}^{p}")?;
            }
        }
        Ok(())
    }
}
