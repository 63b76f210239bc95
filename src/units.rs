//! Units of measure: a free abelian group over identifier atoms with
//! integer exponents, stored in canonical form.
//!
//! Canonical form is a `BTreeMap<Symbol, i32>` with zero exponents
//! dropped; two units are equal iff their canonical maps are equal, which
//! lets the type system intern them and compare by pointer (see
//! [`crate::types`]). Structurally this is the same "monomial" shape the
//! original kernel's ring-normalization tactic uses for polynomials,
//! specialized to a single exponent vector instead of a sum of them.

use crate::intern::{Interner, Symbol};
use std::collections::BTreeMap;
use std::fmt;

/// A canonical unit: `name^exp` terms, positive exponents sorted before
/// negative ones, joined by `*` and `/` when displayed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Unit {
    exponents: BTreeMap<Symbol, i32>,
}

impl Unit {
    pub fn dimensionless() -> Self {
        Unit { exponents: BTreeMap::new() }
    }

    pub fn atom(sym: Symbol) -> Self {
        let mut exponents = BTreeMap::new();
        exponents.insert(sym, 1);
        Unit { exponents }
    }

    pub fn is_dimensionless(&self) -> bool {
        self.exponents.is_empty()
    }

    pub fn exponent(&self, sym: Symbol) -> i32 {
        self.exponents.get(&sym).copied().unwrap_or(0)
    }

    /// `u * v`: add exponents, drop zeros.
    pub fn mul(&self, other: &Unit) -> Unit {
        let mut result = self.exponents.clone();
        for (&sym, &exp) in &other.exponents {
            let entry = result.entry(sym).or_insert(0);
            *entry += exp;
            if *entry == 0 {
                result.remove(&sym);
            }
        }
        Unit { exponents: result }
    }

    /// `u / v`: subtract exponents, drop zeros.
    pub fn div(&self, other: &Unit) -> Unit {
        let mut result = self.exponents.clone();
        for (&sym, &exp) in &other.exponents {
            let entry = result.entry(sym).or_insert(0);
            *entry -= exp;
            if *entry == 0 {
                result.remove(&sym);
            }
        }
        Unit { exponents: result }
    }

    pub fn pow(&self, power: i32) -> Unit {
        if power == 0 {
            return Unit::dimensionless();
        }
        let exponents = self
            .exponents
            .iter()
            .map(|(&sym, &exp)| (sym, exp * power))
            .collect();
        Unit { exponents }
    }

    pub fn inverse(&self) -> Unit {
        self.pow(-1)
    }

    /// Parses a raw unit string like `"m^2/s"` or `"kg*m/s^2"` into
    /// canonical form. The special atom `"%"` is permitted as a
    /// display-only unit (see [`Unit::is_percent`]).
    pub fn normalize(raw: &str, interner: &mut Interner) -> Unit {
        if raw.trim().is_empty() {
            return Unit::dimensionless();
        }
        let mut exponents: BTreeMap<Symbol, i32> = BTreeMap::new();
        let (numerator, denominator) = match raw.split_once('/') {
            Some((n, d)) => (n, Some(d)),
            None => (raw, None),
        };
        for term in numerator.split('*') {
            Self::apply_term(term, 1, &mut exponents, interner);
        }
        if let Some(denominator) = denominator {
            for term in denominator.split('*') {
                Self::apply_term(term, -1, &mut exponents, interner);
            }
        }
        exponents.retain(|_, exp| *exp != 0);
        Unit { exponents }
    }

    fn apply_term(term: &str, sign: i32, exponents: &mut BTreeMap<Symbol, i32>, interner: &mut Interner) {
        let term = term.trim();
        if term.is_empty() {
            return;
        }
        let (name, exp) = match term.split_once('^') {
            Some((name, exp)) => (name, exp.parse::<i32>().unwrap_or(1)),
            None => (term, 1),
        };
        let sym = interner.intern(name);
        *exponents.entry(sym).or_insert(0) += sign * exp;
    }

    /// True iff this unit is exactly the display-only `%` atom to the
    /// first power — not just any single atom with exponent 1.
    pub fn is_percent(&self, interner: &Interner) -> bool {
        match interner.lookup("%") {
            Some(percent) => self.exponents.len() == 1 && self.exponents.get(&percent) == Some(&1),
            None => false,
        }
    }

    pub fn display(&self, interner: &Interner) -> String {
        let (positives, negatives): (Vec<_>, Vec<_>) =
            self.exponents.iter().partition(|(_, &exp)| exp > 0);
        let render = |terms: &[(&Symbol, &i32)]| -> String {
            terms
                .iter()
                .map(|(sym, exp)| {
                    let name = interner.resolve(**sym);
                    if exp.abs() == 1 {
                        name.to_string()
                    } else {
                        format!("{}^{}", name, exp.abs())
                    }
                })
                .collect::<Vec<_>>()
                .join("*")
        };
        let numerator = render(&positives);
        let denominator = render(&negatives);
        match (numerator.is_empty(), denominator.is_empty()) {
            (true, true) => String::new(),
            (false, true) => numerator,
            (true, false) => format!("1/{}", denominator),
            (false, false) => format!("{}/{}", numerator, denominator),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Fallback Display without an interner: raw symbol indices.
        // Callers that need readable output use `display(&interner)`.
        write!(f, "{:?}", self.exponents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_is_commutative() {
        let mut interner = Interner::new();
        let u = Unit::normalize("m", &mut interner);
        let v = Unit::normalize("s", &mut interner);
        assert_eq!(u.mul(&v), v.mul(&u));
    }

    #[test]
    fn div_by_self_is_dimensionless() {
        let mut interner = Interner::new();
        let u = Unit::normalize("m/s", &mut interner);
        assert!(u.div(&u).is_dimensionless());
    }

    #[test]
    fn mul_by_inverse_is_dimensionless() {
        let mut interner = Interner::new();
        let u = Unit::normalize("m^2/s", &mut interner);
        assert!(u.mul(&u.inverse()).is_dimensionless());
    }

    #[test]
    fn normalize_parses_compound_units() {
        let mut interner = Interner::new();
        let u = Unit::normalize("kg*m/s^2", &mut interner);
        let m = interner.intern("m");
        let s = interner.intern("s");
        let kg = interner.intern("kg");
        assert_eq!(u.exponent(m), 1);
        assert_eq!(u.exponent(s), -2);
        assert_eq!(u.exponent(kg), 1);
    }

    #[test]
    fn display_renders_canonical_form() {
        let mut interner = Interner::new();
        let u = Unit::normalize("s^2/m", &mut interner);
        assert_eq!(u.display(&interner), "s^2/m");
    }

    #[test]
    fn equal_units_are_structurally_equal() {
        let mut interner = Interner::new();
        let a = Unit::normalize("m/s", &mut interner);
        let b = Unit::normalize("m/s", &mut interner);
        assert_eq!(a, b);
    }

    #[test]
    fn only_the_percent_atom_is_percent() {
        let mut interner = Interner::new();
        let percent = Unit::normalize("%", &mut interner);
        let metres = Unit::normalize("m", &mut interner);
        assert!(percent.is_percent(&interner));
        assert!(!metres.is_percent(&interner));
    }
}
