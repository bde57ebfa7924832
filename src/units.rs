//! Physical units
//!
//! A [`Unit`] is an exponent vector over a fixed set of base dimensions plus
//! a multiplicative scale relative to the coherent unit. Units are associated
//! with a whole buffer and checked at every operator application.

use crate::errors::{Result, RuLaVarError};
use std::fmt;

const N_BASE: usize = 9;
const BASE_NAMES: [&str; N_BASE] = ["m", "s", "kg", "K", "A", "mol", "cd", "counts", "rad"];

/// Physical unit of a buffer
#[derive(Debug, Clone, Copy)]
pub struct Unit {
    exponents: [i8; N_BASE],
    scale: f64,
    none: bool,
}

const fn base(index: usize, scale: f64) -> Unit {
    let mut exponents = [0; N_BASE];
    exponents[index] = 1;
    Unit {
        exponents,
        scale,
        none: false,
    }
}

impl Unit {
    pub const ONE: Unit = Unit {
        exponents: [0; N_BASE],
        scale: 1.0,
        none: false,
    };
    /// Data without physical meaning, e.g. flags or labels
    pub const NONE: Unit = Unit {
        exponents: [0; N_BASE],
        scale: 1.0,
        none: true,
    };
    pub const M: Unit = base(0, 1.0);
    pub const S: Unit = base(1, 1.0);
    pub const US: Unit = base(1, 1e-6);
    pub const KG: Unit = base(2, 1.0);
    pub const K: Unit = base(3, 1.0);
    pub const A: Unit = base(4, 1.0);
    pub const MOL: Unit = base(5, 1.0);
    pub const CD: Unit = base(6, 1.0);
    pub const COUNTS: Unit = base(7, 1.0);
    pub const RAD: Unit = base(8, 1.0);
    pub const DEG: Unit = base(8, 0.017_453_292_519_943_295);

    pub fn is_none(&self) -> bool {
        self.none
    }

    pub fn is_dimensionless(&self) -> bool {
        !self.none && self.exponents == [0; N_BASE] && scale_eq(self.scale, 1.0)
    }

    pub fn is_counts(&self) -> bool {
        *self == Unit::COUNTS
    }

    /// True for `rad`, `deg` or any other pure angle.
    pub fn is_angle(&self) -> bool {
        !self.none && self.exponents == Unit::RAD.exponents
    }

    /// Factor converting a value in this unit into the coherent unit
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Unit rule for operators that require equal units (add, compare).
    pub fn expect_equal(&self, other: &Unit, op: &str) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(RuLaVarError::UnitError(format!(
                "Expected {self} to be equal to {other} in '{op}'"
            )))
        }
    }

    pub fn multiply(&self, other: &Unit) -> Result<Unit> {
        self.combine(other, "multiply", self.scale * other.scale, |a, b| a.checked_add(b))
    }

    pub fn divide(&self, other: &Unit) -> Result<Unit> {
        self.combine(other, "divide", self.scale / other.scale, |a, b| a.checked_sub(b))
    }

    pub fn powi(&self, exponent: i32) -> Result<Unit> {
        if self.none {
            return Ok(*self);
        }
        let mut out = *self;
        for e in out.exponents.iter_mut() {
            *e = i32::from(*e)
                .checked_mul(exponent)
                .and_then(|v| i8::try_from(v).ok())
                .ok_or_else(|| {
                    RuLaVarError::UnitError(format!("Exponent overflow in {self}^{exponent}"))
                })?;
        }
        out.scale = self.scale.powi(exponent);
        Ok(out)
    }

    pub fn sqrt(&self) -> Result<Unit> {
        if self.none {
            return Ok(*self);
        }
        if self.exponents.iter().any(|e| e % 2 != 0) {
            return Err(RuLaVarError::UnitError(format!(
                "Unsupported unit as result of sqrt: sqrt({self})"
            )));
        }
        let mut out = *self;
        for e in out.exponents.iter_mut() {
            *e /= 2;
        }
        out.scale = self.scale.sqrt();
        Ok(out)
    }

    pub fn reciprocal(&self) -> Result<Unit> {
        if self.none {
            return Ok(*self);
        }
        Unit::ONE.divide(self)
    }

    fn combine(
        &self,
        other: &Unit,
        op: &str,
        scale: f64,
        f: impl Fn(i8, i8) -> Option<i8>,
    ) -> Result<Unit> {
        match (self.none, other.none) {
            (true, true) => return Ok(Unit::NONE),
            (false, false) => {}
            _ => {
                return Err(RuLaVarError::UnitError(format!(
                    "Cannot {op} {self} and {other}: one operand has no unit"
                )))
            }
        }
        let mut exponents = [0; N_BASE];
        for (i, e) in exponents.iter_mut().enumerate() {
            *e = f(self.exponents[i], other.exponents[i]).ok_or_else(|| {
                RuLaVarError::UnitError(format!("Exponent overflow in {op}({self}, {other})"))
            })?;
        }
        Ok(Unit {
            exponents,
            scale,
            none: false,
        })
    }
}

impl Default for Unit {
    fn default() -> Self {
        Unit::ONE
    }
}

fn scale_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * a.abs().max(b.abs())
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.none == other.none
            && self.exponents == other.exponents
            && scale_eq(self.scale, other.scale)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.none {
            return f.write_str("None");
        }
        if *self == Unit::DEG {
            return f.write_str("deg");
        }
        if self.is_dimensionless() {
            return f.write_str("dimensionless");
        }
        let term = |i: usize, e: i8| {
            if e == 1 {
                BASE_NAMES[i].to_string()
            } else {
                format!("{}^{}", BASE_NAMES[i], e)
            }
        };
        let numerator: Vec<String> = (0..N_BASE)
            .filter(|&i| self.exponents[i] > 0)
            .map(|i| term(i, self.exponents[i]))
            .collect();
        let denominator: Vec<String> = (0..N_BASE)
            .filter(|&i| self.exponents[i] < 0)
            .map(|i| term(i, -self.exponents[i]))
            .collect();
        if !scale_eq(self.scale, 1.0) {
            write!(f, "{}*", self.scale)?;
        }
        if numerator.is_empty() {
            f.write_str("1")?;
        } else {
            f.write_str(&numerator.join("*"))?;
        }
        if !denominator.is_empty() {
            write!(f, "/{}", denominator.join("/"))?;
        }
        Ok(())
    }
}
