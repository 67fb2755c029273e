use std::fmt;

use serde::{Deserialize, Serialize};

/// Money in micro-units (10⁻⁶) of the settlement currency.
///
/// All escrow arithmetic is integral; amounts serialize as the raw
/// micro-unit count, never as a float.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Micro-units per whole currency unit.
    pub const SCALE: u64 = 1_000_000;

    pub fn from_micros(micros: u64) -> Self {
        Amount(micros)
    }

    /// Whole currency units, or `None` on overflow.
    pub fn from_units(units: u64) -> Option<Self> {
        units.checked_mul(Self::SCALE).map(Amount)
    }

    pub fn micros(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

/// Produce mass in grams. Listings and offers measure crops in kilograms;
/// storing grams keeps the quantity arithmetic integral.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quantity(u64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    /// Grams per kilogram.
    pub const SCALE: u64 = 1_000;

    pub fn from_grams(grams: u64) -> Self {
        Quantity(grams)
    }

    /// Whole kilograms, or `None` on overflow.
    pub fn from_kg(kg: u64) -> Option<Self> {
        kg.checked_mul(Self::SCALE).map(Quantity)
    }

    pub fn grams(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

/// Escrow due for `quantity` at `price_per_kg`: grams × micros / 1000,
/// widened through `u128`. Rounds down to the micro-unit; exact whenever
/// the price is a whole number of micro-units per gram. `None` when the
/// result does not fit an `Amount`.
pub fn escrow_for(quantity: Quantity, price_per_kg: Amount) -> Option<Amount> {
    let wide = quantity.0 as u128 * price_per_kg.0 as u128 / Quantity::SCALE as u128;
    u64::try_from(wide).ok().map(Amount)
}
