//! # Domain model: addresses, periods and account payloads.
//!
//! Every on-chain object is identified by a fixed-length [`Address`], treated as an
//! opaque unique key. The node feed delivers [`AccountUpdate`]s whose payload is
//! already discriminated into an [`AccountPayload`]; wire decoding is the feed's job.
//!
//! ## Parent references
//! ```text
//! Pipeline    ── (root)
//! PeriodRing  ──► Pipeline
//! Payout      ──► Pipeline
//! BidList     ──► Payout
//! Receipt     ──► Payout, Validator
//! Staker      ──► Receipt
//! Validator   ── (root)
//! ```
//! Cross references are always by address; the router resolves them.

mod account;
mod bids;

use std::fmt;
use std::str::FromStr;

pub use account::{
    AccountPayload, AccountUpdate, PayoutData, PeriodEntry, PeriodRing, PipelineData, ReceiptData,
    StakerData, ValidatorData,
};
pub use bids::{Bid, BidList};

/// Fixed-length on-chain account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 32]);

impl Address {
    /// Length of an address in bytes.
    pub const LEN: usize = 32;

    /// Wraps raw address bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Address with every byte set to `b`; handy for fixtures.
    pub const fn repeat(b: u8) -> Self {
        Self([b; 32])
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}..)", &hex::encode(&self.0[..4]))
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

/// Classification of on-chain accounts the router understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Pipeline,
    PeriodRing,
    Payout,
    BidList,
    Receipt,
    Staker,
    Validator,
}

impl Kind {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Kind::Pipeline => "pipeline",
            Kind::PeriodRing => "period_ring",
            Kind::Payout => "payout",
            Kind::BidList => "bid_list",
            Kind::Receipt => "receipt",
            Kind::Staker => "staker",
            Kind::Validator => "validator",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Slot range `[start, start + length)` owned by one pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Period {
    pub start: u64,
    pub length: u64,
}

impl Period {
    pub const fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// First slot after the period.
    pub fn finish(&self) -> u64 {
        self.start.saturating_add(self.length)
    }

    pub fn contains(&self, slot: u64) -> bool {
        self.start <= slot && slot < self.finish()
    }
}

/// Unsigned fraction used for stake accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Ratio {
    pub numerator: u64,
    pub denominator: u64,
}

impl Ratio {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Fraction as `f64`; a zero denominator reads as `0.0`.
    pub fn value(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f64 / self.denominator as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip_through_display() {
        let a = Address::repeat(0xab);
        let parsed: Address = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
        assert!("zz".parse::<Address>().is_err());
    }

    #[test]
    fn period_bounds() {
        let p = Period::new(100, 50);
        assert_eq!(p.finish(), 150);
        assert!(p.contains(100));
        assert!(p.contains(149));
        assert!(!p.contains(150));
        assert!(!p.contains(99));
    }

    #[test]
    fn ratio_zero_denominator() {
        assert_eq!(Ratio::new(5, 0).value(), 0.0);
        assert_eq!(Ratio::new(1, 4).value(), 0.25);
    }
}
