use super::{Address, BidList, Kind, Period, Ratio};

/// Pipeline account: the capacity-selling venue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineData {
    pub balance: u64,
    pub relative_stake: Ratio,
    pub tps: u64,
}

/// One slot of a pipeline's period ring and the payout bound to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeriodEntry {
    pub period: Period,
    pub payout: Address,
}

/// Period ring account owned by a pipeline.
///
/// Entries are ordered by `period.start` and never overlap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodRing {
    pub pipeline: Address,
    pub balance: u64,
    pub periods: Vec<PeriodEntry>,
}

impl PeriodRing {
    /// Most recently appended period, if any.
    pub fn tail(&self) -> Option<&PeriodEntry> {
        self.periods.last()
    }

    /// Checks ordering and disjointness of the ring.
    pub fn validate(&self) -> Result<(), String> {
        let mut prev: Option<Period> = None;
        for entry in &self.periods {
            if entry.period.length == 0 {
                return Err(format!("period at {} has zero length", entry.period.start));
            }
            if let Some(p) = prev {
                if entry.period.start < p.finish() {
                    return Err(format!(
                        "period at {} overlaps or precedes period at {}",
                        entry.period.start, p.start
                    ));
                }
            }
            prev = Some(entry.period);
        }
        Ok(())
    }
}

/// Payout account: revenue/service instance bound to one period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayoutData {
    pub pipeline: Address,
    pub period: Period,
    pub balance: u64,
    pub validator_count: u64,
    pub staker_count: u64,
}

/// Receipt account: one validator's service record within one payout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiptData {
    pub payout: Address,
    pub validator: Address,
    pub balance: u64,
    pub tx_sent: u64,
    pub tx_approved: u64,
    pub staker_count: u64,
}

/// Staker account: stake delegation referencing one receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakerData {
    pub receipt: Address,
    pub balance: u64,
    pub stake: u64,
}

/// Validator account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorData {
    pub balance: u64,
    pub activated_stake: u64,
    pub total_stake: u64,
}

impl ValidatorData {
    pub fn stake_ratio(&self) -> Ratio {
        Ratio::new(self.activated_stake, self.total_stake)
    }
}

/// Discriminated account contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountPayload {
    Pipeline(PipelineData),
    PeriodRing(PeriodRing),
    Payout(PayoutData),
    BidList(BidList),
    Receipt(ReceiptData),
    Staker(StakerData),
    Validator(ValidatorData),
}

impl AccountPayload {
    pub fn kind(&self) -> Kind {
        match self {
            AccountPayload::Pipeline(_) => Kind::Pipeline,
            AccountPayload::PeriodRing(_) => Kind::PeriodRing,
            AccountPayload::Payout(_) => Kind::Payout,
            AccountPayload::BidList(_) => Kind::BidList,
            AccountPayload::Receipt(_) => Kind::Receipt,
            AccountPayload::Staker(_) => Kind::Staker,
            AccountPayload::Validator(_) => Kind::Validator,
        }
    }

    /// Lamport balance of the account; bid lists carry none and report `u64::MAX`.
    pub fn balance(&self) -> u64 {
        match self {
            AccountPayload::Pipeline(d) => d.balance,
            AccountPayload::PeriodRing(d) => d.balance,
            AccountPayload::Payout(d) => d.balance,
            AccountPayload::BidList(_) => u64::MAX,
            AccountPayload::Receipt(d) => d.balance,
            AccountPayload::Staker(d) => d.balance,
            AccountPayload::Validator(d) => d.balance,
        }
    }

    /// Parent objects that must exist before this payload can be applied,
    /// in resolution order.
    pub fn parents(&self) -> Vec<(Kind, Address)> {
        match self {
            AccountPayload::Pipeline(_) | AccountPayload::Validator(_) => Vec::new(),
            AccountPayload::PeriodRing(d) => vec![(Kind::Pipeline, d.pipeline)],
            AccountPayload::Payout(d) => vec![(Kind::Pipeline, d.pipeline)],
            AccountPayload::BidList(d) => vec![(Kind::Payout, d.payout)],
            AccountPayload::Receipt(d) => {
                vec![(Kind::Payout, d.payout), (Kind::Validator, d.validator)]
            }
            AccountPayload::Staker(d) => vec![(Kind::Receipt, d.receipt)],
        }
    }

    /// Structural checks a well-formed account always satisfies.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AccountPayload::PeriodRing(ring) => ring.validate(),
            AccountPayload::Payout(d) if d.period.length == 0 => {
                Err("payout period has zero length".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// One push notification from the node feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountUpdate {
    pub address: Address,
    /// `false` once the account has been closed on chain.
    pub is_open: bool,
    pub payload: AccountPayload,
}

impl AccountUpdate {
    pub fn open(address: Address, payload: AccountPayload) -> Self {
        Self {
            address,
            is_open: true,
            payload,
        }
    }

    pub fn closed(address: Address, payload: AccountPayload) -> Self {
        Self {
            address,
            is_open: false,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start: u64, length: u64) -> PeriodEntry {
        PeriodEntry {
            period: Period::new(start, length),
            payout: Address::repeat(start as u8),
        }
    }

    #[test]
    fn ring_rejects_overlap_and_zero_length() {
        let mut ring = PeriodRing {
            pipeline: Address::repeat(1),
            balance: 10,
            periods: vec![entry(100, 50), entry(150, 50)],
        };
        assert!(ring.validate().is_ok());

        ring.periods.push(entry(190, 10));
        assert!(ring.validate().is_err());

        ring.periods.pop();
        ring.periods.push(entry(300, 0));
        assert!(ring.validate().is_err());
    }

    #[test]
    fn receipt_resolves_payout_before_validator() {
        let payload = AccountPayload::Receipt(ReceiptData {
            payout: Address::repeat(2),
            validator: Address::repeat(3),
            balance: 1,
            tx_sent: 0,
            tx_approved: 0,
            staker_count: 0,
        });
        assert_eq!(
            payload.parents(),
            vec![
                (Kind::Payout, Address::repeat(2)),
                (Kind::Validator, Address::repeat(3))
            ]
        );
    }
}
