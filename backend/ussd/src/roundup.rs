//! Round a donation up to the next whole unit.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundUp {
    pub rounded_to: u64,
    /// `rounded_to - amount`; zero when `amount` is already a multiple of the unit.
    pub donation: u64,
}

impl RoundUp {
    pub fn has_donation(&self) -> bool {
        self.donation > 0
    }
}

/// `rounded_to = ceil(amount / unit) * unit`.
///
/// A zero `unit` means rounding is disabled and yields no donation.
pub fn round_up(amount: u64, unit: u64) -> RoundUp {
    if unit == 0 {
        return RoundUp {
            rounded_to: amount,
            donation: 0,
        };
    }
    let rounded_to = amount.div_ceil(unit).saturating_mul(unit);
    RoundUp {
        rounded_to,
        donation: rounded_to - amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_has_no_donation() {
        let r = round_up(500, 100);
        assert_eq!(r, RoundUp { rounded_to: 500, donation: 0 });
        assert!(!r.has_donation());
    }

    #[test]
    fn rounds_to_next_unit() {
        assert_eq!(round_up(550, 100), RoundUp { rounded_to: 600, donation: 50 });
        assert_eq!(round_up(101, 100), RoundUp { rounded_to: 200, donation: 99 });
        assert_eq!(round_up(1, 100), RoundUp { rounded_to: 100, donation: 99 });
    }

    #[test]
    fn donation_stays_below_unit() {
        for unit in [1u64, 7, 50, 100, 1000] {
            for amount in 1..=3000u64 {
                let r = round_up(amount, unit);
                assert!(r.donation < unit, "amount={amount} unit={unit}");
                assert_eq!(r.rounded_to % unit, 0);
                assert_eq!(r.rounded_to, amount + r.donation);
            }
        }
    }

    #[test]
    fn zero_unit_disables_rounding() {
        assert_eq!(round_up(550, 0), RoundUp { rounded_to: 550, donation: 0 });
    }
}
