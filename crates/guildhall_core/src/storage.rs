//! Guild storage: item stacks bounded by a slot capacity, plus a money balance.

use crate::error::{GroupError, GroupResult};
use crate::types::GroupId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Shared container owned by one guild.
///
/// Invariants: `items.len() <= max_slots`, every quantity is positive and
/// `money` is never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildStorage {
    pub guild_id: GroupId,
    pub max_slots: u32,
    pub(crate) items: BTreeMap<String, u64>,
    pub(crate) money: f64,
}

/// Result of a successful upgrade purchase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpgradeReceipt {
    pub cost: f64,
    pub max_slots: u32,
    pub balance: f64,
}

impl GuildStorage {
    pub fn new(guild_id: GroupId, max_slots: u32) -> Self {
        Self {
            guild_id,
            max_slots,
            items: BTreeMap::new(),
            money: 0.0,
        }
    }

    pub fn money(&self) -> f64 {
        self.money
    }

    pub fn items(&self) -> &BTreeMap<String, u64> {
        &self.items
    }

    pub fn quantity(&self, item_type: &str) -> u64 {
        self.items.get(item_type).copied().unwrap_or(0)
    }

    pub fn used_slots(&self) -> usize {
        self.items.len()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_slots as usize
    }

    /// Adds `quantity` of `item_type`. A new type needs a free slot.
    pub fn deposit_item(&mut self, item_type: &str, quantity: u64) -> GroupResult<u64> {
        if quantity == 0 {
            return Err(GroupError::InvalidAmount("item quantity must be positive".into()));
        }
        if item_type.trim().is_empty() {
            return Err(GroupError::InvalidAmount("item type cannot be empty".into()));
        }
        if !self.items.contains_key(item_type) && self.is_full() {
            return Err(GroupError::invariant(format!(
                "storage is full ({} of {} slots used)",
                self.items.len(),
                self.max_slots
            )));
        }
        let slot = self.items.entry(item_type.to_string()).or_insert(0);
        *slot = slot
            .checked_add(quantity)
            .ok_or_else(|| GroupError::InvalidAmount("item quantity overflow".into()))?;
        Ok(*slot)
    }

    /// Removes `quantity` of `item_type`, freeing the slot when it reaches zero.
    pub fn withdraw_item(&mut self, item_type: &str, quantity: u64) -> GroupResult<u64> {
        if quantity == 0 {
            return Err(GroupError::InvalidAmount("item quantity must be positive".into()));
        }
        let held = self
            .items
            .get(item_type)
            .copied()
            .ok_or_else(|| GroupError::not_found(format!("item {}", item_type)))?;
        if held < quantity {
            return Err(GroupError::invariant(format!(
                "only {} of {} stored, {} requested",
                held, item_type, quantity
            )));
        }
        let remaining = held - quantity;
        if remaining == 0 {
            self.items.remove(item_type);
        } else {
            self.items.insert(item_type.to_string(), remaining);
        }
        Ok(remaining)
    }

    pub fn deposit_money(&mut self, amount: f64) -> GroupResult<f64> {
        validate_money(amount)?;
        self.money += amount;
        Ok(self.money)
    }

    /// Withdraws the whole `amount` or nothing.
    pub fn withdraw_money(&mut self, amount: f64) -> GroupResult<f64> {
        validate_money(amount)?;
        if amount > self.money {
            return Err(GroupError::InsufficientFunds {
                requested: amount,
                available: self.money,
            });
        }
        self.money -= amount;
        Ok(self.money)
    }

    /// Applies one interest tick. Balances at or below zero are left alone.
    ///
    /// Returns the interest credited, if any.
    pub fn accrue_interest(&mut self, rate: f64) -> GroupResult<Option<f64>> {
        if !(rate.is_finite() && rate >= 0.0) {
            return Err(GroupError::InvalidAmount(format!(
                "interest rate must be non-negative, got {}",
                rate
            )));
        }
        if self.money <= 0.0 {
            return Ok(None);
        }
        let before = self.money;
        self.money *= 1.0 + rate;
        Ok(Some(self.money - before))
    }

    /// Grows capacity by `slots` without exceeding `limit`.
    pub fn expand_capacity(&mut self, slots: u32, limit: u32) -> GroupResult<u32> {
        let target = self
            .max_slots
            .checked_add(slots)
            .filter(|target| *target <= limit)
            .ok_or_else(|| {
                GroupError::invariant(format!(
                    "capacity {} cannot grow by {} beyond the limit of {}",
                    self.max_slots, slots, limit
                ))
            })?;
        self.max_slots = target;
        Ok(target)
    }

    /// Buys a capacity upgrade in two phases.
    ///
    /// Debits `cost`, then runs `expand`. If `expand` fails the debit is
    /// refunded and the storage ends exactly as it started.
    pub fn purchase_upgrade<F>(&mut self, cost: f64, expand: F) -> GroupResult<UpgradeReceipt>
    where
        F: FnOnce(&mut GuildStorage) -> GroupResult<u32>,
    {
        if !(cost.is_finite() && cost >= 0.0) {
            return Err(GroupError::InvalidAmount(format!("invalid upgrade cost {}", cost)));
        }
        if cost > self.money {
            return Err(GroupError::InsufficientFunds {
                requested: cost,
                available: self.money,
            });
        }

        let slots_before = self.max_slots;
        self.money -= cost;

        match expand(self) {
            Ok(max_slots) => Ok(UpgradeReceipt {
                cost,
                max_slots,
                balance: self.money,
            }),
            Err(e) => {
                debug!("Refunding {} to storage of guild {}: {}", cost, self.guild_id, e);
                self.money += cost;
                self.max_slots = slots_before;
                Err(e)
            }
        }
    }
}

fn validate_money(amount: f64) -> GroupResult<()> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(GroupError::InvalidAmount(format!(
            "money amount must be positive, got {}",
            amount
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(slots: u32) -> GuildStorage {
        GuildStorage::new(GroupId::new(), slots)
    }

    #[test]
    fn test_capacity_blocks_new_types_only() {
        let mut storage = storage(10);
        for i in 0..10 {
            storage.deposit_item(&format!("item_{}", i), 1).unwrap();
        }
        assert!(matches!(
            storage.deposit_item("item_10", 1),
            Err(GroupError::InvariantViolation(_))
        ));
        assert_eq!(storage.deposit_item("item_3", 5).unwrap(), 6);
        assert_eq!(storage.used_slots(), 10);
    }

    #[test]
    fn test_withdraw_item_frees_slot() {
        let mut storage = storage(1);
        storage.deposit_item("diamond", 4).unwrap();
        assert!(storage.withdraw_item("diamond", 5).is_err());
        assert_eq!(storage.withdraw_item("diamond", 4).unwrap(), 0);
        assert_eq!(storage.used_slots(), 0);
        assert!(storage.deposit_item("emerald", 1).is_ok());
        assert!(matches!(
            storage.withdraw_item("diamond", 1),
            Err(GroupError::NotFound(_))
        ));
    }

    #[test]
    fn test_withdraw_money_is_all_or_nothing() {
        let mut storage = storage(1);
        storage.deposit_money(50.0).unwrap();
        assert!(matches!(
            storage.withdraw_money(60.0),
            Err(GroupError::InsufficientFunds { .. })
        ));
        assert_eq!(storage.money(), 50.0);
        assert_eq!(storage.withdraw_money(50.0).unwrap(), 0.0);
        assert!(storage.deposit_money(-1.0).is_err());
        assert!(storage.deposit_money(f64::NAN).is_err());
    }

    #[test]
    fn test_interest_skips_empty_balances() {
        let mut storage = storage(1);
        assert_eq!(storage.accrue_interest(0.1).unwrap(), None);
        storage.deposit_money(200.0).unwrap();
        let credited = storage.accrue_interest(0.05).unwrap().unwrap();
        assert!((credited - 10.0).abs() < 1e-9);
        assert!((storage.money() - 210.0).abs() < 1e-9);
        assert!(storage.accrue_interest(-0.1).is_err());
    }

    #[test]
    fn test_upgrade_refunds_when_expansion_fails() {
        let mut storage = storage(27);
        storage.deposit_money(10_000.0).unwrap();

        let result = storage.purchase_upgrade(10_000.0, |_| {
            Err(GroupError::invariant("simulated capacity failure"))
        });

        assert!(result.is_err());
        assert_eq!(storage.money(), 10_000.0);
        assert_eq!(storage.max_slots, 27);
    }

    #[test]
    fn test_upgrade_refunds_at_limit() {
        let mut storage = storage(108);
        storage.deposit_money(10_000.0).unwrap();
        let result = storage.purchase_upgrade(10_000.0, |s| s.expand_capacity(9, 108));
        assert!(matches!(result, Err(GroupError::InvariantViolation(_))));
        assert_eq!(storage.money(), 10_000.0);
    }

    #[test]
    fn test_upgrade_success() {
        let mut storage = storage(27);
        storage.deposit_money(15_000.0).unwrap();
        let receipt = storage
            .purchase_upgrade(10_000.0, |s| s.expand_capacity(9, 108))
            .unwrap();
        assert_eq!(receipt.max_slots, 36);
        assert_eq!(receipt.balance, 5_000.0);
        assert!(matches!(
            storage.purchase_upgrade(10_000.0, |s| s.expand_capacity(9, 108)),
            Err(GroupError::InsufficientFunds { .. })
        ));
    }
}
