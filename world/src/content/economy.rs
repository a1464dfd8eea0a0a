//! Fee tables, NPC shops and NPC definitions.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tmsrv_primitives::MapId;

use crate::error::{WorldError, WorldResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    MarketListing,
    MarketSale,
    AuctionSale,
    TradeTax,
    BankFee,
}

/// Fee schedule for one transaction kind, rates in permille.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub base_rate_permille: u32,
    pub min_fee: u32,
    pub max_fee: u32,
    pub discount_permille: u32,
}

impl FeeSchedule {
    /// Fee on `amount`, clamped to the schedule's bounds.
    pub fn fee_on(&self, amount: u32) -> u32 {
        let raw = u64::from(amount) * u64::from(self.base_rate_permille) / 1000;
        let discounted = raw * u64::from(1000 - self.discount_permille.min(1000)) / 1000;
        (discounted as u32).clamp(self.min_fee, self.max_fee.max(self.min_fee))
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ShopEntry {
    pub item_id: u16,
    pub price: u32,
    /// Quantity handed over per purchase of this entry.
    pub count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShopDef {
    pub npc: u32,
    pub entries: Vec<ShopEntry>,
    /// Fraction of template price paid when players sell back, permille.
    pub sell_back_permille: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum NpcKind {
    Shopkeeper,
    QuestGiver,
    Banker,
    Generic,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NpcDef {
    pub id: u32,
    pub name: String,
    pub map: MapId,
    pub x: u16,
    pub y: u16,
    pub kind: NpcKind,
    /// Players must stand within this range to interact.
    pub interact_range: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EconomyTable {
    pub fees: HashMap<TransactionKind, FeeSchedule>,
    pub shops: HashMap<u32, ShopDef>,
    pub npcs: HashMap<u32, NpcDef>,
}

impl EconomyTable {
    pub fn fee(&self, kind: TransactionKind) -> FeeSchedule {
        self.fees.get(&kind).copied().unwrap_or(FeeSchedule {
            base_rate_permille: 0,
            min_fee: 0,
            max_fee: 0,
            discount_permille: 0,
        })
    }

    pub fn shop(&self, npc: u32) -> WorldResult<&ShopDef> {
        self.shops.get(&npc).ok_or(WorldError::InvalidTarget)
    }

    pub fn npc(&self, id: u32) -> WorldResult<&NpcDef> {
        self.npcs.get(&id).ok_or(WorldError::InvalidTarget)
    }

    pub fn validate(&self) -> WorldResult<()> {
        for (npc, shop) in &self.shops {
            if *npc != shop.npc || !self.npcs.contains_key(npc) {
                return Err(WorldError::InternalError);
            }
            if shop.entries.iter().any(|e| e.count == 0) {
                return Err(WorldError::InternalError);
            }
        }
        for (id, npc) in &self.npcs {
            if *id != npc.id {
                return Err(WorldError::InternalError);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fees_clamp_to_bounds() {
        let schedule = FeeSchedule {
            base_rate_permille: 50, // 5%
            min_fee: 10,
            max_fee: 1000,
            discount_permille: 0,
        };
        assert_eq!(schedule.fee_on(100), 10, "minimum applies");
        assert_eq!(schedule.fee_on(10_000), 500);
        assert_eq!(schedule.fee_on(1_000_000), 1000, "maximum applies");
    }

    #[test]
    fn discount_reduces_the_rate() {
        let schedule = FeeSchedule {
            base_rate_permille: 100,
            min_fee: 0,
            max_fee: u32::MAX,
            discount_permille: 500,
        };
        assert_eq!(schedule.fee_on(10_000), 500);
    }
}
