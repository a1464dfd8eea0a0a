//! Market listings and auctions. Items and bid gold sit in escrow inside
//! the manager; everything owed to players leaves through the payout queue,
//! which the tick drains. Finalization is idempotent: a sale settles
//! exactly once no matter how often the deadline sweep runs.
use std::collections::{HashMap, VecDeque};

use tmsrv_primitives::{AuctionId, CharacterId, ItemInstance, ListingId};

use crate::{
    content::{EconomyTable, TransactionKind},
    error::{WorldError, WorldResult},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuctionKind {
    /// Ascending with a minimum increment.
    Standard,
    /// No sale below the reserve price.
    Reserve,
    /// Ascending, instantly won at the buyout price.
    Buyout,
    /// Price decays from start toward the floor; first taker wins.
    Dutch,
    /// Hidden bids, resolved at the deadline, winner pays their own bid.
    Sealed,
}

impl AuctionKind {
    pub fn from_u8(raw: u8) -> WorldResult<Self> {
        match raw {
            0 => Ok(AuctionKind::Standard),
            1 => Ok(AuctionKind::Reserve),
            2 => Ok(AuctionKind::Buyout),
            3 => Ok(AuctionKind::Dutch),
            4 => Ok(AuctionKind::Sealed),
            _ => Err(WorldError::InvalidAmount),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SaleOutcome {
    Sold { winner: CharacterId, price: u32 },
    Unsold,
    Cancelled,
}

/// Why gold or an item is being handed to a character.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PayoutReason {
    BidRefund,
    SaleProceeds,
    ItemWon,
    ItemReturned,
}

/// One pending credit. The tick delivers these to online characters and
/// persists them for offline ones.
#[derive(Clone, Copy, Debug)]
pub struct Payout {
    pub character: CharacterId,
    pub gold: u32,
    pub item: Option<ItemInstance>,
    pub reason: PayoutReason,
}

#[derive(Clone, Debug)]
pub struct Listing {
    pub id: ListingId,
    pub seller: CharacterId,
    pub item: ItemInstance,
    pub price: u32,
    pub posted_at_ms: u64,
    pub expires_at_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Auction {
    pub id: AuctionId,
    pub seller: CharacterId,
    pub item: ItemInstance,
    pub kind: AuctionKind,
    pub start_price: u32,
    pub reserve_price: u32,
    pub buyout_price: u32,
    pub min_increment: u32,
    pub created_at_ms: u64,
    pub end_at_ms: u64,
    /// Anti-sniping never pushes the end past this.
    pub end_cap_ms: u64,
    /// Highest visible bid, funds escrowed. Sealed auctions keep every bid.
    pub high_bid: Option<(CharacterId, u32)>,
    pub sealed_bids: Vec<(CharacterId, u32)>,
    pub outcome: Option<SaleOutcome>,
}

impl Auction {
    /// Dutch price decays linearly from start to reserve over the runtime.
    pub fn current_price(&self, now_ms: u64) -> u32 {
        match self.kind {
            AuctionKind::Dutch => {
                let runtime = self.end_at_ms.saturating_sub(self.created_at_ms).max(1);
                let elapsed = now_ms.saturating_sub(self.created_at_ms).min(runtime);
                let span = u64::from(self.start_price.saturating_sub(self.reserve_price));
                self.start_price - (span * elapsed / runtime) as u32
            }
            _ => self
                .high_bid
                .map(|(_, amount)| amount)
                .unwrap_or(self.start_price),
        }
    }

    pub fn next_valid_bid(&self, now_ms: u64) -> u32 {
        match self.kind {
            AuctionKind::Dutch => self.current_price(now_ms),
            _ => match self.high_bid {
                Some((_, amount)) => amount + self.min_increment,
                None => self.start_price,
            },
        }
    }

    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }
}

/// Anti-sniping: a bid inside the closing window drags the deadline out,
/// never past the cap.
fn extend_on_snipe(
    auction: &mut Auction,
    now_ms: u64,
    snipe_window_ms: u64,
    snipe_extend_ms: u64,
) -> Option<u64> {
    if auction.end_at_ms.saturating_sub(now_ms) <= snipe_window_ms {
        let stretched = (now_ms + snipe_extend_ms).min(auction.end_cap_ms);
        if stretched > auction.end_at_ms {
            auction.end_at_ms = stretched;
            return Some(stretched);
        }
    }
    None
}

/// Per-uptime counters for fee income, fed to the audit log.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TaxCounters {
    pub listing_fees: u64,
    pub sale_fees: u64,
    pub auction_fees: u64,
}

#[derive(Default)]
pub struct MarketManager {
    listings: HashMap<ListingId, Listing>,
    auctions: HashMap<AuctionId, Auction>,
    payouts: VecDeque<Payout>,
    pub taxes: TaxCounters,
    next_listing: u32,
    next_auction: u32,
}

#[derive(Debug)]
pub struct BidReceipt {
    pub auction: AuctionId,
    pub amount: u32,
    /// Set when the bid ended the auction on the spot (buyout, dutch).
    pub won: bool,
    pub extended_end_ms: Option<u64>,
}

impl MarketManager {
    // --- listings ------------------------------------------------------

    /// Escrows `item` (already removed from the seller's inventory by the
    /// caller) and posts it. The listing fee must have been taken before
    /// calling; this only records it.
    pub fn post_listing(
        &mut self,
        seller: CharacterId,
        item: ItemInstance,
        price: u32,
        fee_paid: u32,
        now_ms: u64,
        duration_ms: u64,
    ) -> WorldResult<ListingId> {
        if price == 0 || item.is_empty() {
            return Err(WorldError::InvalidAmount);
        }
        self.next_listing += 1;
        let id = ListingId(self.next_listing);
        self.taxes.listing_fees += u64::from(fee_paid);
        self.listings.insert(
            id,
            Listing {
                id,
                seller,
                item,
                price,
                posted_at_ms: now_ms,
                expires_at_ms: now_ms + duration_ms,
            },
        );
        Ok(id)
    }

    pub fn listing(&self, id: ListingId) -> WorldResult<&Listing> {
        self.listings.get(&id).ok_or(WorldError::SaleClosed)
    }

    /// Instant purchase: the buyer's gold was taken by the caller; the item
    /// and the seller's proceeds (minus the market fee) leave through the
    /// payout queue.
    pub fn buy_listing(
        &mut self,
        id: ListingId,
        buyer: CharacterId,
        economy: &EconomyTable,
    ) -> WorldResult<u32> {
        let listing = self.listings.get(&id).ok_or(WorldError::SaleClosed)?;
        if listing.seller == buyer {
            return Err(WorldError::SelfBid);
        }
        let listing = self.listings.remove(&id).expect("present just above; qed");
        let fee = economy.fee(TransactionKind::MarketSale).fee_on(listing.price);
        self.taxes.sale_fees += u64::from(fee);
        self.payouts.push_back(Payout {
            character: listing.seller,
            gold: listing.price - fee,
            item: None,
            reason: PayoutReason::SaleProceeds,
        });
        self.payouts.push_back(Payout {
            character: buyer,
            gold: 0,
            item: Some(listing.item),
            reason: PayoutReason::ItemWon,
        });
        Ok(listing.price)
    }

    /// The seller takes an unsold listing down; the item comes back via the
    /// payout queue.
    pub fn cancel_listing(&mut self, id: ListingId, seller: CharacterId) -> WorldResult<()> {
        let listing = self.listings.get(&id).ok_or(WorldError::SaleClosed)?;
        if listing.seller != seller {
            return Err(WorldError::RequirementUnmet);
        }
        let listing = self.listings.remove(&id).expect("present just above; qed");
        self.payouts.push_back(Payout {
            character: listing.seller,
            gold: 0,
            item: Some(listing.item),
            reason: PayoutReason::ItemReturned,
        });
        Ok(())
    }

    /// Returns items from expired listings to their sellers.
    pub fn sweep_listings(&mut self, now_ms: u64) -> usize {
        let expired: Vec<ListingId> = self
            .listings
            .values()
            .filter(|l| l.expires_at_ms <= now_ms)
            .map(|l| l.id)
            .collect();
        for id in &expired {
            if let Some(listing) = self.listings.remove(id) {
                self.payouts.push_back(Payout {
                    character: listing.seller,
                    gold: 0,
                    item: Some(listing.item),
                    reason: PayoutReason::ItemReturned,
                });
            }
        }
        expired.len()
    }

    // --- auctions ------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_auction(
        &mut self,
        seller: CharacterId,
        item: ItemInstance,
        kind: AuctionKind,
        start_price: u32,
        reserve_price: u32,
        buyout_price: u32,
        now_ms: u64,
        duration_ms: u64,
        snipe_cap_ms: u64,
    ) -> WorldResult<AuctionId> {
        if item.is_empty() || start_price == 0 {
            return Err(WorldError::InvalidAmount);
        }
        if kind == AuctionKind::Buyout && buyout_price <= start_price {
            return Err(WorldError::InvalidAmount);
        }
        if kind == AuctionKind::Dutch && reserve_price >= start_price {
            return Err(WorldError::InvalidAmount);
        }
        self.next_auction += 1;
        let id = AuctionId(self.next_auction);
        self.auctions.insert(
            id,
            Auction {
                id,
                seller,
                item,
                kind,
                start_price,
                reserve_price,
                buyout_price,
                min_increment: (start_price / 20).max(1),
                created_at_ms: now_ms,
                end_at_ms: now_ms + duration_ms,
                end_cap_ms: now_ms + duration_ms + snipe_cap_ms,
                high_bid: None,
                sealed_bids: Vec::new(),
                outcome: None,
            },
        );
        Ok(id)
    }

    pub fn auction(&self, id: AuctionId) -> WorldResult<&Auction> {
        self.auctions.get(&id).ok_or(WorldError::SaleClosed)
    }

    /// Places a bid. The bidder's gold was escrowed by the caller for
    /// exactly `amount`; on error the caller restores it. Refunds for
    /// outbid parties leave through the payout queue.
    pub fn place_bid(
        &mut self,
        id: AuctionId,
        bidder: CharacterId,
        amount: u32,
        now_ms: u64,
        snipe_window_ms: u64,
        snipe_extend_ms: u64,
    ) -> WorldResult<BidReceipt> {
        let auction = self.auctions.get_mut(&id).ok_or(WorldError::SaleClosed)?;
        if !auction.is_open() || now_ms >= auction.end_at_ms {
            return Err(WorldError::SaleClosed);
        }
        if auction.seller == bidder {
            return Err(WorldError::SelfBid);
        }

        let mut refund = None;
        let receipt = match auction.kind {
            AuctionKind::Dutch => {
                let price = auction.current_price(now_ms);
                if amount < price {
                    return Err(WorldError::BidTooLow);
                }
                // the taker wins immediately at the posted price; any
                // overpayment is refunded
                if amount > price {
                    refund = Some(Payout {
                        character: bidder,
                        gold: amount - price,
                        item: None,
                        reason: PayoutReason::BidRefund,
                    });
                }
                auction.high_bid = Some((bidder, price));
                auction.outcome = Some(SaleOutcome::Sold {
                    winner: bidder,
                    price,
                });
                BidReceipt {
                    auction: id,
                    amount: price,
                    won: true,
                    extended_end_ms: None,
                }
            }
            AuctionKind::Sealed => {
                if amount < auction.start_price {
                    return Err(WorldError::BidTooLow);
                }
                if auction.sealed_bids.iter().any(|(who, _)| *who == bidder) {
                    return Err(WorldError::BidTooLow);
                }
                auction.sealed_bids.push((bidder, amount));
                BidReceipt {
                    auction: id,
                    amount,
                    won: false,
                    extended_end_ms: extend_on_snipe(auction, now_ms, snipe_window_ms, snipe_extend_ms),
                }
            }
            _ => {
                let minimum = auction.next_valid_bid(now_ms);
                if amount < minimum {
                    return Err(WorldError::BidTooLow);
                }
                if let Some((previous, escrowed)) = auction.high_bid.replace((bidder, amount)) {
                    refund = Some(Payout {
                        character: previous,
                        gold: escrowed,
                        item: None,
                        reason: PayoutReason::BidRefund,
                    });
                }
                if auction.kind == AuctionKind::Buyout && amount >= auction.buyout_price {
                    auction.outcome = Some(SaleOutcome::Sold {
                        winner: bidder,
                        price: amount,
                    });
                    BidReceipt {
                        auction: id,
                        amount,
                        won: true,
                        extended_end_ms: None,
                    }
                } else {
                    BidReceipt {
                        auction: id,
                        amount,
                        won: false,
                        extended_end_ms: extend_on_snipe(
                            auction,
                            now_ms,
                            snipe_window_ms,
                            snipe_extend_ms,
                        ),
                    }
                }
            }
        };
        if let Some(refund) = refund {
            self.payouts.push_back(refund);
        }
        Ok(receipt)
    }

    /// Settles one auction if due. Safe to call repeatedly; payouts are
    /// queued exactly once.
    pub fn finalize_auction(
        &mut self,
        id: AuctionId,
        now_ms: u64,
        economy: &EconomyTable,
    ) -> WorldResult<Option<SaleOutcome>> {
        let auction = self.auctions.get_mut(&id).ok_or(WorldError::SaleClosed)?;
        if auction.outcome.is_none() && now_ms < auction.end_at_ms {
            return Ok(None);
        }
        let outcome = match auction.outcome {
            // already decided by buyout/dutch; fall through to settle
            Some(outcome) => outcome,
            None => match auction.kind {
                AuctionKind::Sealed => {
                    match auction.sealed_bids.iter().max_by_key(|(_, amount)| *amount) {
                        Some((winner, amount)) => SaleOutcome::Sold {
                            winner: *winner,
                            price: *amount,
                        },
                        None => SaleOutcome::Unsold,
                    }
                }
                AuctionKind::Reserve => match auction.high_bid {
                    Some((winner, amount)) if amount >= auction.reserve_price => {
                        SaleOutcome::Sold {
                            winner,
                            price: amount,
                        }
                    }
                    _ => SaleOutcome::Unsold,
                },
                _ => match auction.high_bid {
                    Some((winner, amount)) => SaleOutcome::Sold {
                        winner,
                        price: amount,
                    },
                    None => SaleOutcome::Unsold,
                },
            },
        };
        auction.outcome = Some(outcome);
        let auction = self.auctions.remove(&id).expect("present; qed");

        match outcome {
            SaleOutcome::Sold { winner, price } => {
                let fee = economy.fee(TransactionKind::AuctionSale).fee_on(price);
                self.taxes.auction_fees += u64::from(fee);
                self.payouts.push_back(Payout {
                    character: auction.seller,
                    gold: price - fee,
                    item: None,
                    reason: PayoutReason::SaleProceeds,
                });
                self.payouts.push_back(Payout {
                    character: winner,
                    gold: 0,
                    item: Some(auction.item),
                    reason: PayoutReason::ItemWon,
                });
                // refund everyone who did not win
                for (bidder, amount) in auction.sealed_bids {
                    if bidder != winner {
                        self.payouts.push_back(Payout {
                            character: bidder,
                            gold: amount,
                            item: None,
                            reason: PayoutReason::BidRefund,
                        });
                    }
                }
                if let Some((bidder, amount)) = auction.high_bid {
                    if bidder != winner {
                        self.payouts.push_back(Payout {
                            character: bidder,
                            gold: amount,
                            item: None,
                            reason: PayoutReason::BidRefund,
                        });
                    }
                }
            }
            SaleOutcome::Unsold | SaleOutcome::Cancelled => {
                self.payouts.push_back(Payout {
                    character: auction.seller,
                    gold: 0,
                    item: Some(auction.item),
                    reason: PayoutReason::ItemReturned,
                });
                for (bidder, amount) in auction.sealed_bids {
                    self.payouts.push_back(Payout {
                        character: bidder,
                        gold: amount,
                        item: None,
                        reason: PayoutReason::BidRefund,
                    });
                }
                if let Some((bidder, amount)) = auction.high_bid {
                    self.payouts.push_back(Payout {
                        character: bidder,
                        gold: amount,
                        item: None,
                        reason: PayoutReason::BidRefund,
                    });
                }
            }
        }
        Ok(Some(outcome))
    }

    /// Auctions whose deadline has passed.
    pub fn due_auctions(&self, now_ms: u64) -> Vec<AuctionId> {
        self.auctions
            .values()
            .filter(|a| a.outcome.is_some() || a.end_at_ms <= now_ms)
            .map(|a| a.id)
            .collect()
    }

    pub fn next_payout(&mut self) -> Option<Payout> {
        self.payouts.pop_front()
    }

    pub fn payout_len(&self) -> usize {
        self.payouts.len()
    }

    pub fn requeue_payout(&mut self, payout: Payout) {
        self.payouts.push_back(payout);
    }

    /// Escrowed value for conservation checks: units and gold held by open
    /// sales and undelivered payouts.
    pub fn escrow_totals(&self) -> (u64, u64) {
        let mut units = 0u64;
        let mut gold = 0u64;
        for listing in self.listings.values() {
            units += u64::from(listing.item.value);
        }
        for auction in self.auctions.values() {
            units += u64::from(auction.item.value);
            if let Some((_, amount)) = auction.high_bid {
                gold += u64::from(amount);
            }
            for (_, amount) in &auction.sealed_bids {
                gold += u64::from(*amount);
            }
        }
        for payout in &self.payouts {
            gold += u64::from(payout.gold);
            if let Some(item) = payout.item {
                units += u64::from(item.value);
            }
        }
        (units, gold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentTables;

    fn manager() -> MarketManager {
        MarketManager::default()
    }

    fn standard_auction(m: &mut MarketManager) -> AuctionId {
        m.create_auction(
            CharacterId(1),
            ItemInstance::new(1, 100),
            AuctionKind::Standard,
            1000,
            0,
            0,
            0,
            100_000,
            120_000,
        )
        .expect("auction should open")
    }

    #[test]
    fn bid_at_exact_increment_accepted_one_below_rejected() {
        let content = ContentTables::fixture();
        let mut m = manager();
        let id = standard_auction(&mut m);
        m.place_bid(id, CharacterId(2), 1000, 10, 10_000, 30_000)
            .expect("opening bid at start price");
        let increment = m.auction(id).expect("open").min_increment;
        assert_eq!(
            m.place_bid(id, CharacterId(3), 1000 + increment - 1, 20, 10_000, 30_000)
                .unwrap_err(),
            WorldError::BidTooLow
        );
        m.place_bid(id, CharacterId(3), 1000 + increment, 30, 10_000, 30_000)
            .expect("exact increment is enough");
        // the outbid party is refunded
        let refund = m.next_payout().expect("one payout queued");
        assert_eq!(refund.character, CharacterId(2));
        assert_eq!(refund.gold, 1000);
        assert_eq!(refund.reason, PayoutReason::BidRefund);
        let _ = content;
    }

    #[test]
    fn anti_snipe_sequence_extends_to_cap() {
        let content = ContentTables::fixture();
        let mut m = manager();
        // ends at 100s; window 10s, extend 30s, cap 100s+120s
        let id = m
            .create_auction(
                CharacterId(1),
                ItemInstance::new(1, 100),
                AuctionKind::Standard,
                1000,
                0,
                0,
                0,
                100_000,
                120_000,
            )
            .expect("auction should open");
        let window = 10_000;
        let extend = 30_000;

        let receipt = m
            .place_bid(id, CharacterId(2), 1000, 95_000, window, extend)
            .expect("bid inside the window");
        assert_eq!(receipt.extended_end_ms, Some(125_000));

        let receipt = m
            .place_bid(id, CharacterId(3), 2000, 120_000, window, extend)
            .expect("bid inside the extended window");
        assert_eq!(receipt.extended_end_ms, Some(150_000));

        let receipt = m
            .place_bid(id, CharacterId(2), 3000, 145_000, window, extend)
            .expect("bid inside the second extension");
        assert_eq!(receipt.extended_end_ms, Some(175_000));
        assert!(m.auction(id).expect("open").end_at_ms <= 220_000);
        let _ = content;
    }

    #[test]
    fn finalize_is_idempotent() {
        let content = ContentTables::fixture();
        let mut m = manager();
        let id = standard_auction(&mut m);
        m.place_bid(id, CharacterId(2), 1500, 10, 10_000, 30_000)
            .expect("bid");
        let outcome = m
            .finalize_auction(id, 200_000, &content.economy)
            .expect("finalize")
            .expect("due");
        assert_eq!(
            outcome,
            SaleOutcome::Sold {
                winner: CharacterId(2),
                price: 1500,
            }
        );
        // second call finds nothing to settle
        assert_eq!(
            m.finalize_auction(id, 200_000, &content.economy),
            Err(WorldError::SaleClosed)
        );
        // exactly two payouts: proceeds and the item
        let mut reasons = Vec::new();
        while let Some(payout) = m.next_payout() {
            reasons.push(payout.reason);
        }
        assert_eq!(
            reasons,
            vec![PayoutReason::SaleProceeds, PayoutReason::ItemWon]
        );
    }

    #[test]
    fn reserve_blocks_low_sales() {
        let content = ContentTables::fixture();
        let mut m = manager();
        let id = m
            .create_auction(
                CharacterId(1),
                ItemInstance::new(1, 100),
                AuctionKind::Reserve,
                1000,
                5000,
                0,
                0,
                100_000,
                0,
            )
            .expect("auction should open");
        m.place_bid(id, CharacterId(2), 2000, 10, 10_000, 30_000)
            .expect("bid below reserve is allowed");
        let outcome = m
            .finalize_auction(id, 200_000, &content.economy)
            .expect("finalize")
            .expect("due");
        assert_eq!(outcome, SaleOutcome::Unsold);
        // item back to seller, bid refunded
        let first = m.next_payout().expect("item return");
        assert_eq!(first.reason, PayoutReason::ItemReturned);
        let second = m.next_payout().expect("refund");
        assert_eq!(second.reason, PayoutReason::BidRefund);
        assert_eq!(second.gold, 2000);
    }

    #[test]
    fn sealed_resolution_refunds_losers() {
        let content = ContentTables::fixture();
        let mut m = manager();
        let id = m
            .create_auction(
                CharacterId(1),
                ItemInstance::new(1, 100),
                AuctionKind::Sealed,
                100,
                0,
                0,
                0,
                50_000,
                0,
            )
            .expect("auction should open");
        m.place_bid(id, CharacterId(2), 500, 10, 0, 0).expect("bid");
        m.place_bid(id, CharacterId(3), 900, 20, 0, 0).expect("bid");
        m.place_bid(id, CharacterId(4), 700, 30, 0, 0).expect("bid");
        let outcome = m
            .finalize_auction(id, 60_000, &content.economy)
            .expect("finalize")
            .expect("due");
        assert_eq!(
            outcome,
            SaleOutcome::Sold {
                winner: CharacterId(3),
                price: 900,
            }
        );
        let mut refunds = 0;
        while let Some(payout) = m.next_payout() {
            if payout.reason == PayoutReason::BidRefund {
                refunds += payout.gold;
            }
        }
        assert_eq!(refunds, 500 + 700);
    }

    #[test]
    fn dutch_price_decays_and_first_taker_wins() {
        let mut m = manager();
        let id = m
            .create_auction(
                CharacterId(1),
                ItemInstance::new(1, 100),
                AuctionKind::Dutch,
                10_000,
                2_000,
                0,
                0,
                100_000,
                0,
            )
            .expect("auction should open");
        assert_eq!(m.auction(id).expect("open").current_price(0), 10_000);
        assert_eq!(m.auction(id).expect("open").current_price(50_000), 6_000);
        let receipt = m
            .place_bid(id, CharacterId(2), 6_000, 50_000, 0, 0)
            .expect("take at current price");
        assert!(receipt.won);
        assert_eq!(receipt.amount, 6_000);
    }

    #[test]
    fn buyout_ends_instantly() {
        let mut m = manager();
        let id = m
            .create_auction(
                CharacterId(1),
                ItemInstance::new(1, 100),
                AuctionKind::Buyout,
                1000,
                0,
                5000,
                0,
                100_000,
                0,
            )
            .expect("auction should open");
        let receipt = m
            .place_bid(id, CharacterId(2), 5000, 10, 10_000, 30_000)
            .expect("buyout bid");
        assert!(receipt.won);
        assert!(!m.auction(id).expect("still settling").is_open());
    }

    #[test]
    fn listing_expiry_returns_item() {
        let content = ContentTables::fixture();
        let mut m = manager();
        m.post_listing(
            CharacterId(1),
            ItemInstance::new(100, 5),
            400,
            10,
            0,
            60_000,
        )
        .expect("post");
        assert_eq!(m.sweep_listings(30_000), 0);
        assert_eq!(m.sweep_listings(60_000), 1);
        let payout = m.next_payout().expect("return queued");
        assert_eq!(payout.character, CharacterId(1));
        assert_eq!(payout.item.expect("item present").value, 5);
        let _ = content;
    }

    #[test]
    fn self_purchase_is_refused() {
        let content = ContentTables::fixture();
        let mut m = manager();
        let id = m
            .post_listing(CharacterId(1), ItemInstance::new(100, 5), 400, 10, 0, 60_000)
            .expect("post");
        assert_eq!(
            m.buy_listing(id, CharacterId(1), &content.economy),
            Err(WorldError::SelfBid)
        );
        m.buy_listing(id, CharacterId(2), &content.economy)
            .expect("another buyer is fine");
    }
}
