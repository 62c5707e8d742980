//! Order intake record.
//!
//! Wire layout, one 64-bit word per field, in this order:
//!
//! | word | field         | encoding                     |
//! |------|---------------|------------------------------|
//! | 0    | symbol hash   | FNV-1a 64 of the symbol      |
//! | 1    | side          | `Side` code                  |
//! | 2    | type          | `OrderKind` code             |
//! | 3    | quantity      | f64 bit pattern              |
//! | 4    | price         | f64 bit pattern              |
//! | 5    | timestamp     | nanoseconds since epoch      |
//! | 6    | status        | `OrderStatus` code           |
//! | 7    | venue hash    | FNV-1a 64 of the venue       |
//! | 8-9  | order id      | high / low 64 bits of u128   |
//! | 10-11| client id     | high / low 64 bits of u128   |
//!
//! The slot's readiness word follows the last field.

use crate::core::{Error, Result};
use crate::record::{fnv1a64, join_u128, split_u128, Record};

pub const ORDER_RECORD_KIND: u32 = 0x4F52_4431; // 'ORD1'
pub const ORDER_RECORD_WIDTH: usize = 12;
pub const MAX_SYMBOL_LEN: usize = 32;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy = 1,
    Sell = 2,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    Market = 1,
    Limit = 2,
    Stop = 3,
    StopLimit = 4,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    New = 1,
    PartiallyFilled = 2,
    Filled = 3,
    Cancelled = 4,
    Rejected = 5,
}

impl Side {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(Side::Buy),
            2 => Some(Side::Sell),
            _ => None,
        }
    }
}

impl OrderKind {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(OrderKind::Market),
            2 => Some(OrderKind::Limit),
            3 => Some(OrderKind::Stop),
            4 => Some(OrderKind::StopLimit),
            _ => None,
        }
    }
}

impl OrderStatus {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(OrderStatus::New),
            2 => Some(OrderStatus::PartiallyFilled),
            3 => Some(OrderStatus::Filled),
            4 => Some(OrderStatus::Cancelled),
            5 => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

/// Order as handed over by intake callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    /// Zero for market orders.
    pub price: f64,
    pub timestamp_ns: u64,
    pub status: OrderStatus,
    pub venue: String,
    pub order_id: u128,
    pub client_id: u128,
}

/// Order read back out of a ring. Symbol and venue are only available as hashes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedOrder {
    pub symbol_hash: u64,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub price: f64,
    pub timestamp_ns: u64,
    pub status: OrderStatus,
    pub venue_hash: u64,
    pub order_id: u128,
    pub client_id: u128,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OrderRecord {
    pub symbol_hash: u64,
    pub side: u64,
    pub kind: u64,
    pub quantity_bits: u64,
    pub price_bits: u64,
    pub timestamp_ns: u64,
    pub status: u64,
    pub venue_hash: u64,
    pub order_id_high: u64,
    pub order_id_low: u64,
    pub client_id_high: u64,
    pub client_id_low: u64,
}

impl OrderRecord {
    /// Validates and encodes an order. Invalid orders never reach a ring.
    pub fn encode(order: &Order) -> Result<Self> {
        validate_symbol(&order.symbol)?;
        if order.venue.len() > MAX_SYMBOL_LEN || !order.venue.is_ascii() {
            return Err(Error::InvalidRecord(format!("malformed venue {:?}", order.venue)));
        }
        if !order.quantity.is_finite() || order.quantity <= 0.0 {
            return Err(Error::InvalidRecord(format!(
                "quantity must be positive, got {}",
                order.quantity
            )));
        }
        if !order.price.is_finite() || order.price < 0.0 {
            return Err(Error::InvalidRecord(format!("invalid price {}", order.price)));
        }
        if order.price == 0.0 && order.kind != OrderKind::Market {
            return Err(Error::InvalidRecord(format!(
                "{:?} order requires a price",
                order.kind
            )));
        }
        let (order_id_high, order_id_low) = split_u128(order.order_id);
        let (client_id_high, client_id_low) = split_u128(order.client_id);
        Ok(Self {
            symbol_hash: fnv1a64(&order.symbol),
            side: order.side as u64,
            kind: order.kind as u64,
            quantity_bits: order.quantity.to_bits(),
            price_bits: order.price.to_bits(),
            timestamp_ns: order.timestamp_ns,
            status: order.status as u64,
            venue_hash: fnv1a64(&order.venue),
            order_id_high,
            order_id_low,
            client_id_high,
            client_id_low,
        })
    }

    pub fn decode(&self) -> Result<DecodedOrder> {
        let side = Side::from_code(self.side)
            .ok_or_else(|| Error::InvalidRecord(format!("unknown side code {}", self.side)))?;
        let kind = OrderKind::from_code(self.kind)
            .ok_or_else(|| Error::InvalidRecord(format!("unknown order type {}", self.kind)))?;
        let status = OrderStatus::from_code(self.status)
            .ok_or_else(|| Error::InvalidRecord(format!("unknown status {}", self.status)))?;
        Ok(DecodedOrder {
            symbol_hash: self.symbol_hash,
            side,
            kind,
            quantity: self.quantity(),
            price: self.price(),
            timestamp_ns: self.timestamp_ns,
            status,
            venue_hash: self.venue_hash,
            order_id: self.order_id(),
            client_id: join_u128(self.client_id_high, self.client_id_low),
        })
    }

    pub fn quantity(&self) -> f64 {
        f64::from_bits(self.quantity_bits)
    }

    pub fn price(&self) -> f64 {
        f64::from_bits(self.price_bits)
    }

    pub fn order_id(&self) -> u128 {
        join_u128(self.order_id_high, self.order_id_low)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.symbol_hash == fnv1a64(symbol)
    }
}

impl Record for OrderRecord {
    const KIND: u32 = ORDER_RECORD_KIND;
    const WIDTH: usize = ORDER_RECORD_WIDTH;

    fn write_fields(&self, out: &mut [u64]) {
        out[0] = self.symbol_hash;
        out[1] = self.side;
        out[2] = self.kind;
        out[3] = self.quantity_bits;
        out[4] = self.price_bits;
        out[5] = self.timestamp_ns;
        out[6] = self.status;
        out[7] = self.venue_hash;
        out[8] = self.order_id_high;
        out[9] = self.order_id_low;
        out[10] = self.client_id_high;
        out[11] = self.client_id_low;
    }

    fn read_fields(fields: &[u64]) -> Self {
        Self {
            symbol_hash: fields[0],
            side: fields[1],
            kind: fields[2],
            quantity_bits: fields[3],
            price_bits: fields[4],
            timestamp_ns: fields[5],
            status: fields[6],
            venue_hash: fields[7],
            order_id_high: fields[8],
            order_id_low: fields[9],
            client_id_high: fields[10],
            client_id_low: fields[11],
        }
    }
}

fn validate_symbol(symbol: &str) -> Result<()> {
    let well_formed = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'/' | b'.' | b':'));
    if well_formed {
        Ok(())
    } else {
        Err(Error::InvalidRecord(format!("malformed symbol {symbol:?}")))
    }
}
