//! Board Layout
//!
//! Fixed ring of 40 tiles. Only what the reference engine needs to
//! exercise purchases, rent, and taxes.

/// Index of a tile on the board (0 = GO).
pub type TileIndex = u8;

/// Number of tiles on the ring.
pub const BOARD_SIZE: u8 = 40;

/// What a tile does when landed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileKind {
    /// Start tile; passing it pays salary.
    Go,
    /// Purchasable; owner collects rent.
    Property {
        /// Purchase price
        price: i64,
    },
    /// Flat payment to the bank.
    Tax {
        /// Amount due
        amount: i64,
    },
    /// Nothing happens.
    Corner,
    /// Card tiles; card effects are not modelled.
    Card,
}

/// A tile on the board.
#[derive(Clone, Copy, Debug)]
pub struct Tile {
    /// Printed name
    pub name: &'static str,
    /// Behaviour
    pub kind: TileKind,
}

impl Tile {
    /// Purchase price if the tile can be bought.
    pub fn price(&self) -> Option<i64> {
        match self.kind {
            TileKind::Property { price } => Some(price),
            _ => None,
        }
    }

    /// Rent owed by a visitor: a tenth of the price.
    pub fn rent(&self) -> i64 {
        self.price().map(|p| p / 10).unwrap_or(0)
    }
}

const fn prop(name: &'static str, price: i64) -> Tile {
    Tile { name, kind: TileKind::Property { price } }
}

const fn plain(name: &'static str, kind: TileKind) -> Tile {
    Tile { name, kind }
}

/// The board, indexed by `TileIndex`.
pub const BOARD: [Tile; BOARD_SIZE as usize] = [
    plain("Go", TileKind::Go),
    prop("Mill Lane", 60),
    plain("Community Box", TileKind::Card),
    prop("Tanner Row", 60),
    plain("Income Tax", TileKind::Tax { amount: 200 }),
    prop("North Station", 200),
    prop("Cooper Street", 100),
    plain("Chance", TileKind::Card),
    prop("Weaver Street", 100),
    prop("Chandler Yard", 120),
    plain("Visiting", TileKind::Corner),
    prop("Abbey Close", 140),
    prop("Waterworks", 150),
    prop("Bishop Walk", 140),
    prop("Dean Court", 160),
    prop("East Station", 200),
    prop("Harbour Road", 180),
    plain("Community Box", TileKind::Card),
    prop("Quay Side", 180),
    prop("Dock Street", 200),
    plain("Free Parking", TileKind::Corner),
    prop("Market Square", 220),
    plain("Chance", TileKind::Card),
    prop("Corn Exchange", 220),
    prop("Guildhall", 240),
    prop("South Station", 200),
    prop("Castle Hill", 260),
    prop("Keep Walk", 260),
    prop("Gasworks", 150),
    prop("Barbican", 280),
    plain("Go To Jail", TileKind::Corner),
    prop("Regent Row", 300),
    prop("Crescent", 300),
    plain("Community Box", TileKind::Card),
    prop("Royal Parade", 320),
    prop("West Station", 200),
    plain("Chance", TileKind::Card),
    prop("Palace Gate", 350),
    plain("Luxury Tax", TileKind::Tax { amount: 100 }),
    prop("Crown Terrace", 400),
];

/// Look up a tile; indices wrap around the ring.
pub fn tile(index: TileIndex) -> &'static Tile {
    &BOARD[(index % BOARD_SIZE) as usize]
}
