//! Command Authorization
//!
//! Who may issue what, checked against the engine before anything is
//! applied. Turn-scoped commands need the turn holder, auction commands
//! a remaining bidder, trade answers the trade's target, and game control
//! the host itself.

use crate::game::engine::{Command, DomainEngine};
use crate::game::state::PlayerId;

/// Why an actor may not issue a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    /// Turn-scoped command from someone other than the turn holder.
    #[error("not your turn")]
    NotTurnHolder,

    /// Auction command with no auction running.
    #[error("no auction running")]
    NoActiveAuction,

    /// Auction command from someone who is not bidding.
    #[error("not in this auction")]
    NotAuctionParticipant,

    /// Trade answer with no trade open.
    #[error("no trade open")]
    NoOpenTrade,

    /// Trade answer from someone the trade is not addressed to.
    #[error("trade is not addressed to you")]
    NotTradeTarget,

    /// Game control from a client.
    #[error("only the host may do that")]
    HostOnly,

    /// Command from someone not seated at the table.
    #[error("unknown player")]
    UnknownPlayer,
}

impl AuthorizationError {
    /// Refers to an auction or trade that already ended; dropped without a NACK.
    pub fn is_stale(&self) -> bool {
        matches!(self, AuthorizationError::NoActiveAuction | AuthorizationError::NoOpenTrade)
    }
}

/// Check whether `actor` may issue `command` right now.
pub fn authorize<E>(engine: &E, host_id: PlayerId, actor: PlayerId, command: &Command) -> Result<(), AuthorizationError>
where
    E: DomainEngine + ?Sized,
{
    if command.is_host_only() {
        return if actor == host_id { Ok(()) } else { Err(AuthorizationError::HostOnly) };
    }
    if !engine.has_player(&actor) {
        return Err(AuthorizationError::UnknownPlayer);
    }

    match command {
        Command::RollDice
        | Command::BuyProperty { .. }
        | Command::DeclinePurchase { .. }
        | Command::TradeOffer(_)
        | Command::EndTurn => {
            if engine.turn_holder() == Some(actor) {
                Ok(())
            } else {
                Err(AuthorizationError::NotTurnHolder)
            }
        }
        Command::AuctionBid { .. } | Command::AuctionPass => match engine.auction_bidders() {
            None => Err(AuthorizationError::NoActiveAuction),
            Some(bidders) if bidders.contains(&actor) => Ok(()),
            Some(_) => Err(AuthorizationError::NotAuctionParticipant),
        },
        Command::TradeResponse { .. } => match engine.trade_target() {
            None => Err(AuthorizationError::NoOpenTrade),
            Some(target) if target == actor => Ok(()),
            Some(_) => Err(AuthorizationError::NotTradeTarget),
        },
        Command::StartGame | Command::PauseGame | Command::ResumeGame => Ok(()),
    }
}
