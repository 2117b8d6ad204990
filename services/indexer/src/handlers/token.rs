//! Token registry handlers

use venue_store::TransactionExt;
use venue_types::ids::TokenId;

use crate::events::TokenRegistered;
use crate::handlers::{HandlerContext, HandlerError};
use crate::records::Token;

/// Registered token, or a structural error if the registry has not seen it.
pub async fn require_token(
    ctx: &mut HandlerContext<'_>,
    id: &TokenId,
) -> Result<Token, HandlerError> {
    ctx.tx
        .fetch::<Token>(&id.to_string())
        .await?
        .ok_or_else(|| HandlerError::missing("token", id))
}

/// First registration wins; a repeated registration leaves the row alone
/// and its undo leaves it alone too.
pub async fn registered(
    ctx: &mut HandlerContext<'_>,
    event: &TokenRegistered,
) -> Result<(), HandlerError> {
    let id = TokenId::new(ctx.chain, event.token.clone()).to_string();

    if ctx.undo {
        if ctx.was_created(&id) {
            ctx.tx.remove::<Token>(&id).await?;
        }
        return Ok(());
    }

    let inserted = ctx
        .tx
        .ensure(&Token {
            id: id.clone(),
            chain: ctx.chain,
            address: event.token.clone(),
            name: event.name.clone(),
            symbol: event.symbol.clone(),
            decimals: event.decimals,
        })
        .await?;
    if inserted {
        ctx.created(id);
    }
    Ok(())
}
