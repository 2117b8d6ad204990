//! Offer book handlers: write, retract, and order settlement
//!
//! `write_offer` and `retract_offer` are shared with the market-making
//! strategy handlers, which tag the versions they write with their
//! strategy event id.

use tracing::debug;
use venue_store::{Construct, TransactionExt};
use venue_types::ids::{Address, OfferId, OfferListId, OrderId, TakenOfferId};
use venue_types::numeric::RawAmount;

use crate::entities::{
    Offer, OfferFields, OfferKeys, OfferList, OfferQuote, StrategyOrder, StrategyOrderFields,
};
use crate::events::{OfferRetracted, OfferWritten, OrderCompleted, TakenOfferFill};
use crate::handlers::token::require_token;
use crate::handlers::{HandlerContext, HandlerError};
use crate::records::{Order, RestingOrderLink, TakenOffer};

// ── Shared offer operations ─────────────────────────────────────────

/// One offer write as seen on the book.
pub struct OfferWrite<'p> {
    pub offer_list: &'p OfferListId,
    pub offer_number: u32,
    pub maker: &'p Address,
    pub wants: RawAmount,
    pub gives: RawAmount,
    pub gasprice: u64,
    pub gasreq: u64,
    pub strategy_event_id: Option<String>,
}

/// Append a write version to the offer, creating it on first write.
///
/// The offer list must exist; quantities are normalized with each side's
/// token decimals.
pub async fn write_offer(
    ctx: &mut HandlerContext<'_>,
    write: OfferWrite<'_>,
) -> Result<OfferId, HandlerError> {
    ctx.require::<OfferList>(write.offer_list, "offer list").await?;
    let outbound = require_token(ctx, &write.offer_list.outbound_token()).await?;
    let inbound = require_token(ctx, &write.offer_list.inbound_token()).await?;

    let quote = OfferQuote::new(write.wants, write.gives, inbound.decimals, outbound.decimals);
    let id = OfferId::new(write.offer_list.clone(), write.offer_number);
    let keys = OfferKeys {
        offer_list: write.offer_list.to_string(),
        offer_number: write.offer_number,
        maker: write.maker.clone(),
    };
    let (gasprice, gasreq, tag) = (write.gasprice, write.gasreq, write.strategy_event_id);
    ctx.append::<Offer, _>(
        &id,
        move |fields| fields.written(&quote, gasprice, gasreq, tag),
        Some(Construct::new(keys, OfferFields::default())),
    )
    .await?;
    Ok(id)
}

/// Mark the offer deleted and cancel the resting order it belongs to, if any.
///
/// Returns the cancelled resting order.
pub async fn retract_offer(
    ctx: &mut HandlerContext<'_>,
    id: &OfferId,
    strategy_event_id: Option<String>,
) -> Result<Option<String>, HandlerError> {
    ctx.require::<Offer>(id, "offer").await?;
    ctx.append::<Offer, _>(id, move |fields| fields.retracted(strategy_event_id), None)
        .await?;

    let Some(order) = linked_order(ctx, id).await? else {
        return Ok(None);
    };
    ctx.require::<StrategyOrder>(&order, "resting order").await?;
    ctx.append::<StrategyOrder, _>(
        &order,
        |fields| StrategyOrderFields {
            cancelled: true,
            ..fields
        },
        None,
    )
    .await?;
    debug!(offer = %id, order = %order, "Cancelled resting order");
    Ok(Some(order))
}

/// Roll back every resting-order version the forward pass appended.
pub async fn undo_cascaded_orders(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    for order in ctx.logged_ids::<StrategyOrder>() {
        ctx.undo_latest::<StrategyOrder>(&order).await?;
    }
    Ok(())
}

/// Resting order currently owning `offer`.
pub async fn linked_order(
    ctx: &mut HandlerContext<'_>,
    offer: &OfferId,
) -> Result<Option<String>, HandlerError> {
    Ok(ctx
        .tx
        .fetch::<RestingOrderLink>(&offer.to_string())
        .await?
        .and_then(|link| link.current().map(str::to_string)))
}

// ── Venue stream events ─────────────────────────────────────────────

pub async fn written(
    ctx: &mut HandlerContext<'_>,
    event: &OfferWritten,
) -> Result<(), HandlerError> {
    let offer_list = OfferListId::new(ctx.venue_id(), event.ol_key.clone());
    if ctx.undo {
        let id = OfferId::new(offer_list, event.offer_id);
        ctx.undo_latest::<Offer>(&id).await?;
        return Ok(());
    }

    ctx.ensure_account(&event.maker).await?;
    write_offer(
        ctx,
        OfferWrite {
            offer_list: &offer_list,
            offer_number: event.offer_id,
            maker: &event.maker,
            wants: event.wants,
            gives: event.gives,
            gasprice: event.gasprice,
            gasreq: event.gasreq,
            strategy_event_id: None,
        },
    )
    .await?;
    Ok(())
}

pub async fn retracted(
    ctx: &mut HandlerContext<'_>,
    event: &OfferRetracted,
) -> Result<(), HandlerError> {
    let offer_list = OfferListId::new(ctx.venue_id(), event.ol_key.clone());
    let id = OfferId::new(offer_list, event.offer_id);
    if ctx.undo {
        undo_cascaded_orders(ctx).await?;
        ctx.undo_latest::<Offer>(&id).await?;
        return Ok(());
    }

    retract_offer(ctx, &id, None).await?;
    Ok(())
}

/// Settle a market order: one `order` row, one `taken_offer` row per
/// consumed offer, each consumed offer marked deleted, and fills pushed
/// into the resting orders that own them.
pub async fn order_completed(
    ctx: &mut HandlerContext<'_>,
    event: &OrderCompleted,
) -> Result<(), HandlerError> {
    let offer_list = OfferListId::new(ctx.venue_id(), event.ol_key.clone());
    let order_id = OrderId::new(offer_list.clone(), ctx.event_id.clone());

    if ctx.undo {
        for fill in event.taken_offers.iter().rev() {
            let taken = TakenOfferId::new(order_id.clone(), fill.offer_id);
            ctx.tx.remove::<TakenOffer>(&taken.to_string()).await?;
        }
        ctx.tx.remove::<Order>(&order_id.to_string()).await?;
        undo_cascaded_orders(ctx).await?;
        for fill in event.taken_offers.iter().rev() {
            let offer = OfferId::new(offer_list.clone(), fill.offer_id);
            ctx.undo_latest::<Offer>(&offer).await?;
        }
        return Ok(());
    }

    ctx.require::<OfferList>(&offer_list, "offer list").await?;
    ctx.ensure_account(&event.taker).await?;
    ctx.tx
        .save(&Order {
            id: order_id.to_string(),
            offer_list: offer_list.to_string(),
            taker: event.taker.clone(),
            fill_wants: event.fill_wants,
            taker_got: event.taker_got,
            taker_gave: event.taker_gave,
            penalty: event.penalty,
            fee_paid: event.fee_paid,
            tx_id: ctx.transaction_id.to_string(),
            timestamp: ctx.timestamp,
        })
        .await?;

    for fill in &event.taken_offers {
        let offer = OfferId::new(offer_list.clone(), fill.offer_id);
        take_offer(ctx, &order_id, &offer, fill).await?;
    }
    debug!(
        order = %order_id,
        taken = event.taken_offers.len(),
        "Order settled"
    );
    Ok(())
}

async fn take_offer(
    ctx: &mut HandlerContext<'_>,
    order_id: &OrderId,
    offer: &OfferId,
    fill: &TakenOfferFill,
) -> Result<(), HandlerError> {
    ctx.require::<Offer>(offer, "offer").await?;
    let (fail, posthook) = (fill.fail_reason.clone(), fill.posthook_fail_reason.clone());
    ctx.append::<Offer, _>(offer, move |fields| fields.taken(fail, posthook), None)
        .await?;

    ctx.tx
        .save(&TakenOffer {
            id: TakenOfferId::new(order_id.clone(), fill.offer_id).to_string(),
            order_id: order_id.to_string(),
            offer_id: offer.to_string(),
            taker_wants: fill.taker_wants,
            taker_gives: fill.taker_gives,
            failed: fill.fail_reason.is_some(),
            fail_reason: fill.fail_reason.clone(),
            posthook_fail_reason: fill.posthook_fail_reason.clone(),
        })
        .await?;

    if fill.fail_reason.is_some() {
        return Ok(());
    }
    if let Some(resting) = linked_order(ctx, offer).await? {
        propagate_fill(ctx, &resting, fill).await?;
    }
    Ok(())
}

/// The resting order is the maker here: it receives what the taker gave
/// and hands over what the taker got.
async fn propagate_fill(
    ctx: &mut HandlerContext<'_>,
    order: &String,
    fill: &TakenOfferFill,
) -> Result<(), HandlerError> {
    let current = ctx.require::<StrategyOrder>(order, "resting order").await?;
    let mut next = current.fields;
    next.taker_got = next.taker_got.checked_add(fill.taker_gives)?;
    next.taker_gave = next.taker_gave.checked_add(fill.taker_wants)?;
    next.filled = next.is_filled();

    ctx.append::<StrategyOrder, _>(order, move |_| next, None).await?;
    debug!(order = %order, "Propagated fill to resting order");
    Ok(())
}
