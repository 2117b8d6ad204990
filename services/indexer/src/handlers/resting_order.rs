//! Resting-order strategy handlers

use tracing::debug;
use venue_store::{Construct, TransactionExt};
use venue_types::ids::{OfferId, OfferListId, StrategyOrderId, VenueId};

use crate::entities::{OfferList, StrategyOrder, StrategyOrderFields, StrategyOrderKeys};
use crate::events::{RestingOrderExpirySet, RestingOrderPosted};
use crate::handlers::offer::linked_order;
use crate::handlers::{HandlerContext, HandlerError};
use crate::records::RestingOrderLink;

/// Create the strategy order and, when a residual offer was posted on the
/// opposite book, link that offer to it.
pub async fn posted(
    ctx: &mut HandlerContext<'_>,
    event: &RestingOrderPosted,
) -> Result<(), HandlerError> {
    let venue = VenueId::new(ctx.chain, event.venue.clone());
    let offer_list = OfferListId::new(venue.clone(), event.ol_key.clone());
    let order = StrategyOrderId::new(offer_list.clone(), ctx.event_id.clone()).to_string();
    let resting_offer = event
        .resting_offer_id
        .map(|n| OfferId::new(OfferListId::new(venue, event.ol_key.flipped()), n));

    if ctx.undo {
        if let Some(offer) = &resting_offer {
            unlink(ctx, offer, &order).await?;
        }
        ctx.undo_latest::<StrategyOrder>(&order).await?;
        return Ok(());
    }

    ctx.require::<OfferList>(&offer_list, "offer list").await?;
    ctx.ensure_account(&event.owner).await?;

    let mut fields = StrategyOrderFields {
        fill_or_kill: event.fill_or_kill,
        fill_wants: event.fill_wants,
        taker_wants: event.taker_wants,
        taker_gives: event.taker_gives,
        taker_got: event.taker_got,
        taker_gave: event.taker_gave,
        fee: event.fee,
        expiry: event.expiry,
        filled: false,
        cancelled: false,
    };
    fields.filled = fields.is_filled();
    let keys = StrategyOrderKeys {
        offer_list: offer_list.to_string(),
        owner: event.owner.clone(),
        resting_offer: resting_offer.as_ref().map(ToString::to_string),
    };
    ctx.append::<StrategyOrder, _>(
        &order,
        move |_| fields,
        Some(Construct::new(keys, StrategyOrderFields::default())),
    )
    .await?;

    if let Some(offer) = &resting_offer {
        let key = offer.to_string();
        let mut link = ctx
            .tx
            .fetch::<RestingOrderLink>(&key)
            .await?
            .unwrap_or_else(|| RestingOrderLink {
                offer_id: key.clone(),
                orders: Vec::new(),
            });
        link.orders.push(order.clone());
        ctx.tx.save(&link).await?;
        debug!(offer = %key, order = %order, "Linked resting offer");
    }
    Ok(())
}

/// Pop `order` off the offer's link history; it must be the current owner.
async fn unlink(
    ctx: &mut HandlerContext<'_>,
    offer: &OfferId,
    order: &str,
) -> Result<(), HandlerError> {
    let key = offer.to_string();
    let mut link = ctx
        .tx
        .fetch::<RestingOrderLink>(&key)
        .await?
        .filter(|link| link.current() == Some(order))
        .ok_or_else(|| HandlerError::missing("resting order link", format!("{} -> {}", key, order)))?;

    link.orders.pop();
    if link.orders.is_empty() {
        ctx.tx.remove::<RestingOrderLink>(&key).await?;
    } else {
        ctx.tx.save(&link).await?;
    }
    Ok(())
}

pub async fn expiry_set(
    ctx: &mut HandlerContext<'_>,
    event: &RestingOrderExpirySet,
) -> Result<(), HandlerError> {
    if ctx.undo {
        for order in ctx.logged_ids::<StrategyOrder>() {
            ctx.undo_latest::<StrategyOrder>(&order).await?;
        }
        return Ok(());
    }

    let venue = VenueId::new(ctx.chain, event.venue.clone());
    let offer = OfferId::new(OfferListId::new(venue, event.ol_key.clone()), event.offer_id);
    let order = linked_order(ctx, &offer)
        .await?
        .ok_or_else(|| HandlerError::missing("resting order link", &offer))?;

    ctx.require::<StrategyOrder>(&order, "resting order").await?;
    let expiry = event.expiry;
    ctx.append::<StrategyOrder, _>(
        &order,
        move |fields| StrategyOrderFields { expiry, ..fields },
        None,
    )
    .await?;
    Ok(())
}
