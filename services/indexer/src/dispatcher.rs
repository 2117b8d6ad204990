//! Event dispatcher
//!
//! `dispatch` is one exhaustive match over [`DomainEvent`]: a new event
//! kind does not compile until it has a handler. `apply` wraps a dispatch
//! with the bookkeeping every event shares (the `transaction` row and the
//! `event_log` row).

use tracing::debug;
use venue_store::TransactionExt;

use crate::events::{
    DecodedEvent, DomainEvent, KandelEvent, RestingOrderEvent, TokenEvent, VenueEvent,
};
use crate::handlers::{kandel, offer, resting_order, token, venue};
use crate::handlers::{HandlerContext, HandlerError};
use crate::records::EventLog;

pub async fn dispatch(
    ctx: &mut HandlerContext<'_>,
    event: &DomainEvent,
) -> Result<(), HandlerError> {
    match event {
        DomainEvent::Venue(event) => match event {
            VenueEvent::VenueCreated(_) => venue::created(ctx).await,
            VenueEvent::VenueParamsUpdated(e) => venue::params_updated(ctx, e).await,
            VenueEvent::VenueKilled(_) => venue::killed(ctx).await,
            VenueEvent::OfferListParamsUpdated(e) => venue::offer_list_params_updated(ctx, e).await,
            VenueEvent::OfferWritten(e) => offer::written(ctx, e).await,
            VenueEvent::OfferRetracted(e) => offer::retracted(ctx, e).await,
            VenueEvent::OrderCompleted(e) => offer::order_completed(ctx, e).await,
            VenueEvent::MakerBalanceUpdated(e) => venue::maker_balance_updated(ctx, e).await,
            VenueEvent::TakerApprovalUpdated(e) => venue::taker_approval_updated(ctx, e).await,
        },
        DomainEvent::Kandel(event) => match event {
            KandelEvent::KandelCreated(e) => kandel::created(ctx, e).await,
            KandelEvent::KandelParamsSet(e) => kandel::params_set(ctx, e).await,
            KandelEvent::KandelCredited(e) => kandel::transfer(ctx, e, true).await,
            KandelEvent::KandelDebited(e) => kandel::transfer(ctx, e, false).await,
            KandelEvent::KandelAdminSet(e) => kandel::admin_set(ctx, e).await,
            KandelEvent::KandelRouterSet(e) => kandel::router_set(ctx, e).await,
            KandelEvent::KandelPopulated(e) => kandel::populated(ctx, e).await,
            KandelEvent::KandelRetracted(e) => kandel::retracted(ctx, e).await,
        },
        DomainEvent::RestingOrder(event) => match event {
            RestingOrderEvent::RestingOrderPosted(e) => resting_order::posted(ctx, e).await,
            RestingOrderEvent::RestingOrderExpirySet(e) => resting_order::expiry_set(ctx, e).await,
        },
        DomainEvent::Token(event) => match event {
            TokenEvent::TokenRegistered(e) => token::registered(ctx, e).await,
        },
    }
}

/// Apply (or undo) one decoded event inside the context's transaction.
///
/// Forward: ensure the `transaction` row, dispatch, write the `event_log`
/// row. Undo: load the `event_log` row (an undo of an event that was never
/// applied is structural), dispatch, delete the row.
pub async fn apply(
    ctx: &mut HandlerContext<'_>,
    event: &DecodedEvent,
) -> Result<(), HandlerError> {
    let kind = event.event.kind();
    let log_key = ctx.event_id.to_string();

    if ctx.undo {
        let logged = ctx
            .tx
            .fetch::<EventLog>(&log_key)
            .await?
            .ok_or_else(|| HandlerError::missing("event log", &log_key))?;
        ctx.logged = Some(logged);
        dispatch(ctx, &event.event).await?;
        ctx.tx.remove::<EventLog>(&log_key).await?;
        debug!(event = %log_key, kind, "Undid event");
        return Ok(());
    }

    ctx.ensure_transaction(&event.tx).await?;
    dispatch(ctx, &event.event).await?;
    let entry = ctx.log_entry(kind);
    ctx.tx.save(&entry).await?;
    debug!(
        event = %log_key,
        kind,
        versions = ctx.touched().len(),
        "Applied event"
    );
    Ok(())
}
