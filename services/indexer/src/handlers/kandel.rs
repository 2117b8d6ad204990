//! Market-making strategy ("Kandel") handlers
//!
//! Every strategy event appends a strategy version and stores the
//! configuration as of that version. Populate and retract also write
//! offers (tagged with the strategy event id) and, for populate, the
//! offer-index rows; a `strategy_event` record keeps what was overwritten
//! so the undo restores it.

use venue_store::{Construct, TransactionExt};
use venue_types::ids::{
    AccountId, OfferId, OfferListId, OfferListKey, OfferSide, StrategyEventId, StrategyId,
    StrategyOfferIndexId, TokenBalanceId, VenueId,
};
use venue_types::numeric::RawAmount;

use crate::entities::{
    BalanceFields, Offer, Strategy, StrategyFields, StrategyKeys, TokenBalance, TokenBalanceKeys,
};
use crate::events::{
    KandelAdminSet, KandelCreated, KandelParamsSet, KandelPopulated, KandelRetracted,
    KandelRouterSet, KandelTransfer,
};
use crate::handlers::offer::{retract_offer, undo_cascaded_orders, write_offer, OfferWrite};
use crate::handlers::{HandlerContext, HandlerError};
use crate::records::{IndexChange, StrategyConfiguration, StrategyEventRecord, StrategyOfferIndex};

fn strategy_id(ctx: &HandlerContext<'_>) -> StrategyId {
    StrategyId::new(ctx.chain, ctx.emitter.clone())
}

/// Offer list a strategy offer rests on: asks give base, bids give quote.
fn offer_list_for(keys: &StrategyKeys, side: OfferSide) -> OfferListId {
    let venue = VenueId::new(keys.chain, keys.venue.clone());
    let key = match side {
        OfferSide::Ask => OfferListKey::new(keys.base.clone(), keys.quote.clone()),
        OfferSide::Bid => OfferListKey::new(keys.quote.clone(), keys.base.clone()),
    };
    OfferListId::new(venue, key)
}

// ── Strategy versions ───────────────────────────────────────────────

/// Append a strategy version and its configuration row.
async fn append_strategy<U>(
    ctx: &mut HandlerContext<'_>,
    kind: &'static str,
    update: U,
    construct: Option<Construct<Strategy>>,
) -> Result<(), HandlerError>
where
    U: FnOnce(StrategyFields) -> StrategyFields + Send,
{
    let id = strategy_id(ctx);
    if construct.is_none() {
        ctx.require::<Strategy>(&id, "strategy").await?;
    }
    let version = ctx
        .append::<Strategy, _>(
            &id,
            move |fields| StrategyFields {
                last_event: kind.to_string(),
                ..update(fields)
            },
            construct,
        )
        .await?;
    ctx.tx
        .save(&StrategyConfiguration {
            id: version.id.clone(),
            strategy_id: version.entity_id.clone(),
            version_number: version.version_number,
            config: version.fields,
        })
        .await?;
    Ok(())
}

/// Drop the current strategy version and its configuration row.
async fn undo_strategy(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let id = strategy_id(ctx);
    let entity = ctx.require_entity::<Strategy>(&id, "strategy").await?;
    ctx.tx
        .remove::<StrategyConfiguration>(&entity.current_version_id)
        .await?;
    ctx.undo_latest::<Strategy>(&id).await?;
    Ok(())
}

async fn strategy_keys(ctx: &mut HandlerContext<'_>) -> Result<StrategyKeys, HandlerError> {
    let id = strategy_id(ctx);
    Ok(ctx.require_entity::<Strategy>(&id, "strategy").await?.keys)
}

// ── Lifecycle ───────────────────────────────────────────────────────

pub async fn created(
    ctx: &mut HandlerContext<'_>,
    event: &KandelCreated,
) -> Result<(), HandlerError> {
    if ctx.undo {
        return undo_strategy(ctx).await;
    }

    ctx.ensure_account(&event.owner).await?;
    let emitter = ctx.emitter.clone();
    ctx.ensure_account(&emitter).await?;
    let keys = StrategyKeys {
        chain: ctx.chain,
        address: emitter.clone(),
        venue: event.venue.clone(),
        base: event.base.clone(),
        quote: event.quote.clone(),
        reserve: event.reserve.clone().unwrap_or(emitter),
    };
    let construct = Construct::new(keys, StrategyFields::new(event.owner.clone()));
    append_strategy(ctx, "KandelCreated", |fields| fields, Some(construct)).await
}

pub async fn params_set(
    ctx: &mut HandlerContext<'_>,
    event: &KandelParamsSet,
) -> Result<(), HandlerError> {
    if ctx.undo {
        return undo_strategy(ctx).await;
    }

    let params = event.clone();
    append_strategy(
        ctx,
        "KandelParamsSet",
        move |mut fields| {
            fields.gasprice = params.gasprice.unwrap_or(fields.gasprice);
            fields.gasreq = params.gasreq.unwrap_or(fields.gasreq);
            fields.step_size = params.step_size.unwrap_or(fields.step_size);
            fields.price_points = params.price_points.unwrap_or(fields.price_points);
            fields.base_quote_tick_offset = params
                .base_quote_tick_offset
                .unwrap_or(fields.base_quote_tick_offset);
            fields
        },
        None,
    )
    .await
}

pub async fn admin_set(
    ctx: &mut HandlerContext<'_>,
    event: &KandelAdminSet,
) -> Result<(), HandlerError> {
    if ctx.undo {
        return undo_strategy(ctx).await;
    }

    ctx.ensure_account(&event.admin).await?;
    let admin = event.admin.clone();
    append_strategy(
        ctx,
        "KandelAdminSet",
        move |fields| StrategyFields { admin, ..fields },
        None,
    )
    .await
}

pub async fn router_set(
    ctx: &mut HandlerContext<'_>,
    event: &KandelRouterSet,
) -> Result<(), HandlerError> {
    if ctx.undo {
        return undo_strategy(ctx).await;
    }

    let router = Some(event.router.clone());
    append_strategy(
        ctx,
        "KandelRouterSet",
        move |fields| StrategyFields { router, ..fields },
        None,
    )
    .await
}

// ── Reserve balances ────────────────────────────────────────────────

/// Credit (`credit = true`) or debit the strategy's reserve for one token.
pub async fn transfer(
    ctx: &mut HandlerContext<'_>,
    event: &KandelTransfer,
    credit: bool,
) -> Result<(), HandlerError> {
    let keys = strategy_keys(ctx).await?;
    let reserve = AccountId::new(ctx.chain, keys.reserve.clone());
    let id = TokenBalanceId::new(reserve.clone(), event.token.clone());

    if ctx.undo {
        ctx.undo_latest::<TokenBalance>(&id).await?;
        return undo_strategy(ctx).await;
    }

    let current = ctx
        .current::<TokenBalance>(&id)
        .await?
        .map(|version| version.fields.balance)
        .unwrap_or_default();
    let balance: RawAmount = if credit {
        current.checked_add(event.amount)?
    } else {
        current.checked_sub(event.amount)?
    };
    let balance_keys = TokenBalanceKeys {
        reserve: reserve.to_string(),
        token: event.token.clone(),
    };
    ctx.append::<TokenBalance, _>(
        &id,
        move |_| BalanceFields { balance },
        Some(Construct::new(balance_keys, BalanceFields::default())),
    )
    .await?;

    let kind = if credit { "KandelCredited" } else { "KandelDebited" };
    append_strategy(ctx, kind, |fields| fields, None).await
}

// ── Offers ──────────────────────────────────────────────────────────

pub async fn populated(
    ctx: &mut HandlerContext<'_>,
    event: &KandelPopulated,
) -> Result<(), HandlerError> {
    let strategy = strategy_id(ctx);
    let event_key = StrategyEventId::new(strategy.clone(), ctx.event_id.clone()).to_string();
    let keys = strategy_keys(ctx).await?;

    if ctx.undo {
        let record = ctx
            .tx
            .fetch::<StrategyEventRecord>(&event_key)
            .await?
            .ok_or_else(|| HandlerError::missing("strategy event", &event_key))?;
        for change in record.indexes.iter().rev() {
            match &change.previous {
                Some(previous) => ctx.tx.save(previous).await?,
                None => {
                    ctx.tx.remove::<StrategyOfferIndex>(&change.id).await?;
                }
            }
        }
        for offer in event.offers.iter().rev() {
            let id = OfferId::new(offer_list_for(&keys, offer.side), offer.offer_id);
            ctx.undo_latest::<Offer>(&id).await?;
        }
        ctx.tx.remove::<StrategyEventRecord>(&event_key).await?;
        return undo_strategy(ctx).await;
    }

    let mut record = StrategyEventRecord {
        id: event_key.clone(),
        strategy_id: strategy.to_string(),
        kind: "KandelPopulated".to_string(),
        offers: Vec::with_capacity(event.offers.len()),
        indexes: Vec::with_capacity(event.offers.len()),
    };
    let maker = ctx.emitter.clone();

    for offer in &event.offers {
        let offer_list = offer_list_for(&keys, offer.side);
        let offer_id = write_offer(
            ctx,
            OfferWrite {
                offer_list: &offer_list,
                offer_number: offer.offer_id,
                maker: &maker,
                wants: offer.wants,
                gives: offer.gives,
                gasprice: offer.gasprice,
                gasreq: offer.gasreq,
                strategy_event_id: Some(event_key.clone()),
            },
        )
        .await?;

        let index_id = StrategyOfferIndexId::new(strategy.clone(), offer.side, offer.index);
        let previous = ctx
            .tx
            .fetch::<StrategyOfferIndex>(&index_id.to_string())
            .await?;
        ctx.tx
            .save(&StrategyOfferIndex {
                id: index_id.to_string(),
                strategy_id: strategy.to_string(),
                side: offer.side,
                index: offer.index,
                offer_id: offer_id.to_string(),
            })
            .await?;
        record.indexes.push(IndexChange {
            id: index_id.to_string(),
            previous,
        });
        record.offers.push(offer_id.to_string());
    }

    ctx.tx.save(&record).await?;
    append_strategy(ctx, "KandelPopulated", |fields| fields, None).await
}

pub async fn retracted(
    ctx: &mut HandlerContext<'_>,
    event: &KandelRetracted,
) -> Result<(), HandlerError> {
    let strategy = strategy_id(ctx);
    let event_key = StrategyEventId::new(strategy.clone(), ctx.event_id.clone()).to_string();
    let keys = strategy_keys(ctx).await?;

    if ctx.undo {
        undo_cascaded_orders(ctx).await?;
        for offer in event.offers.iter().rev() {
            let id = OfferId::new(offer_list_for(&keys, offer.side), offer.offer_id);
            ctx.undo_latest::<Offer>(&id).await?;
        }
        ctx.tx.remove::<StrategyEventRecord>(&event_key).await?;
        return undo_strategy(ctx).await;
    }

    let mut record = StrategyEventRecord {
        id: event_key.clone(),
        strategy_id: strategy.to_string(),
        kind: "KandelRetracted".to_string(),
        offers: Vec::with_capacity(event.offers.len()),
        indexes: Vec::new(),
    };
    for offer in &event.offers {
        let id = OfferId::new(offer_list_for(&keys, offer.side), offer.offer_id);
        retract_offer(ctx, &id, Some(event_key.clone())).await?;
        record.offers.push(id.to_string());
    }

    ctx.tx.save(&record).await?;
    append_strategy(ctx, "KandelRetracted", |fields| fields, None).await
}
