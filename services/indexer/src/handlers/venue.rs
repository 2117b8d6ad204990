//! Venue, offer-list, balance and approval handlers

use tracing::debug;
use venue_store::Construct;
use venue_types::ids::{MakerBalanceId, OfferListId, TakerApprovalId};

use crate::entities::{
    BalanceFields, MakerBalance, MakerBalanceKeys, OfferList, OfferListFields, OfferListKeys,
    TakerApproval, TakerApprovalFields, TakerApprovalKeys, Venue, VenueFields, VenueKeys,
};
use crate::events::{
    MakerBalanceUpdated, OfferListParamsUpdated, TakerApprovalUpdated, VenueParamsUpdated,
};
use crate::handlers::token::require_token;
use crate::handlers::{HandlerContext, HandlerError};

// ── Venue ───────────────────────────────────────────────────────────

pub async fn created(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let id = ctx.venue_id();
    if ctx.undo {
        ctx.undo_latest::<Venue>(&id).await?;
        return Ok(());
    }

    let keys = VenueKeys {
        chain: ctx.chain,
        address: ctx.emitter.clone(),
    };
    ctx.append::<Venue, _>(
        &id,
        |fields| fields,
        Some(Construct::new(keys, VenueFields::default())),
    )
    .await?;
    Ok(())
}

pub async fn params_updated(
    ctx: &mut HandlerContext<'_>,
    event: &VenueParamsUpdated,
) -> Result<(), HandlerError> {
    let id = ctx.venue_id();
    if ctx.undo {
        ctx.undo_latest::<Venue>(&id).await?;
        return Ok(());
    }

    ctx.require::<Venue>(&id, "venue").await?;
    let params = event.clone();
    ctx.append::<Venue, _>(
        &id,
        move |mut fields| {
            if let Some(governance) = params.governance {
                fields.governance = Some(governance);
            }
            if let Some(monitor) = params.monitor {
                fields.monitor = Some(monitor);
            }
            if let Some(vault) = params.vault {
                fields.vault = Some(vault);
            }
            fields.use_oracle = params.use_oracle.unwrap_or(fields.use_oracle);
            fields.notify = params.notify.unwrap_or(fields.notify);
            fields.gasprice = params.gasprice.unwrap_or(fields.gasprice);
            fields.gasmax = params.gasmax.unwrap_or(fields.gasmax);
            fields
        },
        None,
    )
    .await?;
    Ok(())
}

pub async fn killed(ctx: &mut HandlerContext<'_>) -> Result<(), HandlerError> {
    let id = ctx.venue_id();
    if ctx.undo {
        ctx.undo_latest::<Venue>(&id).await?;
        return Ok(());
    }

    ctx.require::<Venue>(&id, "venue").await?;
    ctx.append::<Venue, _>(
        &id,
        |fields| VenueFields {
            dead: true,
            ..fields
        },
        None,
    )
    .await?;
    Ok(())
}

// ── Offer lists ─────────────────────────────────────────────────────

/// Creates the offer list on first sight; both tokens must be registered.
pub async fn offer_list_params_updated(
    ctx: &mut HandlerContext<'_>,
    event: &OfferListParamsUpdated,
) -> Result<(), HandlerError> {
    let id = OfferListId::new(ctx.venue_id(), event.ol_key.clone());
    if ctx.undo {
        ctx.undo_latest::<OfferList>(&id).await?;
        return Ok(());
    }

    let construct = match ctx.current::<OfferList>(&id).await? {
        Some(_) => None,
        None => {
            require_token(ctx, &id.outbound_token()).await?;
            require_token(ctx, &id.inbound_token()).await?;
            debug!(offer_list = %id, "Creating offer list");
            Some(Construct::new(
                OfferListKeys {
                    venue: id.venue.to_string(),
                    outbound: id.key.outbound.clone(),
                    inbound: id.key.inbound.clone(),
                },
                OfferListFields::default(),
            ))
        }
    };

    let params = event.clone();
    ctx.append::<OfferList, _>(
        &id,
        move |mut fields| {
            fields.active = params.active.unwrap_or(fields.active);
            fields.fee = params.fee.unwrap_or(fields.fee);
            if let Some(density) = params.density {
                fields.density = density;
            }
            fields.gasbase = params.gasbase.unwrap_or(fields.gasbase);
            fields
        },
        construct,
    )
    .await?;
    Ok(())
}

// ── Balances / approvals ────────────────────────────────────────────

/// New total = current total + delta. Undo only rolls the chain back; the
/// delta is never re-applied negated.
pub async fn maker_balance_updated(
    ctx: &mut HandlerContext<'_>,
    event: &MakerBalanceUpdated,
) -> Result<(), HandlerError> {
    let id = MakerBalanceId::new(ctx.venue_id(), event.maker.clone());
    if ctx.undo {
        ctx.undo_latest::<MakerBalance>(&id).await?;
        return Ok(());
    }

    ctx.ensure_account(&event.maker).await?;
    let current = ctx
        .current::<MakerBalance>(&id)
        .await?
        .map(|version| version.fields.balance)
        .unwrap_or_default();
    let balance = current.apply_delta(event.delta)?;

    let keys = MakerBalanceKeys {
        venue: ctx.venue_id().to_string(),
        maker: event.maker.clone(),
    };
    ctx.append::<MakerBalance, _>(
        &id,
        move |_| BalanceFields { balance },
        Some(Construct::new(keys, BalanceFields::default())),
    )
    .await?;
    Ok(())
}

pub async fn taker_approval_updated(
    ctx: &mut HandlerContext<'_>,
    event: &TakerApprovalUpdated,
) -> Result<(), HandlerError> {
    let offer_list = OfferListId::new(ctx.venue_id(), event.ol_key.clone());
    let id = TakerApprovalId::new(offer_list.clone(), event.owner.clone(), event.spender.clone());
    if ctx.undo {
        ctx.undo_latest::<TakerApproval>(&id).await?;
        return Ok(());
    }

    ctx.ensure_account(&event.owner).await?;
    ctx.ensure_account(&event.spender).await?;
    let keys = TakerApprovalKeys {
        offer_list: offer_list.to_string(),
        owner: event.owner.clone(),
        spender: event.spender.clone(),
    };
    let value = event.value;
    ctx.append::<TakerApproval, _>(
        &id,
        move |_| TakerApprovalFields { value },
        Some(Construct::new(keys, TakerApprovalFields::default())),
    )
    .await?;
    Ok(())
}
