//! Strategy router: protocol fee, per-song strategy resolution, splits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use tempo_core::error::{DomainError, DomainResult};
use tempo_core::models::{EventKey, PaymentEvent, PaymentType, SongId, Split, StrategyConfig};
use tempo_core::ports::{
    EconomicStrategy, PaymentEffect, PaymentObserver, Repositories, StrategyPayment,
};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::amount::apply_bps;
use crate::registry::StrategyRegistry;

/// Hard cap on the protocol fee (10%).
pub const MAX_PROTOCOL_FEE_BPS: u16 = 1_000;

/// Default protocol fee (1%).
pub const DEFAULT_PROTOCOL_FEE_BPS: u16 = 100;

/// Full breakdown of a routed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedPayment {
    pub gross: U256,
    pub protocol_fee: U256,
    pub treasury: Address,
    pub net: U256,
    pub splits: Vec<Split>,
    pub effect: PaymentEffect,
}

struct SongStrategy {
    config: StrategyConfig,
    strategy: Box<dyn EconomicStrategy>,
    /// Recorded payments already folded into `strategy`.
    applied: HashSet<EventKey>,
}

/// Resolves each song's strategy and applies the protocol fee.
///
/// A song's strategy state is the fold of its recorded payments whose block
/// timestamp is at or after the configuration's `updated_at`. Replacing a
/// strategy starts from fresh state and never reinterprets earlier payments;
/// [`StrategyRouter::restore`] rebuilds the state from the ledger.
pub struct StrategyRouter {
    registry: StrategyRegistry,
    protocol_fee_bps: u16,
    treasury: Address,
    songs: HashMap<SongId, SongStrategy>,
}

impl StrategyRouter {
    pub fn new(
        registry: StrategyRegistry,
        protocol_fee_bps: u16,
        treasury: Address,
    ) -> DomainResult<Self> {
        if protocol_fee_bps > MAX_PROTOCOL_FEE_BPS {
            return Err(DomainError::ValidationError(format!(
                "protocol fee {protocol_fee_bps} bp exceeds cap of {MAX_PROTOCOL_FEE_BPS} bp"
            )));
        }
        Ok(Self {
            registry,
            protocol_fee_bps,
            treasury,
            songs: HashMap::new(),
        })
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn protocol_fee_bps(&self) -> u16 {
        self.protocol_fee_bps
    }

    pub fn treasury(&self) -> Address {
        self.treasury
    }

    /// Check a configuration without applying it.
    pub fn validate(&self, config: &StrategyConfig) -> DomainResult<()> {
        self.registry
            .build(&config.strategy_id, &config.params)
            .map(drop)
    }

    /// Set or replace a song's strategy.
    pub fn configure_song(&mut self, config: StrategyConfig) -> DomainResult<()> {
        let strategy = self.registry.build(&config.strategy_id, &config.params)?;
        info!(song = %config.song_id, strategy = %config.strategy_id, "🎚️  Song strategy configured");
        self.songs.insert(
            config.song_id,
            SongStrategy {
                config,
                strategy,
                applied: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Configure a song and fold its recorded payments back into the fresh
    /// strategy. Returns how many payments were applied.
    ///
    /// `history` should be ordered by `(block_number, log_index)`; payments
    /// older than the configuration are skipped.
    pub fn restore(
        &mut self,
        config: StrategyConfig,
        history: &[PaymentEvent],
    ) -> DomainResult<usize> {
        let song = config.song_id;
        self.configure_song(config)?;
        let applied = history
            .iter()
            .filter(|event| event.song_id == song)
            .filter_map(|event| self.observe(event))
            .count();
        Ok(applied)
    }

    pub fn remove_song(&mut self, song: &SongId) -> bool {
        self.songs.remove(song).is_some()
    }

    pub fn song_config(&self, song: &SongId) -> Option<&StrategyConfig> {
        self.songs.get(song).map(|s| &s.config)
    }

    /// Protocol fee taken from `gross`.
    pub fn protocol_fee(&self, gross: U256) -> U256 {
        apply_bps(gross, u64::from(self.protocol_fee_bps))
    }

    pub fn min_payment(
        &self,
        song: &SongId,
        payment_type: PaymentType,
        now: u64,
    ) -> DomainResult<U256> {
        self.strategy(song)?.compute_min_payment(payment_type, now)
    }

    pub fn authorize(&self, song: &SongId, payer: &Address, now: u64) -> DomainResult<bool> {
        Ok(self.strategy(song)?.is_authorized(payer, now))
    }

    /// Splits of a net amount under the song's current strategy.
    pub fn preview_splits(&self, song: &SongId, net: U256) -> DomainResult<Vec<Split>> {
        Ok(self.strategy(song)?.compute_splits(net))
    }

    /// Route a gross payment: fee, minimum check, strategy update, splits.
    pub fn route_payment(
        &mut self,
        song: &SongId,
        payer: Address,
        gross: U256,
        payment_type: PaymentType,
        now: u64,
    ) -> DomainResult<RoutedPayment> {
        let protocol_fee = self.protocol_fee(gross);
        let net = gross - protocol_fee;
        let treasury = self.treasury;

        let strategy = &mut self
            .songs
            .get_mut(song)
            .ok_or_else(|| DomainError::StrategyNotFound(format!("no strategy for song {song}")))?
            .strategy;

        let required = strategy.compute_min_payment(payment_type, now)?;
        if gross < required {
            return Err(DomainError::InsufficientPayment {
                required: required.to_string(),
                provided: gross.to_string(),
            });
        }
        if payment_type == PaymentType::Stream && !strategy.is_authorized(&payer, now) {
            return Err(DomainError::Unauthorized(payer.to_string()));
        }

        let effect = strategy.on_payment(&StrategyPayment {
            payer,
            amount: net,
            payment_type,
            timestamp: now,
        })?;
        let splits = if net.is_zero() {
            Vec::new()
        } else {
            strategy.compute_splits(net)
        };

        Ok(RoutedPayment {
            gross,
            protocol_fee,
            treasury,
            net,
            splits,
            effect,
        })
    }

    /// Mirror a payment already accepted on-chain.
    ///
    /// Uses the reported net amount; minimums are not re-checked. Payments
    /// predating the song's configuration and keys already applied are
    /// ignored, so redelivery is harmless.
    pub fn observe(&mut self, event: &PaymentEvent) -> Option<PaymentEffect> {
        let entry = self.songs.get_mut(&event.song_id)?;
        if event.timestamp < entry.config.updated_at {
            trace!(key = %event.key(), "Payment predates song strategy");
            return None;
        }
        if !entry.applied.insert(event.key()) {
            return None;
        }
        let payment = StrategyPayment {
            payer: event.listener,
            amount: event.net_amount,
            payment_type: event.payment_type,
            timestamp: u64::try_from(event.timestamp.timestamp()).unwrap_or_default(),
        };
        match entry.strategy.on_payment(&payment) {
            Ok(effect) => Some(effect),
            Err(e) => {
                debug!(key = %event.key(), error = %e, "Strategy rejected observed payment");
                None
            }
        }
    }

    fn strategy(&self, song: &SongId) -> DomainResult<&dyn EconomicStrategy> {
        self.songs
            .get(song)
            .map(|s| s.strategy.as_ref())
            .ok_or_else(|| DomainError::StrategyNotFound(format!("no strategy for song {song}")))
    }
}

// =============================================================================
// Shared Handle
// =============================================================================

/// Shared router, observed by the ledger writer and used by the admin API.
#[derive(Clone)]
pub struct RouterHandle {
    inner: Arc<RwLock<StrategyRouter>>,
}

impl RouterHandle {
    pub fn new(router: StrategyRouter) -> Self {
        Self {
            inner: Arc::new(RwLock::new(router)),
        }
    }

    pub fn inner(&self) -> &Arc<RwLock<StrategyRouter>> {
        &self.inner
    }

    /// Load every stored song strategy and rebuild its state from the
    /// ledger. Invalid stored configurations are skipped.
    ///
    /// The write lock is held throughout so payments recorded meanwhile are
    /// either in the fetched history or observed afterwards.
    pub async fn load_from(&self, repositories: &dyn Repositories) -> DomainResult<usize> {
        let configs = repositories.strategies().list_strategies().await?;
        let total = configs.len();
        let mut router = self.inner.write().await;

        let mut loaded = 0;
        for config in configs {
            let song = config.song_id;
            if let Err(e) = router.validate(&config) {
                warn!(song = %song, error = %e, "⚠️  Skipping invalid stored strategy");
                continue;
            }
            let history = repositories
                .plays()
                .song_history(&song, config.updated_at)
                .await?;
            let replayed = router.restore(config, &history)?;
            debug!(song = %song, replayed, "Strategy state rebuilt from ledger");
            loaded += 1;
        }

        info!(loaded, total, "🎚️  Song strategies loaded");
        Ok(loaded)
    }

    /// Validate, persist, then apply a song strategy.
    pub async fn set_strategy(
        &self,
        repositories: &dyn Repositories,
        config: StrategyConfig,
    ) -> DomainResult<()> {
        let mut router = self.inner.write().await;
        router.validate(&config)?;
        repositories.strategies().upsert_strategy(&config).await?;
        let history = repositories
            .plays()
            .song_history(&config.song_id, config.updated_at)
            .await?;
        router.restore(config, &history).map(drop)
    }
}

#[async_trait]
impl PaymentObserver for RouterHandle {
    async fn observe(&self, event: &PaymentEvent) {
        if let Some(effect) = self.inner.write().await.observe(event)
            && effect != PaymentEffect::None
        {
            debug!(key = %event.key(), effect = ?effect, "Strategy state updated");
        }
    }
}
