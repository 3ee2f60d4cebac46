//! Application assembly: one place that wires stores, clock, bus and
//! every engine together. The server binary and the test harness both
//! build through here.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use openpenpal_core::clock::Clock;

use crate::auth::AuthService;
use crate::barcode::BarcodeService;
use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::courier::CourierService;
use crate::credit::{CreditLedger, CreditWorkerPool, RewardListener};
use crate::dispatch::Dispatcher;
use crate::letters::LetterService;
use crate::ratelimit::{rules, RateLimiter};
use crate::store::Stores;

pub struct AppState {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub bus: Arc<EventBus>,
    pub stores: Stores,
    pub limiter: Arc<RateLimiter>,
    pub auth: Arc<AuthService>,
    pub letters: Arc<LetterService>,
    pub barcodes: Arc<BarcodeService>,
    pub couriers: Arc<CourierService>,
    pub dispatcher: Arc<Dispatcher>,
    pub ledger: Arc<CreditLedger>,
    pub pool: Arc<CreditWorkerPool>,
    pub rewards: Arc<RewardListener>,
}

impl AppState {
    pub fn build(config: AppConfig, stores: Stores, clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::build_with_rules(config, stores, clock, rules::default_rules())
    }

    /// Same assembly with an explicit rate-rule table (tests, staged
    /// rollouts).
    pub fn build_with_rules(
        config: AppConfig,
        stores: Stores,
        clock: Arc<dyn Clock>,
        rate_rules: Vec<openpenpal_core::ratelimit::RateRule>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new(config.bus_topic_capacity));
        let limiter = Arc::new(RateLimiter::new(
            Arc::clone(&clock),
            rate_rules,
            config.fraud.clone(),
        ));
        let auth = Arc::new(AuthService::new(
            Arc::clone(&stores.users),
            Arc::clone(&stores.couriers),
            Arc::clone(&clock),
            config.auth.clone(),
            config.registered_school_codes.clone(),
        ));
        let letters = Arc::new(LetterService::new(
            Arc::clone(&stores.letters),
            Arc::clone(&clock),
        ));
        let barcodes = Arc::new(BarcodeService::new(
            Arc::clone(&stores.barcodes),
            Arc::clone(&stores.letters),
            Arc::clone(&clock),
            Arc::clone(&bus),
        ));
        let couriers = Arc::new(CourierService::new(
            Arc::clone(&stores.users),
            Arc::clone(&stores.couriers),
            Arc::clone(&stores.tasks),
            Arc::clone(&clock),
            Arc::clone(&bus),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&stores.tasks),
            Arc::clone(&stores.couriers),
            Arc::clone(&clock),
            Arc::clone(&bus),
            config.dispatch.clone(),
        ));
        let ledger = Arc::new(CreditLedger::new(
            Arc::clone(&stores.credit),
            Arc::clone(&clock),
            Arc::clone(&bus),
        ));
        let pool = Arc::new(CreditWorkerPool::new(
            Arc::clone(&stores.credit_tasks),
            Arc::clone(&stores.users),
            Arc::clone(&ledger),
            Arc::clone(&limiter),
            Arc::clone(&clock),
            config.worker.clone(),
            chrono::Duration::days(config.credit_expiry_window_days),
        ));
        let rewards = Arc::new(RewardListener::new(
            Arc::clone(&pool),
            Arc::clone(&stores.letters),
        ));

        Arc::new(Self {
            config,
            clock,
            bus,
            stores,
            limiter,
            auth,
            letters,
            barcodes,
            couriers,
            dispatcher,
            ledger,
            pool,
            rewards,
        })
    }

    /// Spawn every background loop. The returned handles end when the
    /// shutdown flag flips and their next tick observes it.
    pub fn spawn_background(&self, shutdown: Arc<AtomicBool>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = vec![
            self.dispatcher.spawn_sweeper(Arc::clone(&shutdown)),
            self.dispatcher.spawn_reaper(Arc::clone(&shutdown)),
            self.dispatcher
                .spawn_listener(&self.bus, Arc::clone(&shutdown)),
            self.pool.spawn_dispatcher(Arc::clone(&shutdown)),
            self.pool.spawn_retry_sweeper(Arc::clone(&shutdown)),
            self.ledger.spawn_expiry(
                std::time::Duration::from_secs(24 * 60 * 60),
                Arc::clone(&shutdown),
            ),
        ];
        handles.extend(self.rewards.spawn(&self.bus, shutdown));
        handles
    }
}
