//! Subscription lifecycle coordination.
//!
//! [`SubscriptionLifecycleCoordinator`] is what the sync layer calls when a
//! subscription changes. It keeps the [`SubscriptionIndex`] current and hands
//! accepted subscriptions to the API runtime of this node through a
//! [`SubscriptionDispatcher`].
//!
//! # Dispatch
//!
//! ```text
//! save(sub) ─ accepted ─→ index.register(sub) ─→ spawn dispatch (bounded by timeout)
//!     │                                              │
//!     └─ otherwise ─→ index.unregister(sub)          ├─ ok      → done
//!                                                    └─ failure → SUBSCRIPTION_FAILURE command
//!                                                                 → CommandRepository::create
//! ```
//!
//! Dispatch is fire-and-forget: `save` returns as soon as the index is
//! updated, and a failing dispatch never evicts the subscription from the
//! index. Failures are reported to the management plane as commands; a
//! command that cannot be persisted is logged and counted, not retried.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fail::fail_point;
use gateway_common_cache::{
    CacheResult, Command, CommandRepository, CommandTag, ConfigError, MessageRecipient,
    Subscription, SubscriptionFailurePayload, SubscriptionIndex,
};
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

use crate::{
    config::CoordinatorConfig,
    error::{DispatchError, Result},
    metrics::DispatchMetrics,
};

/// Deploys subscriptions to the API runtime of this node.
#[async_trait]
pub trait SubscriptionDispatcher: Send + Sync {
    /// Makes `subscription` effective on the APIs served by this node.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the runtime refused or could not be
    /// reached. The coordinator bounds the call with its dispatch timeout.
    async fn dispatch(
        &self,
        subscription: Arc<Subscription>,
    ) -> std::result::Result<(), DispatchError>;
}

/// State shared with spawned dispatch tasks.
struct DispatchContext {
    dispatcher: Arc<dyn SubscriptionDispatcher>,
    commands: Arc<dyn CommandRepository>,
    config: CoordinatorConfig,
    metrics: DispatchMetrics,
}

impl DispatchContext {
    #[tracing::instrument(
        name = "coordinator.dispatch",
        skip(self, subscription),
        fields(subscription_id = %subscription.id, api = %subscription.api)
    )]
    async fn dispatch(&self, subscription: Arc<Subscription>) {
        self.metrics.record_dispatched();
        let started = Instant::now();
        let outcome = self.dispatch_with_timeout(Arc::clone(&subscription)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                self.metrics.record_success(elapsed);
                debug!(elapsed_ms = elapsed.as_millis() as u64, "subscription dispatched");
            },
            Err(err) => {
                if err.is_timeout() {
                    self.metrics.record_timeout(elapsed);
                } else {
                    self.metrics.record_failure(elapsed);
                }
                warn!(error = %err, "subscription dispatch failed");
                self.report_failure(&subscription, &err.to_string()).await;
            },
        }
    }

    async fn dispatch_with_timeout(
        &self,
        subscription: Arc<Subscription>,
    ) -> std::result::Result<(), DispatchError> {
        fail_point!("coordinator-before-dispatch", |_| {
            Err(DispatchError::unavailable("injected failure before dispatch"))
        });

        let timeout = self.config.dispatch_timeout();
        match tokio::time::timeout(timeout, self.dispatcher.dispatch(subscription)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::timeout(timeout)),
        }
    }

    async fn report_failure(&self, subscription: &Subscription, cause: &str) {
        let command = self.failure_command(subscription, cause);
        match self.persist(&command).await {
            Ok(()) => {
                self.metrics.record_command();
                info!(
                    audit.action = "record_subscription_failure",
                    audit.resource = %format_args!("subscription:{}", subscription.id),
                    audit.result = "success",
                    command_id = %command.id,
                    "audit_event"
                );
            },
            Err(err) => {
                self.metrics.record_command_failure();
                error!(
                    audit.action = "record_subscription_failure",
                    audit.resource = %format_args!("subscription:{}", subscription.id),
                    audit.result = "failure",
                    error = %err,
                    "audit_event"
                );
            },
        }
    }

    async fn persist(&self, command: &Command) -> CacheResult<()> {
        fail_point!("coordinator-before-command-create", |_| {
            Err(gateway_common_cache::CacheError::internal(
                "injected failure before command create",
            ))
        });
        self.commands.create(command).await
    }

    fn failure_command(&self, subscription: &Subscription, cause: &str) -> Command {
        let payload = SubscriptionFailurePayload {
            subscription_id: subscription.id.clone(),
            failure_cause: cause.to_owned(),
        };
        let content = serde_json::to_string(&payload).unwrap_or_else(|err| {
            warn!(error = %err, "failure payload serialization failed, using plain object");
            serde_json::json!({
                "subscriptionId": subscription.id.as_str(),
                "failureCause": cause,
            })
            .to_string()
        });

        let organization_id = non_empty(&subscription.organization_id)
            .unwrap_or(self.config.default_organization_id());
        let environment_id =
            non_empty(&subscription.environment_id).unwrap_or(self.config.default_environment_id());

        let now = Utc::now();
        Command::builder()
            .id(uuid::Uuid::new_v4().to_string())
            .organization_id(organization_id)
            .environment_id(environment_id)
            .from(self.config.node_id())
            .to(MessageRecipient::ManagementApis)
            .tags([CommandTag::SubscriptionFailure].into())
            .content(content)
            .created_at(now)
            .updated_at(now)
            .expired_at(expiry(now, self.config.command_ttl()))
            .build()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn expiry(now: DateTime<Utc>, ttl: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Keeps the subscription index and the API runtime in step with subscription
/// changes.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use gateway_common_authn::{
///     CoordinatorConfig, SubscriptionDispatcher, SubscriptionLifecycleCoordinator,
/// };
/// use gateway_common_cache::{MemoryCommandRepository, Subscription, SubscriptionIndex};
///
/// async fn example(dispatcher: Arc<dyn SubscriptionDispatcher>, subscription: Subscription) {
///     let coordinator = SubscriptionLifecycleCoordinator::builder()
///         .index(Arc::new(SubscriptionIndex::new()))
///         .dispatcher(dispatcher)
///         .commands(Arc::new(MemoryCommandRepository::new()))
///         .config(CoordinatorConfig::builder().node_id("gateway-1").build().expect("valid"))
///         .build()
///         .expect("valid configuration");
///
///     coordinator.save(subscription);
///     coordinator.shutdown().await;
/// }
/// ```
pub struct SubscriptionLifecycleCoordinator {
    index: Arc<SubscriptionIndex>,
    context: Arc<DispatchContext>,
    tracker: TaskTracker,
    runtime: Handle,
    stopped: AtomicBool,
}

#[bon::bon]
impl SubscriptionLifecycleCoordinator {
    /// Creates a coordinator.
    ///
    /// Dispatches run on `runtime`, or on the runtime the coordinator is built
    /// in when none is given. Once built, [`save`](Self::save) and
    /// [`dispatch_for`](Self::dispatch_for) may be called from any thread.
    ///
    /// # Errors
    ///
    /// Returns [`AuthnError::Config`](crate::AuthnError::Config) if `config`
    /// violates its constraints (possible for deserialized configurations), or
    /// if no runtime is given and the builder is not called from within one.
    #[builder]
    pub fn new(
        index: Arc<SubscriptionIndex>,
        dispatcher: Arc<dyn SubscriptionDispatcher>,
        commands: Arc<dyn CommandRepository>,
        config: CoordinatorConfig,
        runtime: Option<Handle>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = match runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ConfigError::Missing { field: "runtime" })?,
        };
        Ok(Self {
            index,
            context: Arc::new(DispatchContext {
                dispatcher,
                commands,
                config,
                metrics: DispatchMetrics::new(),
            }),
            tracker: TaskTracker::new(),
            runtime,
            stopped: AtomicBool::new(false),
        })
    }

    /// Records a subscription change.
    ///
    /// An accepted subscription is registered and dispatched in the
    /// background; any other status removes the subscription from the index.
    /// Returns once the index is updated.
    #[tracing::instrument(
        skip(self, subscription),
        fields(
            subscription_id = %subscription.id,
            api = %subscription.api,
            status = %subscription.status,
        )
    )]
    pub fn save(&self, subscription: Subscription) {
        let subscription = Arc::new(subscription);
        if subscription.is_accepted() {
            self.index.register(Arc::clone(&subscription));
            self.spawn_dispatch(subscription);
        } else {
            self.index.unregister(&subscription);
            debug!("subscription no longer accepted, removed from cache");
        }
    }

    /// Re-dispatches every cached subscription of the given APIs.
    ///
    /// Used once APIs are deployed after their subscriptions were synced.
    /// Subscriptions are dispatched one after the other: APIs in the given
    /// order, subscription ids in ascending order within an API. Returns the
    /// number of subscriptions queued.
    #[tracing::instrument(skip(self, apis))]
    pub fn dispatch_for<I, S>(&self, apis: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let queued: Vec<Arc<Subscription>> = apis
            .into_iter()
            .flat_map(|api| self.index.subscriptions_for_api(api.as_ref()))
            .collect();
        let count = queued.len();
        if count == 0 {
            return 0;
        }

        let context = Arc::clone(&self.context);
        self.tracker.spawn_on(
            async move {
                for subscription in queued {
                    context.dispatch(subscription).await;
                }
            }
            .in_current_span(),
            &self.runtime,
        );
        info!(count, "queued subscriptions for dispatch");
        count
    }

    fn spawn_dispatch(&self, subscription: Arc<Subscription>) {
        let context = Arc::clone(&self.context);
        self.tracker.spawn_on(
            async move { context.dispatch(subscription).await }.in_current_span(),
            &self.runtime,
        );
    }

    /// Number of dispatch tasks still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits for the dispatches started so far to finish.
    ///
    /// After [`shutdown`](Self::shutdown) the coordinator stays closed.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        if !self.stopped.load(Ordering::Acquire) {
            self.tracker.reopen();
        }
    }

    /// Waits for in-flight dispatches to finish.
    ///
    /// Each dispatch is bounded by the dispatch timeout, so this returns
    /// within roughly that bound. Subscriptions saved afterwards are still
    /// registered and dispatched but no longer awaited.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.tracker.close();
        self.tracker.wait().await;
        self.context.metrics.log_metrics();
        info!(node_id = self.context.config.node_id(), "subscription coordinator stopped");
    }

    /// The index kept current by this coordinator.
    #[must_use]
    pub fn index(&self) -> &Arc<SubscriptionIndex> {
        &self.index
    }

    /// The coordinator's configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.context.config
    }

    /// Dispatch counters.
    #[must_use]
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.context.metrics
    }
}

impl std::fmt::Debug for SubscriptionLifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionLifecycleCoordinator")
            .field("node_id", &self.context.config.node_id())
            .field("in_flight", &self.tracker.len())
            .field("metrics", &self.context.metrics)
            .finish_non_exhaustive()
    }
}
