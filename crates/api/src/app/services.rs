//! Infrastructure wiring: work-item stores, provider gateway and background tasks.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use pinke_groups::GroupOrder;
use pinke_infra::config::{AppConfig, GatewayConfig};
use pinke_infra::db;
use pinke_infra::gateway::{HttpGateway, PaymentGateway, RefundGateway, SandboxGateway};
use pinke_infra::store::{InMemoryWorkItemStore, PostgresWorkItemStore, WorkItemStore};
use pinke_infra::tasks::{BackgroundTask, GroupTask, PaymentTask, RefundTask};
use pinke_payments::{Payment, Refund};
use pinke_tasks::TaskManager;

/// Everything the handlers and the process entry point share.
pub struct AppServices {
    pub manager: TaskManager,
    pub payments: Arc<dyn WorkItemStore<Payment>>,
    pub refunds: Arc<dyn WorkItemStore<Refund>>,
    pub groups: Arc<dyn WorkItemStore<GroupOrder>>,
}

type Stores = (
    Arc<dyn WorkItemStore<Payment>>,
    Arc<dyn WorkItemStore<Refund>>,
    Arc<dyn WorkItemStore<GroupOrder>>,
);

/// Build stores, gateway and the (not yet started) task manager from config.
///
/// An empty or `memory` database URL selects the in-memory stores; an empty
/// gateway URL selects the sandbox provider.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let (payments, refunds, groups) = if config.database.is_in_memory() {
        warn!("database.url not set; using in-memory work item stores");
        in_memory_stores()
    } else {
        let pool = db::connect(&config.database)
            .await
            .context("failed to connect to the database")?;
        db::ensure_schema(&pool)
            .await
            .context("failed to ensure the database schema")?;
        info!("database schema ready");
        postgres_stores(pool)
    };

    let (payment_gateway, refund_gateway) = gateways(&config.gateway)?;

    let tasks: Vec<BackgroundTask> = vec![
        PaymentTask::new(payments.clone(), payment_gateway, config.tasks.payment.clone()).into(),
        RefundTask::new(refunds.clone(), refund_gateway, config.tasks.refund.clone()).into(),
        GroupTask::new(groups.clone(), config.tasks.group.clone()).into(),
    ];

    let mut manager = TaskManager::new(config.tasks.shutdown_grace());
    for task in tasks {
        manager
            .register(task)
            .context("failed to register background task")?;
    }

    Ok(AppServices {
        manager,
        payments,
        refunds,
        groups,
    })
}

fn in_memory_stores() -> Stores {
    (
        Arc::new(InMemoryWorkItemStore::<Payment>::new()),
        Arc::new(InMemoryWorkItemStore::<Refund>::new()),
        Arc::new(InMemoryWorkItemStore::<GroupOrder>::new()),
    )
}

fn postgres_stores(pool: db::PgPool) -> Stores {
    (
        Arc::new(PostgresWorkItemStore::<Payment>::new(pool.clone())),
        Arc::new(PostgresWorkItemStore::<Refund>::new(pool.clone())),
        Arc::new(PostgresWorkItemStore::<GroupOrder>::new(pool)),
    )
}

fn gateways(
    config: &GatewayConfig,
) -> anyhow::Result<(Arc<dyn PaymentGateway>, Arc<dyn RefundGateway>)> {
    if config.is_sandbox() {
        warn!("gateway.base_url not set; using the sandbox provider");
        let gateway = Arc::new(SandboxGateway::new());
        let payments: Arc<dyn PaymentGateway> = gateway.clone();
        let refunds: Arc<dyn RefundGateway> = gateway;
        return Ok((payments, refunds));
    }

    let gateway = Arc::new(HttpGateway::new(config).context("invalid gateway configuration")?);
    info!(base_url = %config.base_url, "using http provider gateway");
    let payments: Arc<dyn PaymentGateway> = gateway.clone();
    let refunds: Arc<dyn RefundGateway> = gateway;
    Ok((payments, refunds))
}
