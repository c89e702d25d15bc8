//! Resource reconciliation on standalone hosts and swarm clusters

mod common;

use common::{environment, fast_settings, FakeResource, TestContext};
use sea_orm::{EntityTrait, PaginatorTrait};
use temps_entities::{
    managed_networks, resource_networks,
    types::{NetworkScope, NetworkStatus},
};
use temps_networks::{
    IsolationMode, NetworkError, NetworkSettings, ReconcileOutcome, ResourceRef,
};

fn strict() -> NetworkSettings {
    NetworkSettings {
        isolation_mode: IsolationMode::Strict,
        ..fast_settings()
    }
}

#[tokio::test]
async fn test_first_reconcile_creates_network_and_attachment() -> anyhow::Result<()> {
    let ctx = TestContext::new(fast_settings(), false).await?;
    let env = environment(5, "production");
    let app = ctx.add_app(1, &env, &["c1"]);

    let outcome = ctx.reconciler.reconcile_resource(&app).await?;
    assert!(matches!(outcome, ReconcileOutcome::Reconciled(_)));

    let networks = managed_networks::Entity::find().all(ctx.db.db.as_ref()).await?;
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0].status, NetworkStatus::Active);
    assert_eq!(networks[0].scope, NetworkScope::Environment);

    let attachments = resource_networks::Entity::find().all(ctx.db.db.as_ref()).await?;
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].resource_id, 1);
    assert!(attachments[0].is_connected);
    assert!(attachments[0].is_auto_attached);
    assert_eq!(attachments[0].alias_list(), vec!["app-1".to_string()]);
    assert!(ctx.engine.is_connected(&networks[0].docker_network_name, "c1"));

    // Same engine state: rows are updated, not duplicated
    ctx.reconciler.reconcile_resource(&app).await?;
    assert_eq!(
        managed_networks::Entity::find().count(ctx.db.db.as_ref()).await?,
        1
    );
    assert_eq!(
        resource_networks::Entity::find().count(ctx.db.db.as_ref()).await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_environment_mode_keeps_default_network() -> anyhow::Result<()> {
    let ctx = TestContext::new(fast_settings(), false).await?;
    let app = ctx.add_app(1, &environment(5, "production"), &["c1", "c2"]);

    ctx.reconciler.reconcile_resource(&app).await?;

    let networks = ctx.reconciler.registry().list_networks(None).await?;
    let network = &networks[0];
    for container in ["c1", "c2"] {
        assert!(ctx.engine.is_connected(&network.docker_network_name, container));
        assert!(ctx.engine.is_connected("temps-app-network", container));
    }
    assert!(ctx
        .engine
        .commands_starting_with(&["network", "disconnect"])
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_strict_isolation_leaves_default_network() -> anyhow::Result<()> {
    let ctx = TestContext::new(strict(), false).await?;
    let app = ctx.add_app(1, &environment(5, "production"), &["c1"]);

    ctx.reconciler.reconcile_resource(&app).await?;

    let networks = ctx.reconciler.registry().list_networks(None).await?;
    let network = &networks[0];
    assert!(ctx.engine.is_connected(&network.docker_network_name, "c1"));
    assert!(!ctx.engine.is_connected("temps-app-network", "c1"));

    let disconnects = ctx.engine.commands_starting_with(&["network", "disconnect"]);
    assert_eq!(disconnects.len(), 1);
    assert!(disconnects[0].args.contains(&"-f".to_string()));

    // Already disconnected: the second pass is a no-op for the engine
    ctx.reconciler.reconcile_resource(&app).await?;
    assert!(!ctx.engine.is_connected("temps-app-network", "c1"));
    Ok(())
}

#[tokio::test]
async fn test_isolation_none_is_a_no_op() -> anyhow::Result<()> {
    let settings = NetworkSettings {
        isolation_mode: IsolationMode::None,
        ..fast_settings()
    };
    let ctx = TestContext::new(settings, false).await?;
    let app = ctx.add_app(1, &environment(5, "production"), &["c1"]);

    let outcome = ctx.reconciler.reconcile_resource(&app).await?;

    assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
    assert!(ctx.engine.commands().is_empty());
    assert_eq!(
        managed_networks::Entity::find().count(ctx.db.db.as_ref()).await?,
        0
    );
    Ok(())
}

#[tokio::test]
async fn test_resource_without_environment_is_skipped() -> anyhow::Result<()> {
    let ctx = TestContext::new(fast_settings(), false).await?;
    let resource = ResourceRef::database(4);
    ctx.catalog.add_resource(
        resource,
        FakeResource {
            server_id: ctx.server.id,
            containers: vec!["pg".to_string()],
            ..Default::default()
        },
    );

    let outcome = ctx.reconciler.reconcile_resource(&resource).await?;
    assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
    Ok(())
}

#[tokio::test]
async fn test_proxy_isolation_attaches_reachable_resources() -> anyhow::Result<()> {
    let settings = NetworkSettings {
        proxy_isolation: true,
        ..fast_settings()
    };
    let ctx = TestContext::new(settings, false).await?;
    let env = environment(5, "production");
    let web = ResourceRef::application(1);
    ctx.engine.add_container("temps-app-network", "web-1");
    ctx.catalog.add_resource(
        web,
        FakeResource {
            server_id: ctx.server.id,
            environment: Some(env.clone()),
            containers: vec!["web-1".to_string()],
            reachable: true,
            ..Default::default()
        },
    );
    let worker = ctx.add_app(2, &env, &["worker-1"]);

    ctx.reconciler.reconcile_resource(&web).await?;
    ctx.reconciler.reconcile_resource(&worker).await?;

    let proxy = ctx
        .reconciler
        .registry()
        .list_networks(None)
        .await?
        .into_iter()
        .find(|n| n.scope == NetworkScope::Proxy)
        .expect("proxy network");
    assert!(proxy.is_proxy_network);
    assert!(ctx.engine.is_connected(&proxy.docker_network_name, "web-1"));
    assert!(!ctx.engine.is_connected(&proxy.docker_network_name, "worker-1"));

    assert_eq!(ctx.reconciler.registry().list_attachments(&web).await?.len(), 2);
    assert_eq!(
        ctx.reconciler.registry().list_attachments(&worker).await?.len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_connect_is_retryable_error() -> anyhow::Result<()> {
    let ctx = TestContext::new(fast_settings(), false).await?;
    let app = ctx.add_app(1, &environment(5, "production"), &["c1"]);
    ctx.engine
        .fail_next("network connect", "Error response from daemon: container c1 is restarting");

    let err = ctx.reconciler.reconcile_resource(&app).await.unwrap_err();
    assert!(matches!(err, NetworkError::Driver { .. }));
    assert!(err.is_retryable());
    assert!(ctx.reconciler.registry().list_attachments(&app).await?.is_empty());

    // The network was created before the connect and is reused
    ctx.reconciler.reconcile_resource(&app).await?;
    assert_eq!(ctx.reconciler.registry().list_networks(None).await?.len(), 1);
    assert_eq!(ctx.reconciler.registry().list_attachments(&app).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_swarm_updates_each_service_once() -> anyhow::Result<()> {
    let ctx = TestContext::new(strict(), true).await?;
    let env = environment(5, "production");
    let group = ResourceRef::service(7);
    ctx.engine.add_service("stack_api", &["temps-app-overlay"]);
    ctx.engine.add_service("stack_worker", &["temps-app-overlay"]);
    ctx.catalog.add_resource(
        group,
        FakeResource {
            server_id: ctx.server.id,
            environment: Some(env),
            services: vec!["stack_api".to_string(), "stack_worker".to_string()],
            aliases: vec!["api".to_string()],
            ..Default::default()
        },
    );

    ctx.reconciler.reconcile_resource(&group).await?;

    let updates = ctx.engine.commands_starting_with(&["service", "update"]);
    assert_eq!(updates.len(), 2);
    for update in &updates {
        assert!(update.args.contains(&"--network-add".to_string()));
        assert!(update.args.contains(&"--network-rm".to_string()));
        assert!(update.args.contains(&"--detach".to_string()));
    }
    assert!(ctx
        .engine
        .commands_starting_with(&["network", "connect"])
        .is_empty());

    let networks = ctx.reconciler.registry().list_networks(None).await?;
    let network = &networks[0];
    for service in ["stack_api", "stack_worker"] {
        assert_eq!(
            ctx.engine.service_network_names(service),
            vec![network.docker_network_name.clone()]
        );
    }

    // Specs already match: no further rolling updates
    ctx.engine.clear_commands();
    ctx.reconciler.reconcile_resource(&group).await?;
    assert!(ctx
        .engine
        .commands_starting_with(&["service", "update"])
        .is_empty());
    assert_eq!(ctx.reconciler.registry().list_attachments(&group).await?.len(), 1);
    Ok(())
}
