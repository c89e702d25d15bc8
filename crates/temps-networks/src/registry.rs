//! Durable model of managed networks and their attachments.
//!
//! Rows are only created through conflict-tolerant insert-or-fetch, and
//! status fields are last-writer-wins: the engine is authoritative and the
//! next inspection re-derives them anyway.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde_json::json;
use std::sync::Arc;
use temps_core::DBDateTime;
use temps_database::DbConnection;
use temps_entities::{
    managed_networks, resource_networks,
    types::{NetworkDriver, NetworkScope, NetworkStatus},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::resources::ResourceRef;
use crate::NetworkError;

/// Everything needed to insert a managed network row.
#[derive(Debug, Clone)]
pub struct NetworkSelector {
    pub name: String,
    pub docker_network_name: String,
    pub server_id: i32,
    pub team_id: i32,
    pub driver: NetworkDriver,
    pub scope: NetworkScope,
    pub project_id: Option<i32>,
    pub environment_id: Option<i32>,
    pub subnet: Option<String>,
    pub gateway: Option<String>,
    pub is_internal: bool,
    pub is_attachable: bool,
    pub is_proxy_network: bool,
    pub is_encrypted_overlay: bool,
    pub options: serde_json::Value,
    pub labels: serde_json::Value,
}

impl NetworkSelector {
    pub fn new(
        name: impl Into<String>,
        docker_network_name: impl Into<String>,
        server_id: i32,
        team_id: i32,
        scope: NetworkScope,
    ) -> Self {
        Self {
            name: name.into(),
            docker_network_name: docker_network_name.into(),
            server_id,
            team_id,
            driver: NetworkDriver::Bridge,
            scope,
            project_id: None,
            environment_id: None,
            subnet: None,
            gateway: None,
            is_internal: false,
            is_attachable: false,
            is_proxy_network: false,
            is_encrypted_overlay: false,
            options: json!({}),
            labels: json!({}),
        }
    }

    fn into_active_model(self, status: NetworkStatus) -> managed_networks::ActiveModel {
        managed_networks::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            name: Set(self.name),
            docker_network_name: Set(self.docker_network_name),
            server_id: Set(self.server_id),
            team_id: Set(self.team_id),
            driver: Set(self.driver),
            scope: Set(self.scope),
            project_id: Set(self.project_id),
            environment_id: Set(self.environment_id),
            subnet: Set(self.subnet),
            gateway: Set(self.gateway),
            is_internal: Set(self.is_internal),
            is_attachable: Set(self.is_attachable),
            is_proxy_network: Set(self.is_proxy_network),
            is_encrypted_overlay: Set(self.is_encrypted_overlay),
            options: Set(self.options),
            labels: Set(self.labels),
            docker_id: Set(None),
            status: Set(status),
            last_synced_at: Set(None),
            error_message: Set(None),
            ..Default::default()
        }
    }
}

/// Values written by every attachment upsert
#[derive(Debug, Clone, Default)]
pub struct AttachmentUpdate {
    pub aliases: Vec<String>,
    pub ipv4_address: Option<String>,
    pub is_auto_attached: bool,
    pub is_connected: bool,
}

#[derive(Clone)]
pub struct NetworkRegistry {
    db: Arc<DbConnection>,
}

impl NetworkRegistry {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Race-safe find-or-create keyed on (`docker_network_name`, `server_id`).
    ///
    /// Returns the row and whether this call inserted it. A unique violation
    /// means a concurrent caller won the insert; its row is fetched instead.
    /// `max_networks` is checked only when a new row would be inserted.
    pub async fn find_or_create_network(
        &self,
        selector: NetworkSelector,
        max_networks: Option<u32>,
    ) -> Result<(managed_networks::Model, bool), NetworkError> {
        if let Some(existing) = self
            .find_by_engine_name(selector.server_id, &selector.docker_network_name)
            .await?
        {
            return Ok((existing, false));
        }

        if let Some(limit) = max_networks {
            let count = self.count_for_server(selector.server_id).await?;
            if count >= u64::from(limit) {
                return Err(NetworkError::LimitReached {
                    server_id: selector.server_id,
                    limit,
                });
            }
        }

        let server_id = selector.server_id;
        let docker_network_name = selector.docker_network_name.clone();

        match selector
            .into_active_model(NetworkStatus::Pending)
            .insert(self.db.as_ref())
            .await
        {
            Ok(model) => {
                if let Some(limit) = max_networks {
                    self.enforce_limit(&model, limit).await?;
                }
                info!(
                    server_id,
                    network = %model.docker_network_name,
                    scope = %model.scope,
                    "Registered managed network"
                );
                Ok((model, true))
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(
                    server_id,
                    network = %docker_network_name,
                    "Concurrent creator registered the network first, re-fetching"
                );
                let model = self
                    .find_by_engine_name(server_id, &docker_network_name)
                    .await?
                    .ok_or_else(|| {
                        NetworkError::NotFound(format!(
                            "network {} on server {}",
                            docker_network_name, server_id
                        ))
                    })?;
                Ok((model, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Concurrent creators can both pass the pre-insert count. Rows are
    /// ranked by id, and an insert that lands past the limit is undone.
    async fn enforce_limit(
        &self,
        model: &managed_networks::Model,
        limit: u32,
    ) -> Result<(), NetworkError> {
        let rank = managed_networks::Entity::find()
            .filter(managed_networks::Column::ServerId.eq(model.server_id))
            .filter(managed_networks::Column::Id.lte(model.id))
            .count(self.db.as_ref())
            .await?;
        if rank <= u64::from(limit) {
            return Ok(());
        }

        managed_networks::Entity::delete_by_id(model.id)
            .exec(self.db.as_ref())
            .await?;
        debug!(
            server_id = model.server_id,
            network = %model.docker_network_name,
            "Lost the race for the last network slot, rolled back insert"
        );
        Err(NetworkError::LimitReached {
            server_id: model.server_id,
            limit,
        })
    }

    /// Insert a row for a network discovered on the engine; it exists
    /// already, so it starts `active`.
    pub async fn register_discovered(
        &self,
        selector: NetworkSelector,
        docker_id: &str,
    ) -> Result<managed_networks::Model, NetworkError> {
        let server_id = selector.server_id;
        let docker_network_name = selector.docker_network_name.clone();

        let mut active_model = selector.into_active_model(NetworkStatus::Active);
        active_model.docker_id = Set(Some(docker_id.to_string()));
        active_model.last_synced_at = Set(Some(Utc::now()));

        match active_model.insert(self.db.as_ref()).await {
            Ok(model) => Ok(model),
            Err(e) if is_unique_violation(&e) => {
                let existing = self
                    .find_by_engine_name(server_id, &docker_network_name)
                    .await?
                    .ok_or_else(|| {
                        NetworkError::NotFound(format!(
                            "network {} on server {}",
                            docker_network_name, server_id
                        ))
                    })?;
                self.mark_active(existing.id, docker_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<managed_networks::Model, NetworkError> {
        managed_networks::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| NetworkError::NotFound(format!("network {}", id)))
    }

    pub async fn find_by_uuid(
        &self,
        uuid: Uuid,
    ) -> Result<Option<managed_networks::Model>, NetworkError> {
        Ok(managed_networks::Entity::find()
            .filter(managed_networks::Column::Uuid.eq(uuid))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn find_by_engine_name(
        &self,
        server_id: i32,
        docker_network_name: &str,
    ) -> Result<Option<managed_networks::Model>, NetworkError> {
        Ok(managed_networks::Entity::find()
            .filter(managed_networks::Column::ServerId.eq(server_id))
            .filter(managed_networks::Column::DockerNetworkName.eq(docker_network_name))
            .one(self.db.as_ref())
            .await?)
    }

    /// Look up a network by its human name within a scope, e.g. a shared
    /// network a team already created on a server
    pub async fn find_by_scope_name(
        &self,
        server_id: i32,
        team_id: i32,
        scope: NetworkScope,
        name: &str,
    ) -> Result<Option<managed_networks::Model>, NetworkError> {
        Ok(managed_networks::Entity::find()
            .filter(managed_networks::Column::ServerId.eq(server_id))
            .filter(managed_networks::Column::TeamId.eq(team_id))
            .filter(managed_networks::Column::Scope.eq(scope))
            .filter(managed_networks::Column::Name.eq(name))
            .one(self.db.as_ref())
            .await?)
    }

    /// All networks, optionally restricted to one server
    pub async fn list_networks(
        &self,
        server_id: Option<i32>,
    ) -> Result<Vec<managed_networks::Model>, NetworkError> {
        let mut query = managed_networks::Entity::find();
        if let Some(server_id) = server_id {
            query = query.filter(managed_networks::Column::ServerId.eq(server_id));
        }
        Ok(query
            .order_by_asc(managed_networks::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn count_for_server(&self, server_id: i32) -> Result<u64, NetworkError> {
        Ok(managed_networks::Entity::find()
            .filter(managed_networks::Column::ServerId.eq(server_id))
            .count(self.db.as_ref())
            .await?)
    }

    pub async fn list_attachments(
        &self,
        resource: &ResourceRef,
    ) -> Result<Vec<resource_networks::Model>, NetworkError> {
        Ok(resource_networks::Entity::find()
            .filter(resource_networks::Column::ResourceType.eq(resource.kind))
            .filter(resource_networks::Column::ResourceId.eq(resource.id))
            .order_by_asc(resource_networks::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn attachments_for_network(
        &self,
        network_id: i32,
    ) -> Result<Vec<resource_networks::Model>, NetworkError> {
        Ok(resource_networks::Entity::find()
            .filter(resource_networks::Column::ManagedNetworkId.eq(network_id))
            .order_by_asc(resource_networks::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn find_attachment(
        &self,
        resource: &ResourceRef,
        network_id: i32,
    ) -> Result<Option<resource_networks::Model>, NetworkError> {
        Ok(resource_networks::Entity::find()
            .filter(resource_networks::Column::ResourceType.eq(resource.kind))
            .filter(resource_networks::Column::ResourceId.eq(resource.id))
            .filter(resource_networks::Column::ManagedNetworkId.eq(network_id))
            .one(self.db.as_ref())
            .await?)
    }

    /// Update-or-create the attachment of `resource` to `network_id`.
    ///
    /// An existing manual attachment stays manual even when a reconciliation
    /// pass connects it again.
    pub async fn upsert_attachment(
        &self,
        resource: &ResourceRef,
        network_id: i32,
        update: AttachmentUpdate,
    ) -> Result<resource_networks::Model, NetworkError> {
        let connected_at = update.is_connected.then(Utc::now);

        if let Some(existing) = self.find_attachment(resource, network_id).await? {
            return self.apply_attachment_update(existing, update).await;
        }

        let model = resource_networks::ActiveModel {
            resource_type: Set(resource.kind),
            resource_id: Set(resource.id),
            managed_network_id: Set(network_id),
            aliases: Set(json!(update.aliases)),
            ipv4_address: Set(update.ipv4_address.clone()),
            is_auto_attached: Set(update.is_auto_attached),
            is_connected: Set(update.is_connected),
            connected_at: Set(connected_at),
            ..Default::default()
        };

        match model.insert(self.db.as_ref()).await {
            Ok(model) => Ok(model),
            Err(e) if is_unique_violation(&e) => {
                let existing = self
                    .find_attachment(resource, network_id)
                    .await?
                    .ok_or_else(|| {
                        NetworkError::NotFound(format!(
                            "attachment of {} to network {}",
                            resource, network_id
                        ))
                    })?;
                self.apply_attachment_update(existing, update).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_attachment_update(
        &self,
        existing: resource_networks::Model,
        update: AttachmentUpdate,
    ) -> Result<resource_networks::Model, NetworkError> {
        let was_auto = existing.is_auto_attached;
        let was_connected = existing.is_connected;
        let mut active = existing.into_active_model();
        active.aliases = Set(json!(update.aliases));
        if update.ipv4_address.is_some() {
            active.ipv4_address = Set(update.ipv4_address);
        }
        active.is_auto_attached = Set(was_auto && update.is_auto_attached);
        active.is_connected = Set(update.is_connected);
        if update.is_connected && !was_connected {
            active.connected_at = Set(Some(Utc::now()));
        } else if !update.is_connected {
            active.connected_at = Set(None);
        }
        Ok(active.update(self.db.as_ref()).await?)
    }

    pub async fn remove_attachment(
        &self,
        resource: &ResourceRef,
        network_id: i32,
    ) -> Result<bool, NetworkError> {
        let result = resource_networks::Entity::delete_many()
            .filter(resource_networks::Column::ResourceType.eq(resource.kind))
            .filter(resource_networks::Column::ResourceId.eq(resource.id))
            .filter(resource_networks::Column::ManagedNetworkId.eq(network_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn remove_attachments_for_resource(
        &self,
        resource: &ResourceRef,
    ) -> Result<u64, NetworkError> {
        let result = resource_networks::Entity::delete_many()
            .filter(resource_networks::Column::ResourceType.eq(resource.kind))
            .filter(resource_networks::Column::ResourceId.eq(resource.id))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// The engine lost the network, so nothing is connected to it anymore
    pub async fn mark_network_disconnected(&self, network_id: i32) -> Result<u64, NetworkError> {
        let result = resource_networks::Entity::update_many()
            .filter(resource_networks::Column::ManagedNetworkId.eq(network_id))
            .filter(resource_networks::Column::IsConnected.eq(true))
            .col_expr(resource_networks::Column::IsConnected, Expr::value(false))
            .col_expr(
                resource_networks::Column::ConnectedAt,
                Expr::value(Option::<DBDateTime>::None),
            )
            .col_expr(resource_networks::Column::UpdatedAt, Expr::value(Utc::now()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// `pending|error|orphaned -> active` after a successful create-or-verify
    pub async fn mark_active(
        &self,
        id: i32,
        docker_id: &str,
    ) -> Result<managed_networks::Model, NetworkError> {
        let mut active = self.find_by_id(id).await?.into_active_model();
        active.docker_id = Set(Some(docker_id.to_string()));
        active.status = Set(NetworkStatus::Active);
        active.error_message = Set(None);
        active.last_synced_at = Set(Some(Utc::now()));
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Any engine failure while creating or using the network
    pub async fn mark_error(
        &self,
        id: i32,
        message: &str,
    ) -> Result<managed_networks::Model, NetworkError> {
        let mut active = self.find_by_id(id).await?.into_active_model();
        active.status = Set(NetworkStatus::Error);
        active.error_message = Set(Some(message.to_string()));
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Explicit delete: the engine object is gone, forget its id
    pub async fn reset_pending(&self, id: i32) -> Result<managed_networks::Model, NetworkError> {
        let mut active = self.find_by_id(id).await?.into_active_model();
        active.status = Set(NetworkStatus::Pending);
        active.docker_id = Set(None);
        Ok(active.update(self.db.as_ref()).await?)
    }

    pub async fn mark_orphaned(&self, id: i32) -> Result<managed_networks::Model, NetworkError> {
        let mut active = self.find_by_id(id).await?.into_active_model();
        active.status = Set(NetworkStatus::Orphaned);
        active.error_message = Set(Some("Network missing on engine and unused".to_string()));
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Engine confirmed the network again without any other change
    pub async fn touch_synced(
        &self,
        id: i32,
        docker_id: Option<&str>,
    ) -> Result<managed_networks::Model, NetworkError> {
        let mut active = self.find_by_id(id).await?.into_active_model();
        if let Some(docker_id) = docker_id {
            active.docker_id = Set(Some(docker_id.to_string()));
        }
        active.last_synced_at = Set(Some(Utc::now()));
        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Orphaned rows on a server last touched before `cutoff`
    pub async fn orphaned_before(
        &self,
        server_id: i32,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<Vec<managed_networks::Model>, NetworkError> {
        Ok(managed_networks::Entity::find()
            .filter(managed_networks::Column::ServerId.eq(server_id))
            .filter(managed_networks::Column::Status.eq(NetworkStatus::Orphaned))
            .filter(managed_networks::Column::UpdatedAt.lt(cutoff))
            .order_by_asc(managed_networks::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// Delete a row together with its attachment records
    pub async fn delete_network(&self, id: i32) -> Result<(), NetworkError> {
        let txn = self.db.begin().await?;
        resource_networks::Entity::delete_many()
            .filter(resource_networks::Column::ManagedNetworkId.eq(id))
            .exec(&txn)
            .await?;
        let result = managed_networks::Entity::delete_by_id(id).exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(NetworkError::NotFound(format!("network {}", id)));
        }
        txn.commit().await?;
        Ok(())
    }
}

fn is_unique_violation(error: &DbErr) -> bool {
    matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
