use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use temps_core::DBDateTime;

use crate::types::{NetworkDriver, NetworkScope, NetworkStatus};

/// One logical container network on one server.
///
/// (`docker_network_name`, `server_id`) is unique. `docker_id` stays `None`
/// until the engine object has been created or verified at least once.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "managed_networks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub uuid: Uuid,
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
    pub options: Json,
    pub labels: Json,
    pub docker_id: Option<String>,
    pub status: NetworkStatus,
    pub last_synced_at: Option<DBDateTime>,
    pub error_message: Option<String>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::resource_networks::Entity")]
    ResourceNetworks,
}

impl Related<super::resource_networks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ResourceNetworks.def()
    }
}

impl Model {
    pub fn is_active(&self) -> bool {
        self.status == NetworkStatus::Active
    }

    /// Driver options as string pairs; non-string values are ignored.
    pub fn option_pairs(&self) -> Vec<(String, String)> {
        json_string_pairs(&self.options)
    }

    /// Extra engine labels as string pairs; non-string values are ignored.
    pub fn label_pairs(&self) -> Vec<(String, String)> {
        json_string_pairs(&self.labels)
    }
}

fn json_string_pairs(value: &Json) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();
    pairs.sort();
    pairs
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}
