use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use temps_core::DBDateTime;

use crate::types::ResourceKind;

/// Attachment of one resource to one managed network.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "resource_networks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub resource_type: ResourceKind,
    pub resource_id: i32,
    pub managed_network_id: i32,
    /// DNS aliases used for the attachment (JSON array of strings)
    pub aliases: Json,
    pub ipv4_address: Option<String>,
    pub is_auto_attached: bool,
    pub is_connected: bool,
    pub connected_at: Option<DBDateTime>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::managed_networks::Entity",
        from = "Column::ManagedNetworkId",
        to = "super::managed_networks::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    ManagedNetwork,
}

impl Related<super::managed_networks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ManagedNetwork.def()
    }
}

impl Model {
    pub fn alias_list(&self) -> Vec<String> {
        self.aliases
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
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
