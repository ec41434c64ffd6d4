use crate::database::entities::{ClientOrganization, client_organizations};
use crate::database::{DatabaseError, DatabaseResult};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use secrecy::{ExposeSecret, SecretString};

/// Input for provisioning a client organization
#[derive(Debug, Clone)]
pub struct NewClientOrganization {
    pub id: String,
    pub name: String,
    pub api_key: SecretString,
    pub markup_rate: String,
    pub monthly_limit_nanos: Option<i64>,
}

#[derive(Clone)]
pub struct ClientOrganizationsDao {
    db: DatabaseConnection,
}

impl ClientOrganizationsDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, client: NewClientOrganization) -> DatabaseResult<ClientOrganization> {
        let now = Utc::now();
        let model = client_organizations::ActiveModel {
            id: Set(client.id),
            name: Set(client.name),
            api_key_hash: Set(client_organizations::hash_api_key(
                client.api_key.expose_secret(),
            )),
            markup_rate: Set(client.markup_rate),
            monthly_limit_nanos: Set(client.monthly_limit_nanos),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(model.insert(&self.db).await?)
    }

    pub async fn find_by_id(&self, id: &str) -> DatabaseResult<Option<ClientOrganization>> {
        Ok(client_organizations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?)
    }

    pub async fn list(&self, active_only: bool) -> DatabaseResult<Vec<ClientOrganization>> {
        let mut select = client_organizations::Entity::find();
        if active_only {
            select = select.filter(client_organizations::Column::IsActive.eq(true));
        }
        Ok(select
            .order_by_asc(client_organizations::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn update_markup_rate(
        &self,
        id: &str,
        markup_rate: &str,
    ) -> DatabaseResult<ClientOrganization> {
        let mut model: client_organizations::ActiveModel = self.require(id).await?.into();
        model.markup_rate = Set(markup_rate.to_string());
        model.updated_at = Set(Utc::now());
        Ok(model.update(&self.db).await?)
    }

    pub async fn set_monthly_limit(
        &self,
        id: &str,
        monthly_limit_nanos: Option<i64>,
    ) -> DatabaseResult<ClientOrganization> {
        let mut model: client_organizations::ActiveModel = self.require(id).await?.into();
        model.monthly_limit_nanos = Set(monthly_limit_nanos);
        model.updated_at = Set(Utc::now());
        Ok(model.update(&self.db).await?)
    }

    /// Soft delete. Usage history keeps referencing the row.
    pub async fn deactivate(&self, id: &str) -> DatabaseResult<ClientOrganization> {
        let mut model: client_organizations::ActiveModel = self.require(id).await?.into();
        model.is_active = Set(false);
        model.updated_at = Set(Utc::now());
        Ok(model.update(&self.db).await?)
    }

    async fn require(&self, id: &str) -> DatabaseResult<ClientOrganization> {
        self.find_by_id(id).await?.ok_or(DatabaseError::NotFound)
    }
}
