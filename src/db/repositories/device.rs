use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    sea_query::OnConflict,
};

use crate::entities::{device_group_members, device_groups, devices, prelude::*};
use crate::error::StoreError;
use crate::policy::{Device, DeviceGroup};

type Result<T> = std::result::Result<T, StoreError>;

impl From<devices::Model> for Device {
    fn from(model: devices::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            address: model.address,
            secret: model.secret,
            description: model.description,
            enabled: model.enabled,
        }
    }
}

impl From<device_groups::Model> for DeviceGroup {
    fn from(model: device_groups::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            secret: model.secret,
            description: model.description,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceInput<'a> {
    pub name: &'a str,
    pub address: &'a str,
    pub secret: &'a str,
    pub description: Option<&'a str>,
    pub enabled: bool,
}

pub struct DeviceRepository {
    conn: DatabaseConnection,
}

impl DeviceRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    async fn find_model(&self, name: &str) -> Result<Option<devices::Model>> {
        Ok(Devices::find()
            .filter(devices::Column::NormalizedName.eq(name.to_lowercase()))
            .one(&self.conn)
            .await?)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Device>> {
        Ok(self.find_model(name).await?.map(Device::from))
    }

    pub async fn get_by_address(&self, address: &str) -> Result<Option<Device>> {
        let device = Devices::find()
            .filter(devices::Column::Address.eq(address))
            .one(&self.conn)
            .await?;
        Ok(device.map(Device::from))
    }

    pub async fn list(&self) -> Result<Vec<Device>> {
        let devices = Devices::find()
            .order_by_asc(devices::Column::NormalizedName)
            .all(&self.conn)
            .await?;
        Ok(devices.into_iter().map(Device::from).collect())
    }

    pub async fn put(&self, input: DeviceInput<'_>) -> Result<Device> {
        let now = chrono::Utc::now().to_rfc3339();

        let model = match self.find_model(input.name).await? {
            Some(existing) => {
                let mut active: devices::ActiveModel = existing.into();
                active.address = Set(input.address.to_string());
                active.secret = Set(input.secret.to_string());
                active.description = Set(input.description.map(str::to_string));
                active.enabled = Set(input.enabled);
                active.updated_at = Set(now);
                active.update(&self.conn).await?
            }
            None => {
                devices::ActiveModel {
                    name: Set(input.name.to_string()),
                    normalized_name: Set(input.name.to_lowercase()),
                    address: Set(input.address.to_string()),
                    secret: Set(input.secret.to_string()),
                    description: Set(input.description.map(str::to_string)),
                    enabled: Set(input.enabled),
                    created_at: Set(now.clone()),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&self.conn)
                .await?
            }
        };

        Ok(model.into())
    }

    /// Authentication history keeps its rows with the device reference cleared.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let model = self
            .find_model(name)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("device '{name}'")))?;
        Devices::delete_by_id(model.id).exec(&self.conn).await?;
        Ok(())
    }
}

pub struct DeviceGroupRepository {
    conn: DatabaseConnection,
}

impl DeviceGroupRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    async fn find_model(&self, name: &str) -> Result<Option<device_groups::Model>> {
        Ok(DeviceGroups::find()
            .filter(device_groups::Column::NormalizedName.eq(name.to_lowercase()))
            .one(&self.conn)
            .await?)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<DeviceGroup>> {
        Ok(self.find_model(name).await?.map(DeviceGroup::from))
    }

    pub async fn list(&self) -> Result<Vec<DeviceGroup>> {
        let groups = DeviceGroups::find()
            .order_by_asc(device_groups::Column::NormalizedName)
            .all(&self.conn)
            .await?;
        Ok(groups.into_iter().map(DeviceGroup::from).collect())
    }

    pub async fn put(
        &self,
        name: &str,
        secret: Option<&str>,
        description: Option<&str>,
    ) -> Result<DeviceGroup> {
        let now = chrono::Utc::now().to_rfc3339();

        let model = match self.find_model(name).await? {
            Some(existing) => {
                let mut active: device_groups::ActiveModel = existing.into();
                active.secret = Set(secret.map(str::to_string));
                active.description = Set(description.map(str::to_string));
                active.updated_at = Set(now);
                active.update(&self.conn).await?
            }
            None => {
                device_groups::ActiveModel {
                    name: Set(name.to_string()),
                    normalized_name: Set(name.to_lowercase()),
                    secret: Set(secret.map(str::to_string)),
                    description: Set(description.map(str::to_string)),
                    created_at: Set(now.clone()),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&self.conn)
                .await?
            }
        };

        Ok(model.into())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let model = self
            .find_model(name)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("device group '{name}'")))?;
        DeviceGroups::delete_by_id(model.id)
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn add_device(&self, device_id: i32, group_id: i32) -> Result<()> {
        DeviceGroupMembers::insert(device_group_members::ActiveModel {
            device_id: Set(device_id),
            group_id: Set(group_id),
        })
        .on_conflict(
            OnConflict::columns([
                device_group_members::Column::DeviceId,
                device_group_members::Column::GroupId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(&self.conn)
        .await?;
        Ok(())
    }

    pub async fn remove_device(&self, device_id: i32, group_id: i32) -> Result<bool> {
        let result = DeviceGroupMembers::delete_many()
            .filter(device_group_members::Column::DeviceId.eq(device_id))
            .filter(device_group_members::Column::GroupId.eq(group_id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Member device names, sorted.
    pub async fn members(&self, group_id: i32) -> Result<Vec<String>> {
        let rows = DeviceGroupMembers::find()
            .filter(device_group_members::Column::GroupId.eq(group_id))
            .find_also_related(Devices)
            .all(&self.conn)
            .await?;

        let mut names: Vec<String> = rows
            .into_iter()
            .filter_map(|(_, device)| device.map(|d| d.name))
            .collect();
        names.sort();
        Ok(names)
    }
}
