use sea_orm::{DbBackend, Schema};
use sea_orm_migration::prelude::*;

use crate::entities::{order, product, user};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20240601_000001_create_storefront_tables::Migration)]
    }
}

mod m20240601_000001_create_storefront_tables {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_storefront_tables"
        }
    }

    fn schema(manager: &SchemaManager) -> Schema {
        let backend: DbBackend = manager.get_database_backend();
        Schema::new(backend)
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let schema = schema(manager);

            manager
                .create_table(
                    schema
                        .create_table_from_entity(order::Entity)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
            manager
                .create_table(
                    schema
                        .create_table_from_entity(product::Entity)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;
            manager
                .create_table(
                    schema
                        .create_table_from_entity(user::Entity)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_owner_id")
                        .table(order::Entity)
                        .col(order::Column::OwnerId)
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(order::Entity)
                        .col(order::Column::CreatedAt)
                        .to_owned(),
                )
                .await?;
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_users_phone_key")
                        .table(user::Entity)
                        .col(user::Column::PhoneKey)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(user::Entity).if_exists().to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(product::Entity).if_exists().to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(order::Entity).if_exists().to_owned())
                .await
        }
    }
}
