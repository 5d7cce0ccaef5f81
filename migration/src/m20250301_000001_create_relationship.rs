use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Relationship tuples. Uniqueness is the full 5-tuple, so the
        // composite primary key doubles as the conflict target for
        // idempotent bulk inserts.
        manager
            .create_table(
                Table::create()
                    .table(Relationship::Table)
                    .if_not_exists()
                    .col(string(Relationship::ResourceId))
                    .col(string(Relationship::ResourceType))
                    .col(string(Relationship::SubjectId))
                    .col(string(Relationship::SubjectType))
                    .col(string(Relationship::Relation))
                    .primary_key(
                        Index::create()
                            .col(Relationship::ResourceId)
                            .col(Relationship::ResourceType)
                            .col(Relationship::SubjectId)
                            .col(Relationship::SubjectType)
                            .col(Relationship::Relation),
                    )
                    .to_owned(),
            )
            .await?;

        // Traversal seeds and joins look nodes up by either end.
        manager
            .create_index(
                Index::create()
                    .name("idx_relationship_resource")
                    .table(Relationship::Table)
                    .col(Relationship::ResourceType)
                    .col(Relationship::ResourceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_relationship_subject")
                    .table(Relationship::Table)
                    .col(Relationship::SubjectType)
                    .col(Relationship::SubjectId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Relationship::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Relationship {
    Table,
    ResourceId,
    ResourceType,
    SubjectId,
    SubjectType,
    Relation,
}
