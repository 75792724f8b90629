use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "swap_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub operation_id: String,
    /// `ONE_TO_ONE` or `ABSORB`.
    pub swap_type: String,
    /// `EXECUTED` or `ROLLED_BACK`.
    pub status: String,
    pub source_person_id: Uuid,
    pub source_week: chrono::NaiveDate,
    pub target_person_id: Uuid,
    pub target_week: Option<chrono::NaiveDate>,
    pub source_assignment_id: Uuid,
    pub target_assignment_id: Option<Uuid>,
    pub requested_by: Uuid,
    pub reason: Option<String>,
    pub executed_at: chrono::DateTime<chrono::Utc>,
    pub rolled_back_at: Option<chrono::DateTime<chrono::Utc>>,
    pub rolled_back_by: Option<Uuid>,
    pub rollback_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
