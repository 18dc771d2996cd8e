use sea_orm::entity::prelude::*;

/// Singleton row; `password_enc` is AES-256-GCM ciphertext.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "email_config")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub host: String,
    pub port: i32,
    pub username: Option<String>,
    pub password_enc: Option<String>,
    pub use_tls: bool,
    pub from_address: String,
    pub from_name: Option<String>,
    pub brand_name: String,
    pub logo: Option<String>,
    pub base_template: Option<String>,
    pub footer_text: Option<String>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
