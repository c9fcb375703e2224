use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub sku: String,
    pub price: Option<f64>,
    pub specifications: serde_json::Value,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product fields as supplied by an upload, before the store assigns identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub sku: String,
    pub price: Option<f64>,
    pub specifications: serde_json::Value,
    pub image_url: Option<String>,
}
