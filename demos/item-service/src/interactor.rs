use std::sync::Arc;

use sqlsplit::{Context, DbError};

use crate::repository::{Item, ItemRepository};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

pub struct ItemInteractor {
    repository: Arc<dyn ItemRepository>,
}

impl ItemInteractor {
    pub fn new(repository: Arc<dyn ItemRepository>) -> Self {
        Self { repository }
    }

    pub async fn list(&self, ctx: &Context) -> Result<Vec<Item>, ServiceError> {
        Ok(self.repository.find_all(ctx).await?)
    }

    pub async fn get(&self, ctx: &Context, id: &str) -> Result<Item, ServiceError> {
        self.repository
            .find_by_id(ctx, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    pub async fn create(&self, ctx: &Context, name: &str) -> Result<Item, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("name must not be empty".to_string()));
        }

        let item = Item {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        let created = self.repository.create(ctx, item).await?;
        tracing::info!(item.id = %created.id, "Item created");
        Ok(created)
    }
}
