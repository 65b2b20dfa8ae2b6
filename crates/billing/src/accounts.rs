//! User and restaurant store
//!
//! A user optionally owns one restaurant; a subscription can only be
//! finalized once its user has a restaurant id, so linkage is performed
//! lazily but synchronously before any checkout link is issued.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub restaurant_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RestaurantRecord {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

pub struct AccountStore {
    pool: PgPool,
}

impl AccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn user_by_id(&self, id: Uuid) -> BillingResult<UserRecord> {
        let user: Option<UserRecord> = sqlx::query_as(
            "SELECT id, email, name, phone, stripe_customer_id, restaurant_id, created_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        user.ok_or_else(|| BillingError::NotFound(format!("user {}", id)))
    }

    pub async fn user_by_email(&self, email: &str) -> BillingResult<Option<UserRecord>> {
        let user: Option<UserRecord> = sqlx::query_as(
            "SELECT id, email, name, phone, stripe_customer_id, restaurant_id, created_at
             FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<UserRecord>> {
        let user: Option<UserRecord> = sqlx::query_as(
            "SELECT id, email, name, phone, stripe_customer_id, restaurant_id, created_at
             FROM users WHERE stripe_customer_id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn create_user(
        &self,
        email: &str,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> BillingResult<UserRecord> {
        let user: UserRecord = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, name, phone, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING id, email, name, phone, stripe_customer_id, restaurant_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(name)
        .bind(phone)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(user_id = %user.id, email = %email, "Created user");
        Ok(user)
    }

    pub async fn set_stripe_customer_id(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE users SET stripe_customer_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(customer_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Ensure the user is linked to a restaurant, creating one if needed.
    ///
    /// Resolution order: the user's existing link, then a restaurant the user
    /// already owns, then an existing restaurant matching by name, then a new
    /// row. The chosen restaurant is always written back onto the user.
    pub async fn ensure_restaurant(
        &self,
        user_id: Uuid,
        restaurant_name: &str,
    ) -> BillingResult<Uuid> {
        let user = self.user_by_id(user_id).await?;
        if let Some(restaurant_id) = user.restaurant_id {
            return Ok(restaurant_id);
        }

        let owned: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM restaurants WHERE owner_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let by_name: Option<(Uuid,)> = match owned {
            Some(_) => None,
            None => {
                sqlx::query_as(
                    "SELECT id FROM restaurants WHERE lower(name) = lower($1)
                     ORDER BY created_at DESC LIMIT 1",
                )
                .bind(restaurant_name)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        let restaurant_id = match owned.or(by_name) {
            Some((id,)) => id,
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO restaurants (id, name, owner_id, created_at)
                     VALUES ($1, $2, $3, NOW())",
                )
                .bind(id)
                .bind(restaurant_name)
                .bind(user_id)
                .execute(&self.pool)
                .await?;

                tracing::info!(
                    restaurant_id = %id,
                    user_id = %user_id,
                    name = %restaurant_name,
                    "Created restaurant"
                );
                id
            }
        };

        sqlx::query("UPDATE users SET restaurant_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(restaurant_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(restaurant_id)
    }

    /// All users attached to a restaurant, most recently created first.
    ///
    /// Used by the direct-subscription flow to scan payment-method candidates.
    pub async fn restaurant_users_by_recency(
        &self,
        restaurant_id: Uuid,
    ) -> BillingResult<Vec<UserRecord>> {
        let users: Vec<UserRecord> = sqlx::query_as(
            "SELECT id, email, name, phone, stripe_customer_id, restaurant_id, created_at
             FROM users WHERE restaurant_id = $1 ORDER BY created_at DESC",
        )
        .bind(restaurant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    pub async fn restaurant_by_id(&self, id: Uuid) -> BillingResult<RestaurantRecord> {
        let restaurant: Option<RestaurantRecord> = sqlx::query_as(
            "SELECT id, name, owner_id, created_at FROM restaurants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        restaurant.ok_or_else(|| BillingError::NotFound(format!("restaurant {}", id)))
    }
}
