use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

use repository_unit_of_work::postgres::{PgAdapter, PgFacade};
use repository_unit_of_work::{Bound, Coordinator, RollbackHook, TransactionResult};

use super::fixtures::{Order, User};

/// User repository running every query through its coordinator
pub struct UserRepository<C> {
    coordinator: C,
}

impl<C: Coordinator<Adapter = PgAdapter>> UserRepository<C> {
    pub fn new(coordinator: C) -> Self {
        Self { coordinator }
    }

    /// The same repository, pinned to `facade`.
    pub fn bind(&self, facade: PgFacade) -> TransactionResult<UserRepository<Bound<PgAdapter>>> {
        Ok(UserRepository::new(self.coordinator.bind(facade)?))
    }

    pub async fn create(&self, user: &User) -> TransactionResult<()> {
        let user = user.clone();
        self.coordinator
            .run_in_facade(|facade| async move {
                let mut conn = facade.acquire().await?;
                sqlx::query("INSERT INTO users (id, username, email) VALUES ($1, $2, $3)")
                    .bind(user.id)
                    .bind(&user.username)
                    .bind(&user.email)
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> TransactionResult<Option<User>> {
        self.coordinator
            .run_in_facade(|facade| async move {
                let mut conn = facade.acquire().await?;
                let row = sqlx::query("SELECT id, username, email FROM users WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;

                Ok(row.map(|r| User {
                    id: r.get("id"),
                    username: r.get("username"),
                    email: r.get("email"),
                }))
            })
            .await
    }

    pub async fn count(&self) -> TransactionResult<i64> {
        self.coordinator
            .run_in_facade(|facade| async move {
                let mut conn = facade.acquire().await?;
                let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(row.get("count"))
            })
            .await
    }
}

/// Order repository running every query through its coordinator
pub struct OrderRepository<C> {
    coordinator: C,
}

impl<C: Coordinator<Adapter = PgAdapter>> OrderRepository<C> {
    pub fn new(coordinator: C) -> Self {
        Self { coordinator }
    }

    pub fn bind(&self, facade: PgFacade) -> TransactionResult<OrderRepository<Bound<PgAdapter>>> {
        Ok(OrderRepository::new(self.coordinator.bind(facade)?))
    }

    pub async fn create(&self, order: &Order) -> TransactionResult<()> {
        let order = order.clone();
        self.coordinator
            .run_in_facade(|facade| async move {
                let mut conn = facade.acquire().await?;
                sqlx::query(
                    "INSERT INTO orders (id, user_id, product_name, amount) VALUES ($1, $2, $3, $4)",
                )
                .bind(order.id)
                .bind(order.user_id)
                .bind(&order.product_name)
                .bind(order.amount)
                .execute(&mut *conn)
                .await?;
                Ok(())
            })
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> TransactionResult<Option<Order>> {
        self.coordinator
            .run_in_facade(|facade| async move {
                let mut conn = facade.acquire().await?;
                let row = sqlx::query(
                    "SELECT id, user_id, product_name, amount FROM orders WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

                Ok(row.map(|r| Order {
                    id: r.get("id"),
                    user_id: r.get("user_id"),
                    product_name: r.get("product_name"),
                    amount: r.get("amount"),
                }))
            })
            .await
    }
}

/// Rollback hook counting how often it was notified.
#[derive(Clone, Default)]
pub struct RollbackTracker {
    calls: Arc<RwLock<usize>>,
}

impl RollbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        *self.calls.read()
    }
}

#[async_trait]
impl<F: Sync + 'static> RollbackHook<F> for RollbackTracker {
    async fn on_rollback(&self, _transaction: &F) -> TransactionResult<()> {
        *self.calls.write() += 1;
        Ok(())
    }
}
