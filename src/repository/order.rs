use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// 订单状态机：pending → paid → completed；pending → cancelled
pub mod status {
    pub const PENDING: &str = "pending";
    pub const PAID: &str = "paid";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";
}

/// 订单行
#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderRow {
    pub id: String,
    pub order_no: String,
    pub user_id: String,
    pub status: String,
    pub total_cents: i64,
    pub remark: Option<String>,
    pub created_at: String,
    pub paid_at: Option<String>,
    pub completed_at: Option<String>,
}

/// 订单明细行（价格与名称为下单时快照）
#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRow {
    pub id: String,
    pub product_id: String,
    pub product_name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
}

/// 含明细的订单视图
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderRow,
    pub items: Vec<OrderItemRow>,
}

/// 下单请求中的一个条目
pub struct OrderLine<'a> {
    pub product_id: &'a str,
    pub quantity: i64,
}

/// 下单结果：业务失败走枚举而不是错误
pub enum PlaceOrderOutcome {
    Placed(OrderDetail),
    ProductUnavailable(String),
    InsufficientStock { product_id: String, available: i64 },
}

/// 状态流转结果
pub enum TransitionOutcome {
    Done(OrderRow),
    NotFound,
    InvalidState { current: String },
}

/// 生成订单号：ORD + UTC 时间戳 + 随机尾缀
fn generate_order_no() -> String {
    let tail: String = ulid::Ulid::new().to_string();
    format!(
        "ORD{}{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &tail[tail.len() - 6..]
    )
}

#[derive(Clone)]
pub struct OrderRepository {
    db: SqlitePool,
}

impl OrderRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// 下单：校验商品可售与库存、扣减库存、按当前单价锁定总额，
    /// 整体在一个事务内完成。
    pub async fn place(
        &self,
        user_id: &str,
        lines: &[OrderLine<'_>],
        remark: Option<&str>,
    ) -> Result<PlaceOrderOutcome> {
        let mut tx = self.db.begin().await?;

        struct Locked {
            product_id: String,
            product_name: String,
            unit_price_cents: i64,
            quantity: i64,
        }

        let mut locked: Vec<Locked> = Vec::with_capacity(lines.len());
        let mut total_cents: i64 = 0;

        for line in lines {
            let row: Option<(String, i64, i64, bool)> = sqlx::query_as(
                "SELECT name, price_cents, stock, is_active FROM products WHERE id = ?",
            )
            .bind(line.product_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((name, price_cents, stock, is_active)) = row else {
                return Ok(PlaceOrderOutcome::ProductUnavailable(
                    line.product_id.to_owned(),
                ));
            };
            if !is_active {
                return Ok(PlaceOrderOutcome::ProductUnavailable(
                    line.product_id.to_owned(),
                ));
            }
            if stock < line.quantity {
                return Ok(PlaceOrderOutcome::InsufficientStock {
                    product_id: line.product_id.to_owned(),
                    available: stock,
                });
            }

            sqlx::query("UPDATE products SET stock = stock - ? WHERE id = ?")
                .bind(line.quantity)
                .bind(line.product_id)
                .execute(&mut *tx)
                .await?;

            total_cents += price_cents * line.quantity;
            locked.push(Locked {
                product_id: line.product_id.to_owned(),
                product_name: name,
                unit_price_cents: price_cents,
                quantity: line.quantity,
            });
        }

        let order_id = ulid::Ulid::new().to_string();
        let order_no = generate_order_no();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO orders (id, order_no, user_id, status, total_cents, remark, created_at) \
             VALUES (?, ?, ?, 'pending', ?, ?, ?)",
        )
        .bind(&order_id)
        .bind(&order_no)
        .bind(user_id)
        .bind(total_cents)
        .bind(remark)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(locked.len());
        for l in locked {
            let item_id = ulid::Ulid::new().to_string();
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, product_name, unit_price_cents, quantity) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&item_id)
            .bind(&order_id)
            .bind(&l.product_id)
            .bind(&l.product_name)
            .bind(l.unit_price_cents)
            .bind(l.quantity)
            .execute(&mut *tx)
            .await?;
            items.push(OrderItemRow {
                id: item_id,
                product_id: l.product_id,
                product_name: l.product_name,
                unit_price_cents: l.unit_price_cents,
                quantity: l.quantity,
            });
        }

        tx.commit().await?;

        Ok(PlaceOrderOutcome::Placed(OrderDetail {
            order: OrderRow {
                id: order_id,
                order_no,
                user_id: user_id.to_owned(),
                status: status::PENDING.to_owned(),
                total_cents,
                remark: remark.map(str::to_owned),
                created_at: now,
                paid_at: None,
                completed_at: None,
            },
            items,
        }))
    }

    async fn fetch(&self, id: &str) -> Result<Option<OrderRow>> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT id, order_no, user_id, status, total_cents, remark, created_at, paid_at, completed_at \
             FROM orders WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn items_of(&self, order_id: &str) -> Result<Vec<OrderItemRow>> {
        let items = sqlx::query_as::<_, OrderItemRow>(
            "SELECT id, product_id, product_name, unit_price_cents, quantity \
             FROM order_items WHERE order_id = ? ORDER BY id ASC",
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;
        Ok(items)
    }

    /// 用户自己的订单，最新优先
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<OrderRow>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT id, order_no, user_id, status, total_cents, remark, created_at, paid_at, completed_at \
             FROM orders WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// 订单详情；非本人（且非管理员）不可见
    pub async fn get_detail(
        &self,
        id: &str,
        user_id: &str,
        is_admin: bool,
    ) -> Result<Option<OrderDetail>> {
        let Some(order) = self.fetch(id).await? else {
            return Ok(None);
        };
        if !is_admin && order.user_id != user_id {
            return Ok(None);
        }
        let items = self.items_of(id).await?;
        Ok(Some(OrderDetail { order, items }))
    }

    /// 后台全量订单（可按状态过滤），最新优先，分页
    pub async fn list_admin(
        &self,
        page: u32,
        page_size: u32,
        status: Option<&str>,
    ) -> Result<(Vec<OrderRow>, i64)> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM orders WHERE 1 = 1");
        if let Some(status) = status {
            count_qb.push(" AND status = ").push_bind(status);
        }
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.db).await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, order_no, user_id, status, total_cents, remark, created_at, paid_at, completed_at \
             FROM orders WHERE 1 = 1",
        );
        if let Some(status) = status {
            qb.push(" AND status = ").push_bind(status);
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind((page as i64 - 1) * page_size as i64);
        let rows = qb.build_query_as::<OrderRow>().fetch_all(&self.db).await?;
        Ok((rows, total))
    }

    /// 支付：仅 pending 可付，本人操作
    pub async fn pay(&self, id: &str, user_id: &str) -> Result<TransitionOutcome> {
        let Some(order) = self.fetch(id).await? else {
            return Ok(TransitionOutcome::NotFound);
        };
        if order.user_id != user_id {
            return Ok(TransitionOutcome::NotFound);
        }
        if order.status != status::PENDING {
            return Ok(TransitionOutcome::InvalidState {
                current: order.status,
            });
        }
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE orders SET status = 'paid', paid_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(TransitionOutcome::Done(OrderRow {
            status: status::PAID.to_owned(),
            paid_at: Some(now),
            ..order
        }))
    }

    /// 确认收货：仅 paid 可完成，本人操作
    pub async fn complete(&self, id: &str, user_id: &str) -> Result<TransitionOutcome> {
        let Some(order) = self.fetch(id).await? else {
            return Ok(TransitionOutcome::NotFound);
        };
        if order.user_id != user_id {
            return Ok(TransitionOutcome::NotFound);
        }
        if order.status != status::PAID {
            return Ok(TransitionOutcome::InvalidState {
                current: order.status,
            });
        }
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE orders SET status = 'completed', completed_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(TransitionOutcome::Done(OrderRow {
            status: status::COMPLETED.to_owned(),
            completed_at: Some(now),
            ..order
        }))
    }

    /// 取消：仅 pending 可取消，本人操作；事务内回补库存
    pub async fn cancel(&self, id: &str, user_id: &str) -> Result<TransitionOutcome> {
        let mut tx = self.db.begin().await?;

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT user_id, status FROM orders WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((owner, current)) = row else {
            return Ok(TransitionOutcome::NotFound);
        };
        if owner != user_id {
            return Ok(TransitionOutcome::NotFound);
        }
        if current != status::PENDING {
            return Ok(TransitionOutcome::InvalidState { current });
        }

        // 同一商品可能出现在多个条目，回补必须按条目求和
        sqlx::query(
            "UPDATE products SET stock = stock + ( \
                 SELECT SUM(oi.quantity) FROM order_items oi \
                 WHERE oi.order_id = ? AND oi.product_id = products.id) \
             WHERE id IN (SELECT product_id FROM order_items WHERE order_id = ?)",
        )
        .bind(id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE orders SET status = 'cancelled' WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        match self.fetch(id).await? {
            Some(order) => Ok(TransitionOutcome::Done(order)),
            None => Ok(TransitionOutcome::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::test_pool;
    use crate::repository::{ProductRepository, ProductWriteParams};

    async fn seed_user(pool: &SqlitePool, id: &str) {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, created_at) VALUES (?, ?, 'x', ?)",
        )
        .bind(id)
        .bind(format!("用户{id}"))
        .bind("2026-01-01T00:00:00+00:00")
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_product(pool: &SqlitePool, price_cents: i64, stock: i64) -> String {
        ProductRepository::new(pool.clone())
            .create(&ProductWriteParams {
                name: "商品",
                description: None,
                price_cents,
                stock,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn place_locks_total_and_decrements_stock() {
        let pool = test_pool().await;
        let repo = OrderRepository::new(pool.clone());
        seed_user(&pool, "u1").await;
        let product_id = seed_product(&pool, 2500, 10).await;

        let outcome = repo
            .place(
                "u1",
                &[OrderLine {
                    product_id: &product_id,
                    quantity: 3,
                }],
                Some("加急"),
            )
            .await
            .unwrap();
        let PlaceOrderOutcome::Placed(detail) = outcome else {
            panic!("下单应成功");
        };
        assert_eq!(detail.order.total_cents, 7500);
        assert_eq!(detail.order.status, status::PENDING);
        assert!(detail.order.order_no.starts_with("ORD"));
        assert_eq!(detail.items[0].unit_price_cents, 2500);

        let stock: i64 = sqlx::query_scalar("SELECT stock FROM products WHERE id = ?")
            .bind(&product_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stock, 7);

        // 后续改价不影响已下订单总额
        sqlx::query("UPDATE products SET price_cents = 9999 WHERE id = ?")
            .bind(&product_id)
            .execute(&pool)
            .await
            .unwrap();
        let fetched = repo
            .get_detail(&detail.order.id, "u1", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.order.total_cents, 7500);
        assert_eq!(fetched.items[0].unit_price_cents, 2500);
    }

    #[tokio::test]
    async fn insufficient_stock_rejects_whole_order() {
        let pool = test_pool().await;
        let repo = OrderRepository::new(pool.clone());
        seed_user(&pool, "u1").await;
        let plenty = seed_product(&pool, 100, 10).await;
        let scarce = seed_product(&pool, 100, 1).await;

        let outcome = repo
            .place(
                "u1",
                &[
                    OrderLine {
                        product_id: &plenty,
                        quantity: 2,
                    },
                    OrderLine {
                        product_id: &scarce,
                        quantity: 5,
                    },
                ],
                None,
            )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            PlaceOrderOutcome::InsufficientStock { available: 1, .. }
        ));

        // 事务回滚，先扣的库存也要还原
        let stock: i64 = sqlx::query_scalar("SELECT stock FROM products WHERE id = ?")
            .bind(&plenty)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stock, 10);
        assert!(repo.list_for_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inactive_product_is_unavailable() {
        let pool = test_pool().await;
        let repo = OrderRepository::new(pool.clone());
        seed_user(&pool, "u1").await;
        let product_id = seed_product(&pool, 100, 10).await;
        ProductRepository::new(pool.clone())
            .set_active(&product_id, false)
            .await
            .unwrap();

        let outcome = repo
            .place(
                "u1",
                &[OrderLine {
                    product_id: &product_id,
                    quantity: 1,
                }],
                None,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, PlaceOrderOutcome::ProductUnavailable(_)));
    }

    #[tokio::test]
    async fn status_machine_enforces_transitions() {
        let pool = test_pool().await;
        let repo = OrderRepository::new(pool.clone());
        seed_user(&pool, "u1").await;
        let product_id = seed_product(&pool, 100, 10).await;

        let PlaceOrderOutcome::Placed(detail) = repo
            .place(
                "u1",
                &[OrderLine {
                    product_id: &product_id,
                    quantity: 1,
                }],
                None,
            )
            .await
            .unwrap()
        else {
            panic!("下单应成功");
        };
        let order_id = detail.order.id;

        // pending 不可直接完成
        assert!(matches!(
            repo.complete(&order_id, "u1").await.unwrap(),
            TransitionOutcome::InvalidState { .. }
        ));

        let TransitionOutcome::Done(paid) = repo.pay(&order_id, "u1").await.unwrap() else {
            panic!("支付应成功");
        };
        assert_eq!(paid.status, status::PAID);
        assert!(paid.paid_at.is_some());

        // 已支付不可取消、不可重复支付
        assert!(matches!(
            repo.cancel(&order_id, "u1").await.unwrap(),
            TransitionOutcome::InvalidState { .. }
        ));
        assert!(matches!(
            repo.pay(&order_id, "u1").await.unwrap(),
            TransitionOutcome::InvalidState { .. }
        ));

        let TransitionOutcome::Done(done) = repo.complete(&order_id, "u1").await.unwrap() else {
            panic!("完成应成功");
        };
        assert_eq!(done.status, status::COMPLETED);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_restores_stock() {
        let pool = test_pool().await;
        let repo = OrderRepository::new(pool.clone());
        seed_user(&pool, "u1").await;
        let product_id = seed_product(&pool, 100, 10).await;

        let PlaceOrderOutcome::Placed(detail) = repo
            .place(
                "u1",
                &[OrderLine {
                    product_id: &product_id,
                    quantity: 4,
                }],
                None,
            )
            .await
            .unwrap()
        else {
            panic!("下单应成功");
        };

        let TransitionOutcome::Done(cancelled) =
            repo.cancel(&detail.order.id, "u1").await.unwrap()
        else {
            panic!("取消应成功");
        };
        assert_eq!(cancelled.status, status::CANCELLED);

        let stock: i64 = sqlx::query_scalar("SELECT stock FROM products WHERE id = ?")
            .bind(&product_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stock, 10);
    }

    #[tokio::test]
    async fn cancel_restores_stock_across_repeated_product_lines() {
        let pool = test_pool().await;
        let repo = OrderRepository::new(pool.clone());
        seed_user(&pool, "u1").await;
        let product_id = seed_product(&pool, 100, 10).await;

        // 同一商品拆成两个条目下单
        let PlaceOrderOutcome::Placed(detail) = repo
            .place(
                "u1",
                &[
                    OrderLine {
                        product_id: &product_id,
                        quantity: 3,
                    },
                    OrderLine {
                        product_id: &product_id,
                        quantity: 4,
                    },
                ],
                None,
            )
            .await
            .unwrap()
        else {
            panic!("下单应成功");
        };
        assert_eq!(detail.order.total_cents, 700);

        let stock: i64 = sqlx::query_scalar("SELECT stock FROM products WHERE id = ?")
            .bind(&product_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stock, 3);

        let TransitionOutcome::Done(_) = repo.cancel(&detail.order.id, "u1").await.unwrap()
        else {
            panic!("取消应成功");
        };

        let stock: i64 = sqlx::query_scalar("SELECT stock FROM products WHERE id = ?")
            .bind(&product_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stock, 10);
    }

    #[tokio::test]
    async fn orders_are_invisible_to_other_users() {
        let pool = test_pool().await;
        let repo = OrderRepository::new(pool.clone());
        seed_user(&pool, "u1").await;
        seed_user(&pool, "u2").await;
        let product_id = seed_product(&pool, 100, 10).await;

        let PlaceOrderOutcome::Placed(detail) = repo
            .place(
                "u1",
                &[OrderLine {
                    product_id: &product_id,
                    quantity: 1,
                }],
                None,
            )
            .await
            .unwrap()
        else {
            panic!("下单应成功");
        };

        assert!(repo
            .get_detail(&detail.order.id, "u2", false)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            repo.pay(&detail.order.id, "u2").await.unwrap(),
            TransitionOutcome::NotFound
        ));
        // 管理员可见
        assert!(repo
            .get_detail(&detail.order.id, "u2", true)
            .await
            .unwrap()
            .is_some());
    }
}
