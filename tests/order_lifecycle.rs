use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use axum_food_delivery_api::{
    clients::{CatalogClient, CatalogItem, Messenger, PaymentProcessor},
    db::create_pool,
    dto::{
        delivery::MarkDeliveredRequest,
        orders::{CreateOrderItem, CreateOrderRequest, UpdateStatusRequest},
        payments::{PaymentOutcome, PaymentWebhookRequest},
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, PaymentMethod, PaymentStatus},
    services::{delivery_service, order_service, payment_service},
    state::AppState,
    store, watcher,
};

// --- collaborator doubles ---

struct FakeCatalog {
    items: HashMap<Uuid, CatalogItem>,
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn get_item(&self, item_id: Uuid) -> anyhow::Result<CatalogItem> {
        self.items
            .get(&item_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown catalog item {item_id}"))
    }
}

struct FakePayments;

#[async_trait]
impl PaymentProcessor for FakePayments {
    async fn create_intent(
        &self,
        _order_id: Uuid,
        _amount: i64,
        _currency: &str,
    ) -> anyhow::Result<String> {
        Ok(format!("pi_{}", Uuid::new_v4().simple()))
    }
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, contact_address: &str, text: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((contact_address.to_string(), text.to_string()));
        Ok(())
    }
}

// --- harness ---

struct Harness {
    state: AppState,
    messenger: Arc<RecordingMessenger>,
    burger_id: Uuid,
    salad_id: Uuid,
    sold_out_id: Uuid,
}

/// Tests only touch orders they created themselves, so no table cleanup is
/// needed and the suite can run in parallel against a shared database.
async fn setup() -> anyhow::Result<Option<Harness>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run lifecycle tests."
            );
            return Ok(None);
        }
    };

    let pool = create_pool(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let burger_id = Uuid::new_v4();
    let salad_id = Uuid::new_v4();
    let sold_out_id = Uuid::new_v4();
    let mut items = HashMap::new();
    items.insert(
        burger_id,
        CatalogItem {
            id: burger_id,
            name: "Burger".into(),
            price: 500,
            available: true,
        },
    );
    items.insert(
        salad_id,
        CatalogItem {
            id: salad_id,
            name: "Salad".into(),
            price: 300,
            available: true,
        },
    );
    items.insert(
        sold_out_id,
        CatalogItem {
            id: sold_out_id,
            name: "Special".into(),
            price: 900,
            available: false,
        },
    );

    let messenger = Arc::new(RecordingMessenger::default());
    let state = AppState {
        pool,
        catalog: Arc::new(FakeCatalog { items }),
        payments: Arc::new(FakePayments),
        messenger: messenger.clone(),
    };

    Ok(Some(Harness {
        state,
        messenger,
        burger_id,
        salad_id,
        sold_out_id,
    }))
}

fn customer() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: "customer".into(),
        restaurant_id: None,
    }
}

fn restaurant(restaurant_id: Uuid) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: "restaurant".into(),
        restaurant_id: Some(restaurant_id),
    }
}

fn agent() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: "delivery".into(),
        restaurant_id: None,
    }
}

/// Two burgers and a salad plus a 50 fee: total 1350.
fn order_request(h: &Harness, method: PaymentMethod) -> CreateOrderRequest {
    CreateOrderRequest {
        restaurant_id: Uuid::new_v4(),
        items: vec![
            CreateOrderItem {
                catalog_item_id: h.burger_id,
                quantity: 2,
                note: Some("no onions".into()),
            },
            CreateOrderItem {
                catalog_item_id: h.salad_id,
                quantity: 1,
                note: None,
            },
        ],
        delivery_address: "12 Hill St".into(),
        contact_address: "+94771234567".into(),
        payment_method: method,
        delivery_fee: Some(50),
        notes: None,
        total_amount: None,
    }
}

async fn push_to_ready(h: &Harness, order_id: Uuid, restaurant_id: Uuid) -> anyhow::Result<()> {
    let rest = restaurant(restaurant_id);
    for status in [OrderStatus::Confirmed, OrderStatus::Preparing, OrderStatus::Ready] {
        order_service::update_status(
            &h.state,
            &rest,
            order_id,
            UpdateStatusRequest { status },
        )
        .await?;
    }
    Ok(())
}

// --- scenarios ---

#[tokio::test]
async fn card_payment_success_is_applied_exactly_once() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Card))
        .await?
        .data
        .unwrap();
    assert_eq!(created.order.total_amount, 1350);
    assert_eq!(created.order.status, OrderStatus::Pending);
    assert_eq!(created.order.payment_status, PaymentStatus::Pending);
    let reference = created.payment_reference.expect("card order gets a reference");

    let webhook = || PaymentWebhookRequest {
        order_id: created.order.id,
        payment_reference: reference.clone(),
        outcome: PaymentOutcome::Succeeded,
        amount: 1350,
        currency: None,
    };

    let first = payment_service::apply_payment_outcome(&h.state, webhook())
        .await?
        .data
        .unwrap();
    assert!(first.applied);
    assert_eq!(first.order.payment_status, PaymentStatus::Paid);
    // First successful capture implicitly confirms a still-pending order.
    assert_eq!(first.order.status, OrderStatus::Confirmed);

    // Webhook redelivery: acknowledged, nothing re-applied.
    let replay = payment_service::apply_payment_outcome(&h.state, webhook())
        .await?
        .data
        .unwrap();
    assert!(!replay.applied);
    assert_eq!(replay.order.payment_status, PaymentStatus::Paid);

    let records = store::fetch_payment_records(&h.state.pool, created.order.id).await?;
    assert_eq!(records.len(), 1, "exactly one ledger entry after a replay");
    assert_eq!(records[0].amount, 1350);
    Ok(())
}

#[tokio::test]
async fn amount_mismatch_is_rejected_without_marking_paid() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Card))
        .await?
        .data
        .unwrap();
    let reference = created.payment_reference.unwrap();

    let result = payment_service::apply_payment_outcome(
        &h.state,
        PaymentWebhookRequest {
            order_id: created.order.id,
            payment_reference: reference,
            outcome: PaymentOutcome::Succeeded,
            amount: 900,
            currency: None,
        },
    )
    .await;

    assert!(matches!(
        result,
        Err(AppError::AmountMismatch {
            expected: 1350,
            received: 900
        })
    ));

    let order = store::fetch_order(&h.state.pool, created.order.id).await?.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    let records = store::fetch_payment_records(&h.state.pool, created.order.id).await?;
    assert!(records.is_empty(), "mismatch must not reach the ledger");
    Ok(())
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Cash))
        .await?
        .data
        .unwrap();
    push_to_ready(&h, created.order.id, created.order.restaurant_id).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let state = h.state.clone();
        let order_id = created.order.id;
        handles.push(tokio::spawn(async move {
            delivery_service::claim(&state, &agent(), order_id).await
        }));
    }

    let mut winners = 0;
    let mut losers = 0;
    for handle in handles {
        match handle.await? {
            Ok(resp) => {
                winners += 1;
                let order = resp.data.unwrap();
                assert_eq!(order.status, OrderStatus::PickedUp);
                assert!(order.delivery_agent_id.is_some());
            }
            Err(AppError::AlreadyClaimed) | Err(AppError::NotReady) => losers += 1,
            Err(other) => panic!("unexpected claim failure: {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(losers, 7);

    // A later claim attempt sees the assignment, not a race.
    let late = delivery_service::claim(&h.state, &agent(), created.order.id).await;
    assert!(matches!(late, Err(AppError::AlreadyClaimed)));
    Ok(())
}

#[tokio::test]
async fn cash_delivery_settles_payment_and_writes_one_report() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();
    let courier = agent();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Cash))
        .await?
        .data
        .unwrap();
    push_to_ready(&h, created.order.id, created.order.restaurant_id).await?;

    delivery_service::claim(&h.state, &courier, created.order.id).await?;

    // Only the assigned agent may complete the delivery.
    let imposter = delivery_service::mark_delivered(
        &h.state,
        &agent(),
        created.order.id,
        MarkDeliveredRequest::default(),
    )
    .await;
    assert!(matches!(imposter, Err(AppError::NotAssigned)));

    let completed = delivery_service::mark_delivered(
        &h.state,
        &courier,
        created.order.id,
        MarkDeliveredRequest {
            notes: Some("left at the door".into()),
        },
    )
    .await?
    .data
    .unwrap();

    assert_eq!(completed.order.status, OrderStatus::Delivered);
    assert_eq!(completed.order.payment_status, PaymentStatus::Paid);
    assert_eq!(completed.report.delivery_agent_id, courier.user_id);

    let report = store::fetch_delivery_report(&h.state.pool, created.order.id).await?;
    assert!(report.is_some(), "delivered order has its report");

    let records = store::fetch_payment_records(&h.state.pool, created.order.id).await?;
    assert_eq!(records.len(), 1, "cash settlement recorded once");
    assert_eq!(records[0].amount, 1350);

    // Confirming again replays the committed result and cannot
    // double-settle.
    let again = delivery_service::mark_delivered(
        &h.state,
        &courier,
        created.order.id,
        MarkDeliveredRequest::default(),
    )
    .await?
    .data
    .unwrap();
    assert_eq!(again.report.id, completed.report.id);
    let records = store::fetch_payment_records(&h.state.pool, created.order.id).await?;
    assert_eq!(records.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_payment_cancels_a_pending_order() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Card))
        .await?
        .data
        .unwrap();
    let reference = created.payment_reference.unwrap();

    let applied = payment_service::apply_payment_outcome(
        &h.state,
        PaymentWebhookRequest {
            order_id: created.order.id,
            payment_reference: reference,
            outcome: PaymentOutcome::Failed,
            amount: 1350,
            currency: None,
        },
    )
    .await?
    .data
    .unwrap();

    assert_eq!(applied.order.payment_status, PaymentStatus::Failed);
    assert_eq!(applied.order.status, OrderStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn creation_rejects_bad_totals_and_unavailable_items() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();

    let mut request = order_request(&h, PaymentMethod::Cash);
    request.total_amount = Some(999);
    let result = order_service::create_order(&h.state, &user, request).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    let mut request = order_request(&h, PaymentMethod::Cash);
    request.items.push(CreateOrderItem {
        catalog_item_id: h.sold_out_id,
        quantity: 1,
        note: None,
    });
    let result = order_service::create_order(&h.state, &user, request).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    // A correct client-supplied total passes.
    let mut request = order_request(&h, PaymentMethod::Cash);
    request.total_amount = Some(1350);
    let created = order_service::create_order(&h.state, &user, request).await?;
    assert_eq!(created.data.unwrap().order.total_amount, 1350);
    Ok(())
}

#[tokio::test]
async fn status_cannot_skip_ahead_or_cancel_late() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Cash))
        .await?
        .data
        .unwrap();
    let rest = restaurant(created.order.restaurant_id);

    // pending -> ready skips confirmed and preparing.
    let skip = order_service::update_status(
        &h.state,
        &rest,
        created.order.id,
        UpdateStatusRequest {
            status: OrderStatus::Ready,
        },
    )
    .await;
    assert!(matches!(
        skip,
        Err(AppError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Ready
        })
    ));

    push_to_ready(&h, created.order.id, created.order.restaurant_id).await?;

    // Preparation started long ago; cancellation is closed.
    let cancel = order_service::cancel_order(&h.state, &user, created.order.id).await;
    assert!(matches!(cancel, Err(AppError::InvalidTransition { .. })));

    let order = store::fetch_order(&h.state.pool, created.order.id).await?.unwrap();
    assert_eq!(order.status, OrderStatus::Ready);
    Ok(())
}

#[tokio::test]
async fn notification_dedupe_fires_once_per_status() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Cash))
        .await?
        .data
        .unwrap();

    let first = store::log_notification(
        &h.state.pool,
        created.order.id,
        OrderStatus::Pending,
        "Your order has been received.",
    )
    .await?;
    let replay = store::log_notification(
        &h.state.pool,
        created.order.id,
        OrderStatus::Pending,
        "Your order has been received.",
    )
    .await?;

    assert!(first, "first sighting of (order, status) sends");
    assert!(!replay, "replayed change is deduped");
    Ok(())
}

#[tokio::test]
async fn watcher_reads_behind_the_cursor_for_late_commits() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Cash))
        .await?
        .data
        .unwrap();

    // The cursor moved past this order's timestamp, as happens when a long
    // transaction commits with an updated_at older than rows a poll
    // already saw.
    store::save_cursor(
        &h.state.pool,
        watcher::CONSUMER_ID,
        created.order.updated_at + chrono::Duration::seconds(2),
    )
    .await?;

    watcher::tick(&h.state).await?;

    let sent = h.messenger.sent.lock().unwrap();
    assert!(
        sent.iter()
            .any(|(_, text)| text.contains(&created.order.id.to_string())),
        "change behind the cursor is still delivered"
    );
    Ok(())
}

#[tokio::test]
async fn interrupted_cash_settlement_completes_on_retry() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();
    let courier = agent();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Cash))
        .await?
        .data
        .unwrap();
    push_to_ready(&h, created.order.id, created.order.restaurant_id).await?;
    delivery_service::claim(&h.state, &courier, created.order.id).await?;

    // The delivery commit landed but the process died before settlement.
    store::complete_delivery(&h.state.pool, created.order.id, courier.user_id, None).await?;
    let records = store::fetch_payment_records(&h.state.pool, created.order.id).await?;
    assert!(records.is_empty(), "settlement has not happened yet");

    let retried = delivery_service::mark_delivered(
        &h.state,
        &courier,
        created.order.id,
        MarkDeliveredRequest::default(),
    )
    .await?
    .data
    .unwrap();

    assert_eq!(retried.order.status, OrderStatus::Delivered);
    assert_eq!(retried.order.payment_status, PaymentStatus::Paid);
    let records = store::fetch_payment_records(&h.state.pool, created.order.id).await?;
    assert_eq!(records.len(), 1, "retry finished the settlement exactly once");
    Ok(())
}

#[tokio::test]
async fn late_success_after_cancellation_is_flagged() -> anyhow::Result<()> {
    let Some(h) = setup().await? else { return Ok(()) };
    let user = customer();

    let created = order_service::create_order(&h.state, &user, order_request(&h, PaymentMethod::Card))
        .await?
        .data
        .unwrap();
    let reference = created.payment_reference.unwrap();

    order_service::cancel_order(&h.state, &user, created.order.id).await?;

    let applied = payment_service::apply_payment_outcome(
        &h.state,
        PaymentWebhookRequest {
            order_id: created.order.id,
            payment_reference: reference,
            outcome: PaymentOutcome::Succeeded,
            amount: 1350,
            currency: None,
        },
    )
    .await?
    .data
    .unwrap();

    // The capture is ledgered and recorded, but the order is not
    // resurrected and the anomaly lands in the audit trail.
    assert_eq!(applied.order.status, OrderStatus::Cancelled);
    assert_eq!(applied.order.payment_status, PaymentStatus::Paid);

    let flagged = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM audit_logs \
         WHERE action = 'payment_anomaly' AND metadata->>'order_id' = $1",
    )
    .bind(created.order.id.to_string())
    .fetch_one(&h.state.pool)
    .await?;
    assert!(flagged >= 1, "capture against a cancelled order is flagged");
    Ok(())
}
