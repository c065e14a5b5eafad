use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        delivery::{DeliveryCompleted, MarkDeliveredRequest, ReadyOrderList},
        orders::{CreateOrderItem, CreateOrderRequest, CreatedOrder, OrderList, OrderWithItems, UpdateStatusRequest},
        payments::{PaymentApplied, PaymentOutcome, PaymentWebhookRequest},
    },
    models::{DeliveryReport, Order, OrderItem, OrderStatus, PaymentMethod, PaymentRecord, PaymentStatus},
    response::{ApiResponse, Meta},
    routes::{delivery, health, orders, params, payments},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        orders::create_order,
        orders::list_my_orders,
        orders::list_restaurant_orders,
        orders::get_order,
        orders::update_status,
        orders::cancel_order,
        payments::webhook,
        delivery::list_ready,
        delivery::claim,
        delivery::mark_delivered,
    ),
    components(
        schemas(
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            PaymentMethod,
            PaymentRecord,
            DeliveryReport,
            CreateOrderRequest,
            CreateOrderItem,
            CreatedOrder,
            UpdateStatusRequest,
            OrderList,
            OrderWithItems,
            PaymentWebhookRequest,
            PaymentOutcome,
            PaymentApplied,
            MarkDeliveredRequest,
            ReadyOrderList,
            DeliveryCompleted,
            params::Pagination,
            params::OrderListQuery,
            health::HealthData,
            Meta,
            ApiResponse<health::HealthData>,
            ApiResponse<Order>,
            ApiResponse<OrderList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<CreatedOrder>,
            ApiResponse<PaymentApplied>,
            ApiResponse<ReadyOrderList>,
            ApiResponse<DeliveryCompleted>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Orders", description = "Order intake and restaurant status pushes"),
        (name = "Payments", description = "Payment processor callbacks"),
        (name = "Delivery", description = "Delivery claim and completion"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
