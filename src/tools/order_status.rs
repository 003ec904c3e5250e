//! Mock order-status lookup used by the customer-service assistant.
//!
//! `SH1005` is a fixed demo order. Every other id gets a plausible record
//! derived from the id itself, so the same id always reports the same status.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::client::GeminiLiveClientBuilder;
use crate::types::{FunctionDeclaration, Schema};

pub const TOOL_NAME: &str = "get_order_status";

const STATUSES: [&str; 3] = ["processing", "shipped", "delivered"];
const SHIPMENT_METHODS: [&str; 4] = ["standard", "express", "next day", "international"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub status: String,
    pub order_date: String,
    pub shipment_method: String,
    pub estimated_delivery: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipped_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
}

/// Generator seeded from the sum of the id's character codes, so the same
/// id always produces the same record.
fn order_rng(order_id: &str) -> StdRng {
    let seed: u64 = order_id.chars().map(|c| c as u64).sum();
    StdRng::seed_from_u64(seed)
}

fn pick<'a>(rng: &mut StdRng, options: &[&'a str]) -> &'a str {
    options.choose(rng).copied().unwrap_or(options[0])
}

pub fn get_order_status(order_id: &str) -> OrderStatus {
    if order_id == "SH1005" {
        return OrderStatus {
            order_id: order_id.to_string(),
            status: "shipped".into(),
            order_date: "2024-05-20".into(),
            shipment_method: "express".into(),
            estimated_delivery: Some("2024-05-30".into()),
            shipped_date: Some("2024-05-25".into()),
            delivered_date: None,
            items: Some(vec!["Vanilla candles".into(), "BOKHYLLA Stor".into()]),
        };
    }

    let mut rng = order_rng(order_id);
    let status = pick(&mut rng, &STATUSES);
    let shipment_method = pick(&mut rng, &SHIPMENT_METHODS);
    let order_date = format!("2024-05-{:02}", rng.gen_range(12..=28));

    let (estimated_delivery, shipped_date, delivered_date) = match status {
        "processing" => (Some(format!("2024-06-{:02}", rng.gen_range(1..=15))), None, None),
        "shipped" => {
            let shipped = format!("2024-05-{:02}", rng.gen_range(1..=28));
            let estimated = format!("2024-06-{:02}", rng.gen_range(1..=15));
            (Some(estimated), Some(shipped), None)
        }
        _ => {
            let shipped = format!("2024-05-{:02}", rng.gen_range(1..=20));
            let delivered = format!("2024-05-{:02}", rng.gen_range(21..=28));
            (None, Some(shipped), Some(delivered))
        }
    };

    OrderStatus {
        order_id: order_id.to_string(),
        status: status.to_string(),
        order_date,
        shipment_method: shipment_method.to_string(),
        estimated_delivery,
        shipped_date,
        delivered_date,
        items: None,
    }
}

pub fn declaration() -> FunctionDeclaration {
    FunctionDeclaration {
        name: TOOL_NAME.to_string(),
        description: "Get the current status and details of an order.".to_string(),
        parameters: Some(Schema {
            schema_type: "OBJECT".to_string(),
            properties: Some(HashMap::from([(
                "order_id".to_string(),
                Schema {
                    schema_type: "STRING".to_string(),
                    description: Some("The order ID to look up.".to_string()),
                    ..Default::default()
                },
            )])),
            required: Some(vec!["order_id".to_string()]),
            ..Default::default()
        }),
    }
}

async fn handle_call(args: Option<Value>) -> Result<Value, String> {
    let order_id = args
        .as_ref()
        .and_then(|a| a.get("order_id"))
        .and_then(Value::as_str)
        .ok_or_else(|| "order_id is required".to_string())?;
    info!(order_id, "Looking up order status");
    serde_json::to_value(get_order_status(order_id)).map_err(|e| e.to_string())
}

/// Declares the tool on `builder` and installs its handler.
pub fn register(builder: GeminiLiveClientBuilder) -> GeminiLiveClientBuilder {
    builder
        .add_tool_declaration(declaration())
        .on_tool_call(TOOL_NAME, Arc::new(handle_call))
}
