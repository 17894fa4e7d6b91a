use std::time::Duration;

use async_trait::async_trait;
use ordersync_core::{config::TargetConfig, ShopIdentity};
use ordersync_runner::{Result, SourceOrder, SyncError, TargetWriter};
use reqwest::{
    header::{ACCEPT, AUTHORIZATION},
    Client, RequestBuilder, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// ERP sales-order endpoint (JTL-Wawi style REST API).
pub struct ErpTarget {
    client: Client,
    base_url: String,
    api_key: String,
    app_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResult {
    #[serde(default)]
    total_items: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SalesOrderBody<'a> {
    external_number: String,
    company_id: u32,
    sales_order_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_name: Option<&'a str>,
    comment: String,
    /// Storefront fields the ERP understands are passed straight through.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ErpTarget {
    pub fn new(cfg: &TargetConfig) -> std::result::Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            app_id: cfg.app_id.clone(),
        })
    }

    /// ERP-side order number for a storefront order.
    pub fn external_number(order: &SourceOrder) -> String {
        format!("VM{}", order.source_id)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Wawi {}", self.api_key))
            .header("X-AppId", &self.app_id)
            .header("X-AppVersion", env!("CARGO_PKG_VERSION"))
            .header(ACCEPT, "application/json")
    }

    fn unreachable(shop: &ShopIdentity, e: reqwest::Error) -> SyncError {
        SyncError::ShopUnreachable {
            shop_id: shop.id.to_string(),
            reason: format!("ERP request failed: {e}"),
        }
    }
}

fn body_for<'a>(shop: &ShopIdentity, order: &'a SourceOrder) -> SalesOrderBody<'a> {
    let extra = match &order.payload {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    SalesOrderBody {
        external_number: ErpTarget::external_number(order),
        company_id: 1,
        sales_order_date: order.modified_at.to_rfc3339(),
        customer_name: order.customer_name.as_deref(),
        comment: format!("Shop: {}", shop.name),
        extra,
    }
}

#[async_trait]
impl TargetWriter for ErpTarget {
    async fn exists(&self, shop: &ShopIdentity, order: &SourceOrder) -> Result<bool> {
        let url = format!("{}/salesOrders", self.base_url);
        let external = Self::external_number(order);
        let response = self
            .authorized(self.client.get(&url))
            .query(&[("externalOrderNumber", external.as_str())])
            .send()
            .await
            .map_err(|e| Self::unreachable(shop, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(SyncError::TargetWrite {
                order: order.order_number.clone(),
                reason: format!("existence check returned HTTP {status}"),
            });
        }
        let found: SearchResult = response.json().await.map_err(|e| SyncError::TargetWrite {
            order: order.order_number.clone(),
            reason: format!("unreadable search response: {e}"),
        })?;
        debug!(shop_id = %shop.id, external = %external, hits = found.total_items, "order lookup");
        Ok(found.total_items > 0)
    }

    async fn write(&self, shop: &ShopIdentity, order: &SourceOrder) -> Result<()> {
        let url = format!("{}/salesOrders", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .json(&body_for(shop, order))
            .send()
            .await
            .map_err(|e| Self::unreachable(shop, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::TargetWrite {
                order: order.order_number.clone(),
                reason: format!("HTTP {status}: {text}"),
            });
        }
        info!(shop_id = %shop.id, order = %order.order_number, "order written to ERP");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(server: &MockServer) -> ErpTarget {
        ErpTarget::new(&TargetConfig {
            base_url: format!("{}/api/v1/", server.uri()),
            api_key: "secret".to_string(),
            app_id: "ordersync/test".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn shop() -> ShopIdentity {
        ShopIdentity::new("Berlin")
    }

    fn order() -> SourceOrder {
        SourceOrder {
            source_id: "42".to_string(),
            order_number: "VM-42".to_string(),
            modified_at: Utc::now(),
            customer_name: Some("Max".to_string()),
            payload: serde_json::json!({ "LanguageIso": "DE" }),
        }
    }

    #[tokio::test]
    async fn exists_queries_by_external_number() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/salesOrders"))
            .and(query_param("externalOrderNumber", "VM42"))
            .and(header("authorization", "Wawi secret"))
            .and(header("x-appid", "ordersync/test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "TotalItems": 1,
                "Items": [{ "Id": 7 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        assert!(target(&server).exists(&shop(), &order()).await.unwrap());
    }

    #[tokio::test]
    async fn empty_search_means_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/salesOrders"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "TotalItems": 0 })),
            )
            .mount(&server)
            .await;

        assert!(!target(&server).exists(&shop(), &order()).await.unwrap());
    }

    #[tokio::test]
    async fn write_posts_sales_order_with_shop_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/salesOrders"))
            .and(body_partial_json(serde_json::json!({
                "ExternalNumber": "VM42",
                "Comment": "Shop: Berlin",
                "CustomerName": "Max",
                "LanguageIso": "DE"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "Id": 9 })))
            .expect(1)
            .mount(&server)
            .await;

        target(&server).write(&shop(), &order()).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_write_is_a_target_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/salesOrders"))
            .respond_with(ResponseTemplate::new(422).set_body_string("customer missing"))
            .mount(&server)
            .await;

        let err = target(&server).write(&shop(), &order()).await.unwrap_err();
        assert_eq!(err.code(), "TARGET_WRITE_FAILED");
        assert!(err.to_string().contains("customer missing"));
    }

    #[tokio::test]
    async fn unreachable_erp_is_reported_per_shop() {
        let cfg = TargetConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            ..TargetConfig::default()
        };
        let err = ErpTarget::new(&cfg)
            .unwrap()
            .exists(&shop(), &order())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SHOP_UNREACHABLE");
    }
}
