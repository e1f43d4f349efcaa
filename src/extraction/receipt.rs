//! Structured receipt extraction through an OpenAI-compatible function call.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::{macros::format_description, Date};
use tracing::{debug, instrument};

use crate::bills::repo_types::{NewBill, NewItem};
use crate::config::LlmConfig;

const FUNCTION_NAME: &str = "extract_financial_data";

/// Upper bound for a single line's quantity; anything larger is model noise.
pub const MAX_ITEM_QUANTITY: i32 = 10_000;

const SYSTEM_PROMPT: &str = "You are a financial document analyzer. Extract structured financial \
information from receipt or transaction text and return it through the provided function.\n\
- merchant_name: name of the store or merchant\n\
- total_amount: total amount of the transaction as a number\n\
- date: transaction date in YYYY-MM-DD format\n\
- items: purchased items, each with description, quantity (units) and price (unit price, \
not quantity times price)\n\
If something is missing or unclear, make a best guess based on typical receipts.";

/// Raw arguments of the `extract_financial_data` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialData {
    pub merchant_name: String,
    pub total_amount: f64,
    pub date: String,
    #[serde(default)]
    pub items: Vec<ExtractedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedItem {
    #[serde(alias = "name")]
    pub description: String,
    #[serde(default = "one")]
    pub quantity: f64,
    pub price: f64,
}

fn one() -> f64 {
    1.0
}

#[async_trait]
pub trait ReceiptParser: Send + Sync {
    async fn parse_receipt(&self, text: &str) -> anyhow::Result<FinancialData>;
}

#[derive(Clone)]
pub struct OpenAiReceiptParser {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiReceiptParser {
    pub fn new(cfg: &LlmConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build llm http client")?;
        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
        })
    }

    fn request_body(&self, text: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": text }
            ],
            "tools": [{ "type": "function", "function": function_schema() }],
            "tool_choice": { "type": "function", "function": { "name": FUNCTION_NAME } }
        })
    }
}

#[async_trait]
impl ReceiptParser for OpenAiReceiptParser {
    #[instrument(skip(self, text), fields(model = %self.model))]
    async fn parse_receipt(&self, text: &str) -> anyhow::Result<FinancialData> {
        let res = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(text))
            .send()
            .await
            .context("llm request")?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            bail!("llm api error {}: {}", status.as_u16(), body);
        }

        let payload: Value = res.json().await.context("llm response body")?;
        let data = parse_tool_call(&payload)?;
        debug!(merchant = %data.merchant_name, items = data.items.len(), "receipt parsed");
        Ok(data)
    }
}

fn function_schema() -> Value {
    json!({
        "name": FUNCTION_NAME,
        "description": "Extract financial information from text",
        "parameters": {
            "type": "object",
            "properties": {
                "merchant_name": { "type": "string", "description": "Name of the merchant or business" },
                "total_amount": { "type": "number", "description": "Total amount of the transaction" },
                "date": { "type": "string", "description": "Date of the transaction in YYYY-MM-DD format" },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": { "type": "string", "description": "Description of the item" },
                            "quantity": { "type": "number", "description": "Quantity of the item" },
                            "price": { "type": "number", "description": "Unit price of the item" }
                        },
                        "required": ["description", "quantity", "price"]
                    }
                }
            },
            "required": ["merchant_name", "total_amount", "date", "items"]
        }
    })
}

/// Pulls the forced tool call out of a chat-completions response.
pub(crate) fn parse_tool_call(payload: &Value) -> anyhow::Result<FinancialData> {
    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| anyhow!("no choices in llm response"))?;

    let arguments = message
        .pointer("/tool_calls/0/function/arguments")
        .or_else(|| message.pointer("/function_call/arguments"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("no function call found in response"))?;

    serde_json::from_str(arguments).context("parse function call arguments")
}

fn to_money(value: f64, field: &str) -> anyhow::Result<Decimal> {
    let d = Decimal::try_from(value).with_context(|| format!("{} is not a valid amount", field))?;
    if d.is_sign_negative() {
        bail!("{} must not be negative", field);
    }
    Ok(d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

impl FinancialData {
    /// Validates and normalizes model output into a bill ready for insertion.
    ///
    /// Items that share a description are merged (quantities summed, last
    /// price kept) since a bill cannot hold two items with the same one.
    pub fn into_new_bill(self) -> anyhow::Result<NewBill> {
        let merchant_name = self.merchant_name.trim().to_string();
        if merchant_name.is_empty() {
            bail!("merchant name is empty");
        }

        let date = Date::parse(self.date.trim(), format_description!("[year]-[month]-[day]"))
            .with_context(|| format!("invalid receipt date {:?}", self.date))?;
        let total_amount = to_money(self.total_amount, "total_amount")?;

        let mut items: Vec<NewItem> = Vec::with_capacity(self.items.len());
        for raw in self.items {
            let description = raw.description.trim().to_string();
            if description.is_empty() {
                continue;
            }
            let quantity = if raw.quantity.is_finite() {
                (raw.quantity.round() as i32).clamp(1, MAX_ITEM_QUANTITY)
            } else {
                1
            };
            let price = to_money(raw.price, "price")?;

            match items.iter_mut().find(|i| i.description == description) {
                Some(existing) => {
                    existing.quantity = existing
                        .quantity
                        .saturating_add(quantity)
                        .min(MAX_ITEM_QUANTITY);
                    existing.price = price;
                }
                None => items.push(NewItem {
                    description,
                    quantity,
                    price,
                }),
            }
        }

        Ok(NewBill {
            merchant_name,
            total_amount,
            date,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn sample() -> FinancialData {
        FinancialData {
            merchant_name: "  Corner Cafe ".into(),
            total_amount: 12.349,
            date: "2024-03-09".into(),
            items: vec![
                ExtractedItem { description: "Latte".into(), quantity: 1.0, price: 4.5 },
                ExtractedItem { description: "Bagel".into(), quantity: 2.4, price: 2.0 },
                ExtractedItem { description: "Latte".into(), quantity: 1.0, price: 4.75 },
            ],
        }
    }

    #[test]
    fn parses_tool_call_arguments() {
        let payload = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "type": "function",
                        "function": {
                            "name": FUNCTION_NAME,
                            "arguments": "{\"merchant_name\":\"Walmart\",\"total_amount\":9.99,\"date\":\"2024-01-02\",\"items\":[{\"name\":\"Rice\",\"quantity\":1,\"price\":9.99}]}"
                        }
                    }]
                }
            }]
        });
        let data = parse_tool_call(&payload).expect("tool call parses");
        assert_eq!(data.merchant_name, "Walmart");
        assert_eq!(data.items[0].description, "Rice");
    }

    #[test]
    fn missing_tool_call_is_an_error() {
        let payload = json!({ "choices": [{ "message": { "content": "sorry" } }] });
        let err = parse_tool_call(&payload).unwrap_err();
        assert!(err.to_string().contains("no function call"));
    }

    #[test]
    fn normalizes_amounts_dates_and_merges_items() {
        let bill = sample().into_new_bill().expect("valid bill");
        assert_eq!(bill.merchant_name, "Corner Cafe");
        assert_eq!(bill.total_amount, Decimal::from_str("12.35").unwrap());
        assert_eq!(bill.date.to_string(), "2024-03-09");
        assert_eq!(bill.items.len(), 2);

        let latte = bill.items.iter().find(|i| i.description == "Latte").unwrap();
        assert_eq!(latte.quantity, 2);
        assert_eq!(latte.price, Decimal::from_str("4.75").unwrap());

        let bagel = bill.items.iter().find(|i| i.description == "Bagel").unwrap();
        assert_eq!(bagel.quantity, 2);
    }

    #[test]
    fn huge_quantities_are_capped_instead_of_overflowing() {
        let mut data = sample();
        data.items = vec![
            ExtractedItem { description: "Bulk".into(), quantity: 3e9, price: 1.0 },
            ExtractedItem { description: "Bulk".into(), quantity: 3e9, price: 1.0 },
            ExtractedItem { description: "Odd".into(), quantity: -5.0, price: 1.0 },
        ];
        let bill = data.into_new_bill().expect("valid bill");
        assert_eq!(bill.items[0].quantity, MAX_ITEM_QUANTITY);
        assert_eq!(bill.items[1].quantity, 1);
    }

    #[test]
    fn rejects_bad_dates_and_blank_merchants() {
        let mut data = sample();
        data.date = "09/03/2024".into();
        assert!(data.into_new_bill().is_err());

        let mut data = sample();
        data.merchant_name = "   ".into();
        assert!(data.into_new_bill().is_err());
    }

    #[test]
    fn rejects_negative_totals() {
        let mut data = sample();
        data.total_amount = -1.0;
        assert!(data.into_new_bill().is_err());
    }
}
