//! Wire schema of order messages arriving on the feed.
//!
//! Messages are JSON objects. Decoding is lenient about absent and `null`
//! fields (both take zero values) so that the validation step can report
//! *which* required field is missing instead of failing with a generic
//! decode error.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::entities::{Delivery, Order, OrderItem, Payment, Timestamp};
use crate::error::ValidationError;

/// An explicit JSON `null` decodes like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Delivery block of an order message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryMessage {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phone: String,
    #[serde(deserialize_with = "null_as_default")]
    pub zip: String,
    #[serde(deserialize_with = "null_as_default")]
    pub city: String,
    #[serde(deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub region: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
}

/// Payment block of an order message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentMessage {
    #[serde(deserialize_with = "null_as_default")]
    pub transaction: String,
    #[serde(deserialize_with = "null_as_default")]
    pub request_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub currency: String,
    #[serde(deserialize_with = "null_as_default")]
    pub provider: String,
    #[serde(deserialize_with = "null_as_default")]
    pub amount: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub payment_dt: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub bank: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery_cost: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub goods_total: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub custom_fee: i64,
}

/// One item of an order message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemMessage {
    #[serde(deserialize_with = "null_as_default")]
    pub chrt_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub track_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub price: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub rid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sale: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub size: String,
    #[serde(deserialize_with = "null_as_default")]
    pub total_price: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub nm_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub brand: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: i32,
}

/// A decoded, not yet validated order message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderMessage {
    #[serde(deserialize_with = "null_as_default")]
    pub order_uid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub track_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub entry: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery: DeliveryMessage,
    #[serde(deserialize_with = "null_as_default")]
    pub payment: PaymentMessage,
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<ItemMessage>,
    #[serde(deserialize_with = "null_as_default")]
    pub locale: String,
    #[serde(deserialize_with = "null_as_default")]
    pub internal_signature: String,
    #[serde(deserialize_with = "null_as_default")]
    pub customer_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery_service: String,
    #[serde(deserialize_with = "null_as_default")]
    pub shardkey: String,
    #[serde(deserialize_with = "null_as_default")]
    pub sm_id: i32,
    #[serde(deserialize_with = "null_as_default")]
    pub date_created: String,
    #[serde(deserialize_with = "null_as_default")]
    pub oof_shard: String,
}

/// Result of normalizing a valid message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedOrder {
    pub order: Order,
    /// `date_created` could not be parsed and the processing time was used.
    pub date_created_fallback: bool,
}

fn require_text(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::missing(field));
    }
    Ok(())
}

/// PostgreSQL text columns cannot hold NUL.
fn reject_nul(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.contains('\0') {
        return Err(ValidationError::invalid(field, "must not contain NUL characters"));
    }
    Ok(())
}

fn require_non_negative(value: i64, field: &str) -> Result<(), ValidationError> {
    if value < 0 {
        return Err(ValidationError::invalid(field, "must not be negative"));
    }
    Ok(())
}

impl OrderMessage {
    /// Decode a raw feed payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(payload).map_err(|e| ValidationError::Malformed {
            reason: e.to_string(),
        })
    }

    /// Check required fields and value constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text(&self.order_uid, "order_uid")?;
        require_text(&self.track_number, "track_number")?;
        require_text(&self.customer_id, "customer_id")?;

        if self.items.is_empty() {
            return Err(ValidationError::missing("items"));
        }

        require_text(&self.delivery.name, "delivery.name")?;
        require_text(&self.delivery.phone, "delivery.phone")?;

        if self.payment.amount <= 0 {
            return Err(ValidationError::invalid(
                "payment.amount",
                "must be greater than zero",
            ));
        }
        require_text(&self.payment.currency, "payment.currency")?;
        require_non_negative(self.payment.delivery_cost, "payment.delivery_cost")?;
        require_non_negative(self.payment.goods_total, "payment.goods_total")?;
        require_non_negative(self.payment.custom_fee, "payment.custom_fee")?;

        for item in &self.items {
            require_non_negative(item.price, "items.price")?;
            require_non_negative(item.total_price, "items.total_price")?;
        }

        for (field, value) in self.text_fields() {
            reject_nul(value, field)?;
        }

        Ok(())
    }

    fn text_fields(&self) -> Vec<(&'static str, &str)> {
        let d = &self.delivery;
        let p = &self.payment;
        let mut fields = vec![
            ("order_uid", self.order_uid.as_str()),
            ("track_number", &self.track_number),
            ("entry", &self.entry),
            ("locale", &self.locale),
            ("internal_signature", &self.internal_signature),
            ("customer_id", &self.customer_id),
            ("delivery_service", &self.delivery_service),
            ("shardkey", &self.shardkey),
            ("oof_shard", &self.oof_shard),
            ("delivery.name", &d.name),
            ("delivery.phone", &d.phone),
            ("delivery.zip", &d.zip),
            ("delivery.city", &d.city),
            ("delivery.address", &d.address),
            ("delivery.region", &d.region),
            ("delivery.email", &d.email),
            ("payment.transaction", &p.transaction),
            ("payment.request_id", &p.request_id),
            ("payment.currency", &p.currency),
            ("payment.provider", &p.provider),
            ("payment.bank", &p.bank),
        ];
        for item in &self.items {
            fields.extend([
                ("items.track_number", item.track_number.as_str()),
                ("items.rid", &item.rid),
                ("items.name", &item.name),
                ("items.size", &item.size),
                ("items.brand", &item.brand),
            ]);
        }
        fields
    }

    /// Convert a validated message into an [`Order`].
    ///
    /// An unparseable `date_created` is replaced by `received_at`. Timestamps
    /// are truncated to microseconds so they survive a PostgreSQL round trip.
    pub fn into_order(self, received_at: Timestamp) -> NormalizedOrder {
        let (date_created, date_created_fallback) =
            match DateTime::parse_from_rfc3339(self.date_created.trim()) {
                Ok(parsed) => (parsed.with_timezone(&Utc), false),
                Err(_) => (received_at, true),
            };

        let order = Order {
            order_uid: self.order_uid,
            track_number: self.track_number,
            entry: self.entry,
            delivery: Delivery {
                name: self.delivery.name,
                phone: self.delivery.phone,
                zip: self.delivery.zip,
                city: self.delivery.city,
                address: self.delivery.address,
                region: self.delivery.region,
                email: self.delivery.email,
            },
            payment: Payment {
                transaction: self.payment.transaction,
                request_id: self.payment.request_id,
                currency: self.payment.currency,
                provider: self.payment.provider,
                amount: self.payment.amount,
                payment_dt: self.payment.payment_dt,
                bank: self.payment.bank,
                delivery_cost: self.payment.delivery_cost,
                goods_total: self.payment.goods_total,
                custom_fee: self.payment.custom_fee,
            },
            items: self
                .items
                .into_iter()
                .map(|item| OrderItem {
                    chrt_id: item.chrt_id,
                    track_number: item.track_number,
                    price: item.price,
                    rid: item.rid,
                    name: item.name,
                    sale: item.sale,
                    size: item.size,
                    total_price: item.total_price,
                    nm_id: item.nm_id,
                    brand: item.brand,
                    status: item.status,
                })
                .collect(),
            locale: self.locale,
            internal_signature: self.internal_signature,
            customer_id: self.customer_id,
            delivery_service: self.delivery_service,
            shardkey: self.shardkey,
            sm_id: self.sm_id,
            date_created: date_created.trunc_subsecs(6),
            oof_shard: self.oof_shard,
        };

        NormalizedOrder {
            order,
            date_created_fallback,
        }
    }
}

impl From<&Order> for OrderMessage {
    fn from(order: &Order) -> Self {
        OrderMessage {
            order_uid: order.order_uid.clone(),
            track_number: order.track_number.clone(),
            entry: order.entry.clone(),
            delivery: DeliveryMessage {
                name: order.delivery.name.clone(),
                phone: order.delivery.phone.clone(),
                zip: order.delivery.zip.clone(),
                city: order.delivery.city.clone(),
                address: order.delivery.address.clone(),
                region: order.delivery.region.clone(),
                email: order.delivery.email.clone(),
            },
            payment: PaymentMessage {
                transaction: order.payment.transaction.clone(),
                request_id: order.payment.request_id.clone(),
                currency: order.payment.currency.clone(),
                provider: order.payment.provider.clone(),
                amount: order.payment.amount,
                payment_dt: order.payment.payment_dt,
                bank: order.payment.bank.clone(),
                delivery_cost: order.payment.delivery_cost,
                goods_total: order.payment.goods_total,
                custom_fee: order.payment.custom_fee,
            },
            items: order
                .items
                .iter()
                .map(|item| ItemMessage {
                    chrt_id: item.chrt_id,
                    track_number: item.track_number.clone(),
                    price: item.price,
                    rid: item.rid.clone(),
                    name: item.name.clone(),
                    sale: item.sale,
                    size: item.size.clone(),
                    total_price: item.total_price,
                    nm_id: item.nm_id,
                    brand: item.brand.clone(),
                    status: item.status,
                })
                .collect(),
            locale: order.locale.clone(),
            internal_signature: order.internal_signature.clone(),
            customer_id: order.customer_id.clone(),
            delivery_service: order.delivery_service.clone(),
            shardkey: order.shardkey.clone(),
            sm_id: order.sm_id,
            date_created: order.date_created.to_rfc3339(),
            oof_shard: order.oof_shard.clone(),
        }
    }
}

/// Decode, validate and normalize a raw payload in one step.
pub fn parse_order(payload: &[u8], received_at: Timestamp) -> Result<NormalizedOrder, ValidationError> {
    let message = OrderMessage::decode(payload)?;
    message.validate()?;
    Ok(message.into_order(received_at))
}
