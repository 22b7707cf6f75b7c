//! Shipping-address recovery from gateway metadata.
//!
//! Hosted checkouts can capture the shipping address themselves and stash
//! it in a handful of places. Each place is an [`AddressSource`]; they are
//! tried in [`AddressSource::ORDERED`] order and the first complete address
//! wins.

use serde_json::{Map, Value};

use crate::models::order::ShippingAddress;

use super::{GatewayOrder, GatewayPayment};

/// Used when the captured address carries no country.
pub const DEFAULT_COUNTRY: &str = "India";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    /// Flat keys directly on `payment.notes`
    PaymentNotes,
    /// `payment.notes.shipping_address`, an object or a JSON string
    PaymentNotesShippingAddress,
    /// Flat keys on `order.notes`
    OrderNotes,
    /// `order.notes.shipping_address`
    OrderNotesShippingAddress,
    /// `order.customer_details.shipping_address`
    OrderCustomerDetails,
}

impl AddressSource {
    pub const ORDERED: [AddressSource; 5] = [
        AddressSource::PaymentNotes,
        AddressSource::PaymentNotesShippingAddress,
        AddressSource::OrderNotes,
        AddressSource::OrderNotesShippingAddress,
        AddressSource::OrderCustomerDetails,
    ];

    pub fn extract(
        self,
        payment: Option<&GatewayPayment>,
        order: Option<&GatewayOrder>,
    ) -> Option<ShippingAddress> {
        let fallback_phone = payment.and_then(|p| p.contact.as_deref());
        let object = match self {
            Self::PaymentNotes => payment.and_then(|p| p.notes.as_object()).cloned(),
            Self::PaymentNotesShippingAddress => {
                payment.and_then(|p| nested(&p.notes, "shipping_address"))
            }
            Self::OrderNotes => order.and_then(|o| o.notes.as_object()).cloned(),
            Self::OrderNotesShippingAddress => {
                order.and_then(|o| nested(&o.notes, "shipping_address"))
            }
            Self::OrderCustomerDetails => order.and_then(|o| {
                let details = o.customer_details.as_ref()?;
                let mut address = nested(details, "shipping_address")?;
                // The customer's own name/contact fill gaps in the address.
                for (from, to) in [("name", "name"), ("contact", "contact")] {
                    if !address.contains_key(to) {
                        if let Some(value) = details.get(from) {
                            address.insert(to.to_string(), value.clone());
                        }
                    }
                }
                Some(address)
            }),
        }?;
        address_from_object(&object, fallback_phone)
    }
}

/// Runs every strategy in order and returns the first complete address.
pub fn recover_address(
    payment: Option<&GatewayPayment>,
    order: Option<&GatewayOrder>,
) -> Option<(AddressSource, ShippingAddress)> {
    AddressSource::ORDERED
        .into_iter()
        .find_map(|source| source.extract(payment, order).map(|address| (source, address)))
}

fn nested(value: &Value, key: &str) -> Option<Map<String, Value>> {
    match value.get(key)? {
        Value::Object(map) => Some(map.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn address_from_object(
    object: &Map<String, Value>,
    fallback_phone: Option<&str>,
) -> Option<ShippingAddress> {
    let line1 = field(object, &["street", "address", "line1", "address_line1"])?;
    let street = match field(object, &["line2", "address_line2"]) {
        Some(line2) => format!("{line1}, {line2}"),
        None => line1,
    };
    let phone = field(object, &["phone", "contact", "mobile"])
        .or_else(|| fallback_phone.map(str::to_string))?;

    let address = ShippingAddress {
        full_name: field(object, &["full_name", "fullName", "name"])?,
        street,
        city: field(object, &["city"])?,
        state: field(object, &["state"])?,
        postal_code: field(object, &["postal_code", "postalCode", "pincode", "zipcode", "zip"])?,
        country: field(object, &["country"]).unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
        phone,
    };
    address.is_complete().then_some(address)
}
