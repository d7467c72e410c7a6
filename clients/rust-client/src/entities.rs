//! Typed business entities of the point-of-sale screens.
//!
//! The store itself is payload-agnostic; these types convert to and from
//! [`Document`] at the caller boundary. The namespace decides the variant.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tilldb_core::{Document, ListOptions, PutResponse, StoreError, StoreResult};

use crate::sync::LocalStore;

pub const PRODUCTS: &str = "products";
pub const ORDERS: &str = "orders";
pub const SALES: &str = "sales";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub category: String,
    pub price: f64,
    pub cost: f64,
    pub stock: i64,
    pub min_stock: i64,
}

impl Product {
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.min_stock
    }
}

/// Line of an order or a sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    pub items: Vec<LineItem>,
    pub total: f64,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub date: String,
    pub items: Vec<LineItem>,
    pub discount: f64,
    pub subtotal: f64,
    pub total: f64,
}

/// Entity stored in one of the known namespaces
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Product(Product),
    Order(Order),
    Sale(Sale),
}

impl Entity {
    pub fn namespace(&self) -> &'static str {
        match self {
            Entity::Product(_) => PRODUCTS,
            Entity::Order(_) => ORDERS,
            Entity::Sale(_) => SALES,
        }
    }

    /// Decode a stored document according to its namespace
    pub fn from_document(doc: &Document) -> StoreResult<Self> {
        let payload = Value::Object(doc.payload.clone());
        match doc.namespace() {
            Some(PRODUCTS) => Ok(Entity::Product(serde_json::from_value(payload)?)),
            Some(ORDERS) => Ok(Entity::Order(serde_json::from_value(payload)?)),
            Some(SALES) => Ok(Entity::Sale(serde_json::from_value(payload)?)),
            _ => Err(StoreError::InvalidKey(format!(
                "'{}' is not in an entity namespace",
                doc.id
            ))),
        }
    }

    /// Document for this entity; `None` lets the store generate the id
    pub fn to_document(&self, id: Option<&str>) -> StoreResult<Document> {
        let data = match self {
            Entity::Product(p) => serde_json::to_value(p)?,
            Entity::Order(o) => serde_json::to_value(o)?,
            Entity::Sale(s) => serde_json::to_value(s)?,
        };
        Ok(match id {
            Some(id) => Document::new(id, data),
            None => Document::in_namespace(self.namespace(), data),
        })
    }
}

fn sample_products() -> Vec<(&'static str, Product)> {
    vec![
        (
            "products:1",
            Product {
                name: "Classic Burger".to_string(),
                category: "Burgers".to_string(),
                price: 12.99,
                cost: 4.50,
                stock: 50,
                min_stock: 20,
            },
        ),
        (
            "products:2",
            Product {
                name: "Margherita Pizza".to_string(),
                category: "Pizza".to_string(),
                price: 14.99,
                cost: 5.00,
                stock: 40,
                min_stock: 15,
            },
        ),
    ]
}

/// Seed the sample catalogue when the products namespace is empty.
///
/// Returns whether anything was written.
pub fn seed_sample_products(store: &mut LocalStore) -> StoreResult<bool> {
    let existing = store.list(PRODUCTS, &ListOptions::namespace_range(PRODUCTS).limit(1))?;
    if !existing.is_empty() {
        return Ok(false);
    }

    for (id, product) in sample_products() {
        store.put(Entity::Product(product).to_document(Some(id))?)?;
    }
    tracing::info!("Sample products seeded");
    Ok(true)
}

/// Add `delta` to a product's stock, never going below zero
pub fn adjust_stock(store: &mut LocalStore, id: &str, delta: i64) -> StoreResult<PutResponse> {
    let doc = store.get(id)?;
    let stock = doc.get("stock").and_then(|v| v.as_i64()).unwrap_or(0);
    store.merge(id, json!({ "stock": stock.saturating_add(delta).max(0) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LocalStore {
        LocalStore::open_in_memory("till-1".to_string()).unwrap()
    }

    #[test]
    fn test_seed_only_when_empty() {
        let mut store = store();
        assert!(seed_sample_products(&mut store).unwrap());
        assert!(!seed_sample_products(&mut store).unwrap());

        let result = store
            .list(PRODUCTS, &ListOptions::namespace_range(PRODUCTS).include_docs(true))
            .unwrap();
        assert_eq!(result.ids(), vec!["products:1", "products:2"]);

        let products: Vec<Entity> = result
            .docs()
            .map(|d| Entity::from_document(d).unwrap())
            .collect();
        match &products[1] {
            Entity::Product(p) => {
                assert_eq!(p.name, "Margherita Pizza");
                assert_eq!(p.price, 14.99);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_adjust_stock_clamps_at_zero() {
        let mut store = store();
        seed_sample_products(&mut store).unwrap();

        adjust_stock(&mut store, "products:1", -5).unwrap();
        assert_eq!(store.get("products:1").unwrap().get("stock"), Some(json!(45)));

        adjust_stock(&mut store, "products:1", -100).unwrap();
        let doc = store.get("products:1").unwrap();
        assert_eq!(doc.get("stock"), Some(json!(0)));
        assert_eq!(doc.get("name"), Some(json!("Classic Burger")));

        assert!(matches!(
            adjust_stock(&mut store, "products:404", 1),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_order_round_trip_through_store() {
        let mut store = store();
        let order = Order {
            customer_name: "Ana".to_string(),
            customer_phone: None,
            items: vec![LineItem {
                product_id: "products:1".to_string(),
                product_name: "Classic Burger".to_string(),
                quantity: 2,
                price: 12.99,
            }],
            total: 25.98,
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::Card,
            created_at: "2024-05-01T12:00:00Z".to_string(),
            updated_at: "2024-05-01T12:00:00Z".to_string(),
            notes: None,
        };

        let resp = store.put(Entity::Order(order.clone()).to_document(None).unwrap()).unwrap();
        assert!(resp.id.starts_with("orders:"));

        let stored = store.get(&resp.id).unwrap();
        assert_eq!(stored.get("status"), Some(json!("pending")));
        assert_eq!(Entity::from_document(&stored).unwrap(), Entity::Order(order));
    }

    #[test]
    fn test_unknown_namespace() {
        let doc = Document::new("notes:1", json!({"text": "hi"}));
        assert!(matches!(Entity::from_document(&doc), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_low_stock() {
        let product = Product {
            name: "Fries".to_string(),
            category: "Sides".to_string(),
            price: 3.5,
            cost: 0.8,
            stock: 10,
            min_stock: 10,
        };
        assert!(product.is_low_stock());
    }
}
