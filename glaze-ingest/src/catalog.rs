use glaze_core::models::NewProduct;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid catalogue JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Catalogue contains no products")]
    Empty,

    #[error("Product #{index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Duplicate SKU '{0}' in catalogue")]
    DuplicateSku(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Faq {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Document {
    pub id: Option<String>,
    pub title: Option<String>,
    pub text: String,
}

/// One product as it appears in an uploaded catalogue.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    #[serde(default)]
    pub sku: String,
    pub price: Option<f64>,
    #[serde(default)]
    pub specifications: serde_json::Map<String, serde_json::Value>,
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub faqs: Vec<Faq>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl CatalogEntry {
    fn validate(&self, index: usize) -> Result<(), IngestError> {
        let required = [
            ("name", &self.name),
            ("sku", &self.sku),
            ("description", &self.description),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(IngestError::MissingField { index, field });
            }
        }
        Ok(())
    }

    pub fn to_new_product(&self) -> NewProduct {
        NewProduct {
            name: self.name.trim().to_string(),
            description: self.description.trim().to_string(),
            category: self.category.clone(),
            sku: self.sku.trim().to_string(),
            price: self.price,
            specifications: serde_json::Value::Object(self.specifications.clone()),
            image_url: self.image_url.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Wrapped { products: Vec<CatalogEntry> },
    List(Vec<CatalogEntry>),
    Single(Box<CatalogEntry>),
}

/// Parse a catalogue upload: a single product object, an array of products, or
/// `{"products": [...]}`. Every product is validated before any is returned.
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<CatalogEntry>, IngestError> {
    let entries = match serde_json::from_slice::<CatalogDocument>(bytes)? {
        CatalogDocument::Wrapped { products } => products,
        CatalogDocument::List(products) => products,
        CatalogDocument::Single(product) => vec![*product],
    };

    if entries.is_empty() {
        return Err(IngestError::Empty);
    }

    let mut skus = std::collections::HashSet::new();
    for (index, entry) in entries.iter().enumerate() {
        entry.validate(index)?;
        if !skus.insert(entry.sku.trim()) {
            return Err(IngestError::DuplicateSku(entry.sku.trim().to_string()));
        }
    }

    tracing::debug!(products = entries.len(), "Parsed catalogue");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DINNER_SET: &str = r#"{
        "name": "Sakura Dinner Set",
        "description": "Twelve-piece bone china dinner set with hand-painted cherry blossoms.",
        "category": "dinnerware",
        "sku": "DS-SAK-12",
        "price": 249.0,
        "specifications": { "pieces": 12, "material": "bone china" },
        "imageUrl": "https://cdn.example.com/sakura.jpg",
        "faqs": [{ "question": "Is it dishwasher safe?", "answer": "Yes, on a gentle cycle." }]
    }"#;

    #[test]
    fn test_parse_single_product() {
        let entries = parse_catalog(DINNER_SET.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sku, "DS-SAK-12");
        assert_eq!(entries[0].faqs.len(), 1);
        assert_eq!(entries[0].image_url.as_deref(), Some("https://cdn.example.com/sakura.jpg"));
    }

    #[test]
    fn test_parse_wrapped_and_list_forms() {
        let wrapped = format!(r#"{{"products": [{}]}}"#, DINNER_SET);
        assert_eq!(parse_catalog(wrapped.as_bytes()).unwrap().len(), 1);

        let list = format!("[{}]", DINNER_SET);
        assert_eq!(parse_catalog(list.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_sku_is_reported_with_index() {
        let json = r#"[{"name": "Vase", "description": "Blue and white vase"}]"#;
        match parse_catalog(json.as_bytes()) {
            Err(IngestError::MissingField { index, field }) => {
                assert_eq!(index, 0);
                assert_eq!(field, "sku");
            }
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_description_is_rejected() {
        let json = r#"{"name": "Vase", "sku": "V-1", "description": "   "}"#;
        assert!(matches!(
            parse_catalog(json.as_bytes()),
            Err(IngestError::MissingField { field: "description", .. })
        ));
    }

    #[test]
    fn test_empty_catalogue_is_rejected() {
        assert!(matches!(parse_catalog(b"[]"), Err(IngestError::Empty)));
        assert!(matches!(parse_catalog(br#"{"products": []}"#), Err(IngestError::Empty)));
    }

    #[test]
    fn test_duplicate_sku_is_rejected() {
        let list = format!("[{}, {}]", DINNER_SET, DINNER_SET);
        assert!(matches!(
            parse_catalog(list.as_bytes()),
            Err(IngestError::DuplicateSku(sku)) if sku == "DS-SAK-12"
        ));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(parse_catalog(b"not json"), Err(IngestError::Json(_))));
    }

    #[test]
    fn test_to_new_product_keeps_specifications_object() {
        let entry = &parse_catalog(DINNER_SET.as_bytes()).unwrap()[0];
        let product = entry.to_new_product();
        assert_eq!(product.specifications["pieces"], 12);
        assert_eq!(product.category.as_deref(), Some("dinnerware"));
    }
}
