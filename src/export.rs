//! Export seam for result downloads.
//!
//! Format writers are external collaborators; only the [`Exporter`] contract
//! and the JSON implementation live in this crate. Unknown formats are a
//! client error, not a missing feature of the streaming pipeline.

use crate::db::models::Listing;

/// Column names clients may select with `?columns=`.
pub const EXPORT_COLUMNS: &[&str] = &[
    "id",
    "title",
    "category",
    "address",
    "address_city",
    "address_country",
    "phone",
    "website",
    "latitude",
    "longitude",
    "review_count",
    "review_rating",
    "place_id",
    "status",
    "price_range",
    "description",
];

/// Incremental serializer for a stream of listings.
///
/// `begin` and `end` frame the document; `row` renders one listing. The
/// pipeline never buffers the full result set.
pub trait Exporter: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn file_extension(&self) -> &'static str;
    fn begin(&self) -> Vec<u8>;
    fn row(&self, listing: &Listing, first: bool) -> Vec<u8>;
    fn end(&self) -> Vec<u8>;
}

/// Resolve a format name to its exporter, or `None` for formats served by
/// external writers (csv, xlsx) that are not wired into this build.
pub fn exporter_for(format: &str, columns: Option<Vec<String>>) -> Option<Box<dyn Exporter>> {
    match format {
        "json" => Some(Box::new(JsonExporter { columns })),
        _ => None,
    }
}

/// Streams a JSON array, optionally projected onto a column subset.
pub struct JsonExporter {
    columns: Option<Vec<String>>,
}

impl JsonExporter {
    fn project(&self, listing: &Listing) -> serde_json::Value {
        let full = serde_json::to_value(listing).unwrap_or_default();
        match &self.columns {
            None => full,
            Some(columns) => {
                let mut out = serde_json::Map::with_capacity(columns.len());
                for column in columns {
                    if let Some(value) = full.get(column.as_str()) {
                        out.insert(column.clone(), value.clone());
                    }
                }
                serde_json::Value::Object(out)
            }
        }
    }
}

impl Exporter for JsonExporter {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn begin(&self) -> Vec<u8> {
        b"[".to_vec()
    }

    fn row(&self, listing: &Listing, first: bool) -> Vec<u8> {
        let mut bytes = if first { Vec::new() } else { b",".to_vec() };
        bytes.extend(serde_json::to_vec(&self.project(listing)).unwrap_or_default());
        bytes
    }

    fn end(&self) -> Vec<u8> {
        b"]".to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn listing() -> Listing {
        Listing {
            id: 1,
            raw_result_id: 1,
            job_id: Uuid::nil(),
            place_id: Some("p1".to_owned()),
            cid: None,
            data_id: None,
            title: "Kopi Tuku".to_owned(),
            category: Some("Coffee shop".to_owned()),
            categories: vec!["Coffee shop".to_owned()],
            address: Some("Jl. Example 1".to_owned()),
            address_street: None,
            address_city: Some("Jakarta".to_owned()),
            address_state: None,
            address_postal_code: None,
            address_country: Some("ID".to_owned()),
            phone: None,
            website: Some("https://example.com".to_owned()),
            latitude: Some(-6.2),
            longitude: Some(106.8),
            review_count: 12,
            review_rating: Some(4.5),
            status: None,
            price_range: None,
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unknown_formats_are_not_wired() {
        assert!(exporter_for("csv", None).is_none());
        assert!(exporter_for("xlsx", None).is_none());
        assert!(exporter_for("json", None).is_some());
    }

    #[test]
    fn json_export_frames_an_array() {
        let exporter = exporter_for("json", None).unwrap();
        let mut out = exporter.begin();
        out.extend(exporter.row(&listing(), true));
        out.extend(exporter.row(&listing(), false));
        out.extend(exporter.end());

        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[0]["title"], "Kopi Tuku");
    }

    #[test]
    fn column_projection_drops_unselected_fields() {
        let exporter = exporter_for(
            "json",
            Some(vec!["title".to_owned(), "address_city".to_owned()]),
        )
        .unwrap();
        let row = exporter.row(&listing(), true);
        let parsed: serde_json::Value = serde_json::from_slice(&row).unwrap();
        assert_eq!(parsed["title"], "Kopi Tuku");
        assert_eq!(parsed["address_city"], "Jakarta");
        assert!(parsed.get("website").is_none());
    }
}
