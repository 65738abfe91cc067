//! Arrow schema for consolidated COTAHIST quote output.
//!
//! Prices carry two implied decimal places in the source and are stored as
//! `Decimal128` with scale 2, never as floats.

use std::sync::{Arc, LazyLock};

use arrow::datatypes::{DataType, Field, Schema};

/// Precision of the 13-character `(11)V99` price fields
pub const PRICE_PRECISION: u8 = 13;
/// Precision of the 18-character `(16)V99` volume field
pub const VOLUME_PRECISION: u8 = 18;
/// Implied decimal scale of V99 fields
pub const V99_SCALE: i8 = 2;

fn price(name: &str) -> Field {
    Field::new(name, DataType::Decimal128(PRICE_PRECISION, V99_SCALE), false)
}

/// One row per type-01 COTAHIST record
pub fn quotes() -> &'static Arc<Schema> {
    static SCHEMA: LazyLock<Arc<Schema>> = LazyLock::new(|| {
        Arc::new(Schema::new(vec![
            Field::new("trading_date", DataType::Date32, false),
            Field::new("bdi_code", DataType::Utf8, false),
            Field::new("ticker", DataType::Utf8, false),
            Field::new("market_type", DataType::Utf8, false),
            Field::new("short_name", DataType::Utf8, false),
            Field::new("specification", DataType::Utf8, false),
            price("opening_price"),
            price("high_price"),
            price("low_price"),
            price("avg_price"),
            price("closing_price"),
            price("best_bid_price"),
            price("best_ask_price"),
            Field::new("trade_count", DataType::Int32, false),
            Field::new("total_quantity", DataType::Int64, false),
            Field::new(
                "total_volume",
                DataType::Decimal128(VOLUME_PRECISION, V99_SCALE),
                false,
            ),
            Field::new("expiration_date", DataType::Date32, true),
            Field::new("quote_factor", DataType::Int32, false),
            Field::new("isin_code", DataType::Utf8, false),
            Field::new("distribution_number", DataType::Int16, false),
        ]))
    });
    &SCHEMA
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_twenty_columns() {
        assert_eq!(quotes().fields().len(), 20);
    }

    #[test]
    fn only_expiration_date_is_nullable() {
        for field in quotes().fields() {
            if field.name() == "expiration_date" {
                assert!(field.is_nullable());
            } else {
                assert!(!field.is_nullable(), "{} must be non-null", field.name());
            }
        }
    }

    #[test]
    fn prices_are_decimal_scale_two() {
        let field = quotes().field_with_name("closing_price").unwrap();
        assert_eq!(*field.data_type(), DataType::Decimal128(13, 2));
        let volume = quotes().field_with_name("total_volume").unwrap();
        assert_eq!(*volume.data_type(), DataType::Decimal128(18, 2));
    }
}
