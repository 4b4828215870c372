use chrono::NaiveDate;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect};

use crate::errors::ServiceError;

/// Formats `{prefix}-{YYYYMMDD}-{NNNN}`.
pub fn format_document_number(prefix: &str, date: NaiveDate, sequence: u32) -> String {
    format!("{}{:04}", document_stem(prefix, date), sequence)
}

fn document_stem(prefix: &str, date: NaiveDate) -> String {
    format!("{}-{}-", prefix, date.format("%Y%m%d"))
}

/// Daily counter of a number that starts with `stem`, if it has one.
fn parse_sequence(number: &str, stem: &str) -> Option<u32> {
    number.strip_prefix(stem)?.parse().ok()
}

/// Next free number for `date`, scanning the numbers already issued that day.
///
/// Two transactions racing for the same number are stopped by the unique
/// index on the number column; the loser gets a persistence error.
pub(crate) async fn next_document_number<E, C>(
    conn: &C,
    column: E::Column,
    prefix: &str,
    date: NaiveDate,
) -> Result<String, ServiceError>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let stem = document_stem(prefix, date);
    let issued: Vec<String> = E::find()
        .select_only()
        .column(column)
        .filter(column.starts_with(stem.as_str()))
        .into_tuple()
        .all(conn)
        .await?;

    let next = issued
        .iter()
        .filter_map(|number| parse_sequence(number, &stem))
        .max()
        .unwrap_or(0)
        + 1;

    Ok(format_document_number(prefix, date, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 7).unwrap()
    }

    #[test]
    fn formats_with_zero_padding() {
        assert_eq!(format_document_number("GR", date(), 1), "GR-20250307-0001");
        assert_eq!(format_document_number("ADJ", date(), 42), "ADJ-20250307-0042");
    }

    #[test]
    fn counter_keeps_growing_past_four_digits() {
        assert_eq!(format_document_number("GR", date(), 12345), "GR-20250307-12345");
    }

    #[test]
    fn ignores_numbers_from_other_days_or_prefixes() {
        let stem = document_stem("GR", date());
        assert_eq!(parse_sequence("GR-20250307-0009", &stem), Some(9));
        assert_eq!(parse_sequence("GR-20250306-0009", &stem), None);
        assert_eq!(parse_sequence("ADJ-20250307-0009", &stem), None);
        assert_eq!(parse_sequence("GR-20250307-abc", &stem), None);
    }

    proptest! {
        #[test]
        fn parse_inverts_format(sequence in 1u32..1_000_000) {
            let number = format_document_number("GR", date(), sequence);
            prop_assert_eq!(parse_sequence(&number, &document_stem("GR", date())), Some(sequence));
        }
    }
}
