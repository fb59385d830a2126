//! Conversion of untyped result rows into JSON values.

/// Decode column `$idx` of `$row` by trying each Rust type in order.
///
/// The first type sqlx accepts for the column wins; NULL becomes
/// `Value::Null`. Evaluates to `Option<Value>`, `None` when no listed type
/// is compatible.
macro_rules! decode_column {
    ($row:expr, $idx:expr; $($ty:ty => $map:expr),+ $(,)?) => {{
        let mut decoded: Option<serde_json::Value> = None;
        $(
            if decoded.is_none() {
                if let Ok(value) = sqlx::Row::try_get::<Option<$ty>, _>($row, $idx) {
                    decoded = Some(value.map($map).unwrap_or(serde_json::Value::Null));
                }
            }
        )+
        decoded
    }};
}

pub(crate) use decode_column;

/// Placeholder for values of a type we can't render.
pub(crate) fn unsupported<R: sqlx::Row>(row: &R, idx: usize) -> serde_json::Value {
    use sqlx::{Column, TypeInfo};

    let type_name = row
        .columns()
        .get(idx)
        .map(|c| c.type_info().name().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    serde_json::Value::String(format!("<{}>", type_name))
}

/// Render raw bytes as a short description rather than dumping them.
pub(crate) fn bytes_value(bytes: Vec<u8>) -> serde_json::Value {
    serde_json::Value::String(format!("<{} bytes>", bytes.len()))
}

/// Column names of a result row.
pub(crate) fn column_names<R: sqlx::Row>(row: &R) -> Vec<String> {
    use sqlx::Column;

    row.columns().iter().map(|c| c.name().to_string()).collect()
}
